//! Line-oriented pipeline scripts (`pip:run`, `pip:try`, `pip:wait`, ...).

pub mod parse;

use std::io::Write;
use std::sync::Arc;

pub use parse::{ScriptCommand, ScriptError, parse_script};

use crate::models::{CoreError, CoreErrorKind, CoreResult, LogRecord, ScopeErrors, SummaryRecord};
use crate::pipeline::{Pipeline, TaskSpec};
use crate::scope::{DataInjector, ScopeOptions};

/// Command names and their help lines.
pub const COMMANDS: &[(&str, &str)] = &[
    (
        "pip:run",
        "name --body=<command> [--sandbox=terminal|self|docker:<image>] [--wait=task1,task2] [--lock=res1,res2]  Run a task",
    ),
    (
        "pip:try",
        "name --body=<command> [--success=<command>] [--fail=<command>] [--finally=<command>]  Run a task conditionally",
    ),
    ("pip:wait", "Wait for all tasks in the pipeline"),
    ("pip:summary", "Show execution summary"),
    ("pip:logs", "Show execution logs"),
    ("pip:clear", "Clear the current pipeline"),
];

pub struct Interpreter {
    pipeline: Pipeline,
}

impl Interpreter {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Runs every statement in order. A failing statement's error is
    /// appended to the pipeline scope and ends the script, and a killed
    /// scope skips whatever is left.
    pub async fn run_script<W: Write + Send>(&self, script: &str, out: &mut W) -> CoreResult<()> {
        let scope = self.pipeline.scope();
        let commands = match parse_script(script) {
            Ok(commands) => commands,
            Err(error) => {
                let error = CoreError::from(error);
                scope.append_error(error.clone());
                return Err(error);
            }
        };

        for command in &commands {
            if scope.is_killed() {
                tracing::warn!(line = command.line, "pipeline cancelled; skipping remaining commands");
                break;
            }
            tracing::debug!(line = command.line, command = %command.name, "executing script command");
            if let Err(mut error) = self.execute(command, out).await {
                error.message = format!("line {}: {}", command.line, error.message);
                scope.append_error(error.clone());
                return Err(error);
            }
        }
        Ok(())
    }

    /// Waits for every task the script started.
    pub async fn finish(&self) -> Result<(), ScopeErrors> {
        self.pipeline.wait().await
    }

    pub async fn execute<W: Write + Send>(
        &self,
        command: &ScriptCommand,
        out: &mut W,
    ) -> CoreResult<()> {
        match command.name.as_str() {
            "pip:run" => self.submit(command, false).await,
            "pip:try" => self.submit(command, true).await,
            "pip:wait" => {
                if let Err(errors) = self.pipeline.wait().await {
                    write_output(out, &render_errors(&errors))?;
                }
                Ok(())
            }
            "pip:clear" => {
                if let Err(errors) = self.pipeline.clear().await {
                    write_output(out, &render_errors(&errors))?;
                }
                Ok(())
            }
            "pip:summary" => write_output(out, &render_summary(&self.pipeline.summary())),
            "pip:logs" => write_output(out, &render_logs(&self.pipeline.logs())),
            other => Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("unknown command '{other}'"),
            )),
        }
    }

    async fn submit(&self, command: &ScriptCommand, conditional: bool) -> CoreResult<()> {
        let injector = Arc::new(DataInjector::new(command.data()));
        let task_scope = self
            .pipeline
            .scope()
            .child_with(ScopeOptions::new().injector(injector));

        match TaskSpec::from_scope(&task_scope, conditional) {
            Ok(spec) => self.pipeline.submit_in(task_scope, spec).await,
            Err(error) => {
                let _ = task_scope.close().await;
                Err(error)
            }
        }
    }
}

/// `name outcome exit=<code>` per task, with the error when there is one.
pub fn render_summary(records: &[SummaryRecord]) -> String {
    let mut rendered = String::new();
    for record in records {
        let exit = record
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string());
        rendered.push_str(&format!(
            "{} {} exit={}",
            record.task,
            record.outcome.as_str(),
            exit
        ));
        if let Some(error) = &record.error {
            rendered.push_str(&format!(" error={error:?}"));
        }
        rendered.push('\n');
    }
    rendered
}

pub fn render_logs(records: &[LogRecord]) -> String {
    let mut rendered = String::new();
    for record in records {
        rendered.push_str(&format!("== {} [{}] ==\n", record.task, record.phase.as_str()));
        for stream in [&record.stdout, &record.stderr].into_iter().flatten() {
            rendered.push_str(stream);
            if !stream.ends_with('\n') {
                rendered.push('\n');
            }
        }
    }
    rendered
}

pub fn render_errors(errors: &ScopeErrors) -> String {
    let mut rendered = String::new();
    for error in errors.sorted() {
        rendered.push_str(&format!("error: {error}\n"));
    }
    rendered
}

fn write_output<W: Write>(out: &mut W, text: &str) -> CoreResult<()> {
    out.write_all(text.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("failed to write script output: {error}"),
            )
        })
}

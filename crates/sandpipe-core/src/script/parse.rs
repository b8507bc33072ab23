use std::collections::BTreeMap;

use crate::models::{CoreError, CoreErrorKind};
use crate::scope::DataStore;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("line {line}: unterminated {quote} quote")]
    UnterminatedQuote { line: usize, quote: char },
    #[error("line {line}: dangling escape at end of script")]
    DanglingEscape { line: usize },
    #[error("line {line}: option without a name")]
    EmptyOption { line: usize },
}

impl From<ScriptError> for CoreError {
    fn from(error: ScriptError) -> Self {
        CoreError::new(CoreErrorKind::ParseFailure, error.to_string())
    }
}

/// One parsed statement, e.g. `pip:run build --body="make all"`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScriptCommand {
    /// 1-based line the statement starts on.
    pub line: usize,
    pub name: String,
    pub positional: Vec<String>,
    pub options: BTreeMap<String, String>,
}

impl ScriptCommand {
    /// Arguments as scope data: `$0` is the command, `$1`.. the positional
    /// words, `name` aliases `$1`, and every `--key` maps to its value.
    pub fn data(&self) -> DataStore {
        let data = DataStore::new();
        data.set("$0", self.name.clone());
        for (index, word) in self.positional.iter().enumerate() {
            data.set(format!("${}", index + 1), word.clone());
        }
        if let Some(first) = self.positional.first() {
            data.set("name", first.clone());
        }
        for (key, value) in &self.options {
            data.set(key.clone(), value.clone());
        }
        data
    }
}

/// Splits a script into statements. Newlines and unquoted `;` end a
/// statement; `#` at the start of a word comments out the rest of the line.
/// Quoted text may span lines.
pub fn parse_script(script: &str) -> Result<Vec<ScriptCommand>, ScriptError> {
    let mut lexer = Lexer::default();
    let mut chars = script.chars().peekable();

    while let Some(ch) = chars.next() {
        match lexer.quote {
            Some('\'') => match ch {
                '\'' => lexer.quote = None,
                '\n' => {
                    lexer.line += 1;
                    lexer.push(ch);
                }
                _ => lexer.push(ch),
            },
            Some(_) => match ch {
                '"' => lexer.quote = None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\')) => lexer.push(next),
                    Some(next) => {
                        if next == '\n' {
                            lexer.line += 1;
                        }
                        lexer.push('\\');
                        lexer.push(next);
                    }
                    None => return Err(ScriptError::DanglingEscape { line: lexer.line }),
                },
                '\n' => {
                    lexer.line += 1;
                    lexer.push(ch);
                }
                _ => lexer.push(ch),
            },
            None => match ch {
                '\n' => {
                    lexer.end_statement()?;
                    lexer.line += 1;
                }
                ';' => lexer.end_statement()?,
                '#' if lexer.word.is_none() => {
                    while chars.next_if(|next| *next != '\n').is_some() {}
                }
                '\'' | '"' => {
                    lexer.quote = Some(ch);
                    lexer.quote_line = lexer.line;
                    lexer.begin_word();
                }
                '\\' => match chars.next() {
                    Some('\n') => lexer.line += 1,
                    Some(next) => lexer.push(next),
                    None => return Err(ScriptError::DanglingEscape { line: lexer.line }),
                },
                ch if ch.is_whitespace() => lexer.end_word(),
                _ => lexer.push(ch),
            },
        }
    }

    if let Some(quote) = lexer.quote {
        return Err(ScriptError::UnterminatedQuote {
            line: lexer.quote_line,
            quote,
        });
    }
    lexer.end_statement()?;
    Ok(lexer.commands)
}

struct Lexer {
    line: usize,
    statement_line: usize,
    quote: Option<char>,
    quote_line: usize,
    word: Option<String>,
    words: Vec<String>,
    commands: Vec<ScriptCommand>,
}

impl Default for Lexer {
    fn default() -> Self {
        Self {
            line: 1,
            statement_line: 1,
            quote: None,
            quote_line: 1,
            word: None,
            words: Vec::new(),
            commands: Vec::new(),
        }
    }
}

impl Lexer {
    fn begin_word(&mut self) -> &mut String {
        if self.word.is_none() && self.words.is_empty() {
            self.statement_line = self.line;
        }
        self.word.get_or_insert_with(String::new)
    }

    fn push(&mut self, ch: char) {
        self.begin_word().push(ch);
    }

    fn end_word(&mut self) {
        if let Some(word) = self.word.take() {
            self.words.push(word);
        }
    }

    fn end_statement(&mut self) -> Result<(), ScriptError> {
        self.end_word();
        let mut words = std::mem::take(&mut self.words).into_iter();
        let Some(name) = words.next() else {
            return Ok(());
        };

        let mut command = ScriptCommand {
            line: self.statement_line,
            name,
            ..ScriptCommand::default()
        };
        for word in words {
            match word.strip_prefix("--") {
                Some(option) => {
                    let (key, value) = option.split_once('=').unwrap_or((option, "true"));
                    if key.is_empty() {
                        return Err(ScriptError::EmptyOption { line: command.line });
                    }
                    command.options.insert(key.to_string(), value.to_string());
                }
                None => command.positional.push(word),
            }
        }
        self.commands.push(command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ScriptError, parse_script};

    #[test]
    fn parses_options_and_positionals() {
        let commands = parse_script(r#"pip:run build --body="echo ok" --lock=a,b"#)
            .expect("script should parse");

        assert_eq!(commands.len(), 1);
        let command = &commands[0];
        assert_eq!(command.name, "pip:run");
        assert_eq!(command.positional, vec!["build"]);
        assert_eq!(command.options.get("body").map(String::as_str), Some("echo ok"));
        assert_eq!(command.options.get("lock").map(String::as_str), Some("a,b"));
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let commands = parse_script("# setup\n\n  pip:wait\npip:summary # trailing\n")
            .expect("script should parse");

        let names = commands.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["pip:wait", "pip:summary"]);
        assert_eq!(commands[0].line, 3);
        assert_eq!(commands[1].line, 4);
    }

    #[test]
    fn semicolons_split_outside_quotes_only() {
        let commands = parse_script("pip:run a --body='echo 1; echo 2'; pip:wait")
            .expect("script should parse");

        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[0].options.get("body").map(String::as_str),
            Some("echo 1; echo 2")
        );
    }

    #[test]
    fn double_quotes_keep_unknown_escapes() {
        let commands = parse_script(r#"pip:run a --body="printf \"%s\n\" x""#)
            .expect("script should parse");

        assert_eq!(
            commands[0].options.get("body").map(String::as_str),
            Some(r#"printf "%s\n" x"#)
        );
    }

    #[test]
    fn flag_without_value_is_true() {
        let commands = parse_script("cmd --verbose").expect("script should parse");
        assert_eq!(commands[0].options.get("verbose").map(String::as_str), Some("true"));
    }

    #[test]
    fn reports_unterminated_quote_line() {
        let error = parse_script("pip:wait\npip:run a --body='echo").expect_err("should fail");
        assert_eq!(error, ScriptError::UnterminatedQuote { line: 2, quote: '\'' });
    }

    #[test]
    fn rejects_nameless_option() {
        let error = parse_script("pip:run a --=x").expect_err("should fail");
        assert_eq!(error, ScriptError::EmptyOption { line: 1 });
    }
}

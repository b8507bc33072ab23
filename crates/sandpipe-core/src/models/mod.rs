pub mod error;
pub mod record;
pub mod task;

pub use error::{CoreError, CoreErrorKind, CoreResult, ScopeErrors};
pub use record::{LogRecord, SummaryRecord};
pub use task::{RunPhase, TaskOutcome, TaskState};

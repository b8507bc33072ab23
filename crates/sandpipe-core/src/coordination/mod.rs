//! Named barriers and named resource locks shared by concurrently
//! running tasks. Every suspension point here observes scope cancellation.

pub mod mutex;
pub mod waits;

pub use mutex::{ResourceGuard, SharedMutex};
pub use waits::{BarrierState, WaitManager};

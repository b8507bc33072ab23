use tokio::sync::watch;

use crate::models::{CoreError, CoreErrorKind, CoreResult};

/// Outstanding-work counter of a single scope.
#[derive(Debug)]
pub(crate) struct TaskCounter {
    outstanding: watch::Sender<usize>,
}

impl TaskCounter {
    pub(crate) fn new() -> Self {
        let (outstanding, _) = watch::channel(0);
        Self { outstanding }
    }

    pub(crate) fn add(&self, delta: usize) {
        self.outstanding
            .send_modify(|outstanding| *outstanding = outstanding.saturating_add(delta));
    }

    pub(crate) fn done(&self) -> CoreResult<()> {
        let mut underflow = false;
        self.outstanding.send_if_modified(|outstanding| {
            if *outstanding == 0 {
                underflow = true;
                false
            } else {
                *outstanding -= 1;
                true
            }
        });

        if underflow {
            return Err(CoreError::new(
                CoreErrorKind::Internal,
                "done_task called without an outstanding task",
            ));
        }
        Ok(())
    }

    pub(crate) fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    pub(crate) async fn idle(&self) {
        let mut receiver = self.outstanding.subscribe();
        let _ = receiver.wait_for(|outstanding| *outstanding == 0).await;
    }
}

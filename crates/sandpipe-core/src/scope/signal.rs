use tokio::sync::watch;

/// Cancellation flag owned by a root scope and shared by reference with
/// every descendant. Once set it never clears.
#[derive(Debug)]
pub(crate) struct CancelSignal {
    killed: watch::Sender<bool>,
}

impl CancelSignal {
    pub(crate) fn new() -> Self {
        let (killed, _) = watch::channel(false);
        Self { killed }
    }

    /// Returns `true` only for the call that flipped the flag.
    pub(crate) fn kill(&self) -> bool {
        self.killed.send_if_modified(|killed| {
            if *killed {
                false
            } else {
                *killed = true;
                true
            }
        })
    }

    pub(crate) fn is_killed(&self) -> bool {
        *self.killed.borrow()
    }

    pub(crate) async fn cancelled(&self) {
        let mut receiver = self.killed.subscribe();
        let _ = receiver.wait_for(|killed| *killed).await;
    }
}

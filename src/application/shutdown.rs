use tokio::sync::watch;

/// Receiving half of a stop request.
///
/// Cloned into every periodic task and retry loop; all clones observe the same
/// signal.
#[derive(Debug, Clone)]
pub struct StopSignal {
    receiver: Option<watch::Receiver<bool>>,
}

/// Sending half; dropping it does not stop anything.
#[derive(Debug)]
pub struct StopTrigger {
    sender: watch::Sender<bool>,
}

pub fn stop_channel() -> (StopTrigger, StopSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        StopTrigger { sender },
        StopSignal {
            receiver: Some(receiver),
        },
    )
}

impl StopTrigger {
    pub fn stop(&self) {
        self.sender.send_replace(true);
    }

    pub fn signal(&self) -> StopSignal {
        StopSignal {
            receiver: Some(self.sender.subscribe()),
        }
    }
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_stopped(&self) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|receiver| *receiver.borrow())
    }

    /// Completes once a stop has been requested.
    pub async fn stopped(&mut self) {
        let Some(receiver) = self.receiver.as_mut() else {
            return std::future::pending().await;
        };
        let closed = receiver.wait_for(|stopped| *stopped).await.is_err();
        if closed {
            // trigger dropped without stopping
            std::future::pending::<()>().await;
        }
    }
}

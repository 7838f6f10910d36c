use tokio::sync::watch;

/// Gate that opens once a sensor completed its first successful refresh.
pub struct StartedCheck {
    tx: watch::Sender<bool>,
}

impl Default for StartedCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl StartedCheck {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn started(&self) {
        self.tx.send_replace(true);
    }

    pub fn stopped(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_started(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so this only returns once started.
        let _ = rx.wait_for(|started| *started).await;
    }
}

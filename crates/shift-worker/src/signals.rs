//! Cooperative cancellation and pause signals handed to job handlers.

use std::sync::Arc;

use tokio::sync::watch;

pub use tokio_util::sync::CancellationToken;

/// Owning side of a pause gate, held in the execution context table.
#[derive(Debug, Clone)]
pub struct PauseSource {
    tx: Arc<watch::Sender<bool>>,
}

impl PauseSource {
    /// Create an open (not paused) gate.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Token observed by the handler.
    pub fn token(&self) -> PauseToken {
        PauseToken {
            rx: Some(self.tx.subscribe()),
        }
    }

    /// Close the gate. Returns `false` if it was already closed.
    pub fn pause(&self) -> bool {
        self.set(true)
    }

    /// Open the gate. Returns `false` if it was already open.
    pub fn resume(&self) -> bool {
        self.set(false)
    }

    /// Whether the gate is currently closed.
    pub fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }

    fn set(&self, paused: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == paused {
                false
            } else {
                *current = paused;
                true
            }
        })
    }
}

impl Default for PauseSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler side of a pause gate.
///
/// Handlers that do not declare pause support receive [`PauseToken::never`],
/// which is always open.
#[derive(Debug, Clone)]
pub struct PauseToken {
    rx: Option<watch::Receiver<bool>>,
}

impl PauseToken {
    /// A gate that never closes.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Whether the gate is currently closed.
    pub fn is_paused(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Wait until the gate is open. Returns immediately when it already is.
    pub async fn wait_while_paused(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            // A dropped source can never close the gate again.
            let _ = rx.wait_for(|paused| !*paused).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_pause_is_idempotent() {
        let source = PauseSource::new();
        assert!(source.pause());
        assert!(!source.pause());
        assert!(source.is_paused());
        assert!(source.resume());
        assert!(!source.resume());
    }

    #[tokio::test]
    async fn test_never_token_is_open() {
        let mut token = PauseToken::never();
        assert!(!token.is_paused());
        token.wait_while_paused().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_releases_on_resume() {
        let source = PauseSource::new();
        let mut token = source.token();
        source.pause();
        assert!(token.is_paused());

        let waiter = tokio::spawn(async move {
            token.wait_while_paused().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        source.resume();
        waiter.await.unwrap();
    }
}

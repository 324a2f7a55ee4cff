use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fixed-duration window during which the session keeps processing messages.
///
/// Closing happens either when the duration elapses or when the token is
/// cancelled early (Ctrl-C). Either way the token ends up cancelled, which is
/// what the session tasks listen on.
#[derive(Clone, Debug)]
pub struct RunWindow {
    duration: Duration,
    token: CancellationToken,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowClose {
    Elapsed,
    Cancelled,
}

impl RunWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn wait(&self) -> WindowClose {
        info!("Running for {}s before disconnecting", self.duration.as_secs());
        let close = tokio::select! {
            _ = tokio::time::sleep(self.duration) => WindowClose::Elapsed,
            _ = self.token.cancelled() => WindowClose::Cancelled,
        };
        debug!("Run window closed: {:?}", close);
        self.token.cancel();
        close
    }
}

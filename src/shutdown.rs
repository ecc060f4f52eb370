//! Process-wide shutdown signal.
//!
//! Every exit path (stop command, SIGINT/SIGTERM, stdin EOF, stream
//! replacement, a finished one-shot command) requests shutdown here; the
//! daemon waits on it and runs the single teardown sequence.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopCommand,
    Signal,
    StreamReplaced,
    StdinClosed,
    OneShotComplete,
    /// Unrecoverable error; exits non-zero.
    Fatal,
}

impl ExitReason {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Fatal => 1,
            _ => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StopCommand => "stop command",
            Self::Signal => "signal",
            Self::StreamReplaced => "stream replaced",
            Self::StdinClosed => "stdin closed",
            Self::OneShotComplete => "command complete",
            Self::Fatal => "fatal error",
        }
    }
}

#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    reason: Arc<Mutex<Option<ExitReason>>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. The first reason wins.
    pub fn request(&self, reason: ExitReason) {
        {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                tracing::info!("Shutdown requested: {}", reason.as_str());
                *slot = Some(reason);
            }
        }
        self.token.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ExitReason> {
        *self.reason.lock()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves once shutdown has been requested, returning the reason.
    pub async fn wait(&self) -> ExitReason {
        self.token.cancelled().await;
        self.reason().unwrap_or(ExitReason::Signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_reason_wins() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_requested());
        shutdown.request(ExitReason::StreamReplaced);
        shutdown.request(ExitReason::Signal);
        assert_eq!(shutdown.wait().await, ExitReason::StreamReplaced);
    }

    #[tokio::test]
    async fn clones_share_the_signal() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        let waiter = tokio::spawn(async move { clone.wait().await });
        shutdown.request(ExitReason::StopCommand);
        assert_eq!(waiter.await.unwrap(), ExitReason::StopCommand);
    }

    #[test]
    fn only_fatal_exits_non_zero() {
        assert_eq!(ExitReason::StopCommand.exit_code(), 0);
        assert_eq!(ExitReason::StreamReplaced.exit_code(), 0);
        assert_eq!(ExitReason::Fatal.exit_code(), 1);
    }
}

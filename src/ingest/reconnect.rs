//! Bounded reconnect wrapper around any `FrameSource`.

use std::time::Duration;

use super::{FrameSource, IngestError, SourceStats};
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive reconnects tried before a failure is surfaced.
    pub attempts: u32,
    pub backoff: Duration,
}

/// Retries transient failures by reconnecting the inner source.
///
/// `StreamEnded` and unsupported-source errors pass straight through. The
/// attempt budget applies to consecutive failures and is restored by the next
/// delivered frame.
pub struct ReconnectingSource<S> {
    inner: S,
    policy: ReconnectPolicy,
    reconnects: u64,
}

impl<S: FrameSource> ReconnectingSource<S> {
    pub fn new(inner: S, policy: ReconnectPolicy) -> Self {
        Self {
            inner,
            policy,
            reconnects: 0,
        }
    }

    /// Total successful reconnects over the source's lifetime.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: FrameSource> FrameSource for ReconnectingSource<S> {
    fn connect(&mut self) -> Result<(), IngestError> {
        self.inner.connect()
    }

    fn next_frame(&mut self) -> Result<Frame, IngestError> {
        let mut attempt = 0u32;
        loop {
            let err = match self.inner.next_frame() {
                Ok(frame) => return Ok(frame),
                Err(err) => err,
            };
            if !err.is_transient() || attempt >= self.policy.attempts {
                return Err(err);
            }
            attempt += 1;
            log::warn!(
                "{}: {} (reconnect {}/{})",
                self.inner.stats().source,
                err,
                attempt,
                self.policy.attempts
            );
            std::thread::sleep(self.policy.backoff);
            match self.inner.connect() {
                Ok(()) => self.reconnects += 1,
                Err(e) if e.is_transient() => log::warn!("reconnect failed: {}", e),
                Err(e) => return Err(e),
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }

    fn stats(&self) -> SourceStats {
        self.inner.stats()
    }
}

//! Wait primitives
//!
//! The only sanctioned blocking points for workflows. Each wait watches the
//! session's own event stream, re-checks its condition at least once per
//! poll interval, and fails with a distinguishable timeout or cancellation
//! error. Cancellation is cooperative and observed at the next tick.

use super::{MachineSession, MachineState};
use pcbmill_core::{ActiveState, ControllerError, Error, Result, SessionEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::debug;

/// Caller-owned cancellation flag checked by wait primitives
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a lowered flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Lower the flag again for reuse
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Check if the flag is raised
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn timeout_error(waiting_for: &str, timeout: Duration) -> Error {
    ControllerError::Timeout {
        waiting_for: waiting_for.to_string(),
        timeout_ms: timeout.as_millis() as u64,
    }
    .into()
}

fn cancelled_error(waiting_for: &str) -> Error {
    ControllerError::Cancelled {
        waiting_for: waiting_for.to_string(),
    }
    .into()
}

impl MachineSession {
    /// Wait until `predicate` holds for the machine state
    ///
    /// Returns the snapshot that satisfied the predicate. Fails when
    /// `cancel` is raised, the session disconnects, or `timeout` elapses.
    pub async fn until_true<F>(
        &self,
        waiting_for: &str,
        mut predicate: F,
        cancel: Option<&CancelFlag>,
        timeout: Duration,
    ) -> Result<MachineState>
    where
        F: FnMut(&MachineState) -> bool,
    {
        // Subscribe before the first check so no change slips in between
        let mut rx = self.inner.bus.receiver();
        let deadline = Instant::now() + timeout;

        loop {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(cancelled_error(waiting_for));
            }
            if !self.is_connected() {
                return Err(ControllerError::NotConnected.into());
            }

            let snapshot = self.state();
            if predicate(&snapshot) {
                return Ok(snapshot);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(timeout_error(waiting_for, timeout));
            }
            let tick = (deadline - now).min(self.inner.config.poll_interval);
            match tokio::time::timeout(tick, rx.recv()).await {
                Ok(Ok(_)) | Err(_) => {}
                Ok(Err(RecvError::Lagged(skipped))) => {
                    debug!("Wait for {} skipped {} events", waiting_for, skipped);
                }
                Ok(Err(RecvError::Closed)) => {
                    return Err(ControllerError::NotConnected.into());
                }
            }
        }
    }

    /// Wait until the effective active state satisfies `predicate`
    pub async fn until_state<F>(&self, predicate: F, timeout: Duration) -> Result<ActiveState>
    where
        F: Fn(ActiveState) -> bool,
    {
        let snapshot = self
            .until_true(
                "controller state",
                |s| s.active_state().is_some_and(&predicate),
                None,
                timeout,
            )
            .await?;
        snapshot
            .active_state()
            .ok_or_else(|| ControllerError::NotConnected.into())
    }

    /// Wait until the effective active state equals `state`
    pub async fn until_state_is(&self, state: ActiveState, timeout: Duration) -> Result<()> {
        self.until_true(
            &format!("state {}", state),
            |s| s.is(state),
            None,
            timeout,
        )
        .await
        .map(|_| ())
    }

    /// Wait for a data line matching `predicate`
    ///
    /// Only lines arriving after the call are considered.
    pub async fn until_data<F>(&self, mut predicate: F, timeout: Duration) -> Result<String>
    where
        F: FnMut(&str) -> bool,
    {
        let mut rx = self.inner.bus.receiver();
        self.next_event(
            &mut rx,
            "data line",
            |event| match event {
                SessionEvent::Data(line) if predicate(line) => Some(Ok(line.clone())),
                _ => None,
            },
            None,
            timeout,
        )
        .await
    }

    /// Wait until the feeder is empty and the controller is idle
    pub async fn wait_for_gcode_complete(
        &self,
        timeout: Duration,
        cancel: Option<&CancelFlag>,
    ) -> Result<()> {
        self.until_true(
            "G-code completion",
            |s| !s.feeder_pending && !s.is_preliminary() && s.is(ActiveState::Idle),
            cancel,
            timeout,
        )
        .await
        .map(|_| ())
    }

    /// Drive `rx` until `select` yields a result
    ///
    /// `rx` must have been created before whatever command provokes the
    /// awaited event was issued.
    pub(crate) async fn next_event<T, F>(
        &self,
        rx: &mut broadcast::Receiver<SessionEvent>,
        waiting_for: &str,
        mut select: F,
        cancel: Option<&CancelFlag>,
        timeout: Duration,
    ) -> Result<T>
    where
        F: FnMut(&SessionEvent) -> Option<Result<T>>,
    {
        let deadline = Instant::now() + timeout;

        loop {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(cancelled_error(waiting_for));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(timeout_error(waiting_for, timeout));
            }
            let tick = (deadline - now).min(self.inner.config.poll_interval);
            match tokio::time::timeout(tick, rx.recv()).await {
                Ok(Ok(SessionEvent::Disconnected { .. })) => {
                    return Err(ControllerError::NotConnected.into());
                }
                Ok(Ok(event)) => {
                    if let Some(result) = select(&event) {
                        return result;
                    }
                }
                Err(_) => {
                    if !self.is_connected() {
                        return Err(ControllerError::NotConnected.into());
                    }
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    debug!("Wait for {} skipped {} events", waiting_for, skipped);
                }
                Ok(Err(RecvError::Closed)) => {
                    return Err(ControllerError::NotConnected.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());

        flag.cancel();
        assert!(other.is_cancelled());

        other.reset();
        assert!(!flag.is_cancelled());
    }
}

//! Session-owned machine state
//!
//! Only event normalization inside the session mutates these values;
//! callers receive cloned snapshots.

use chrono::{DateTime, Utc};
use pcbmill_core::{ActiveState, Position, ProbeResult, SenderStatus, WorkflowState};
use serde::Serialize;

/// Where a pending local override came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverrideSource {
    /// Set the instant a command was issued (`home`, `reset`)
    Command,
    /// Derived from a data line (`ALARM:`)
    DataLine,
}

/// Local state assumed ahead of controller confirmation
///
/// Superseded by the next controller-state report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingOverride {
    /// Assumed active state
    pub state: ActiveState,
    /// Why it was assumed
    pub source: OverrideSource,
}

/// Snapshot of the machine as seen by the session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineState {
    /// Last state confirmed by a controller-state report, `None` until the first one
    pub reported_state: Option<ActiveState>,
    /// Local override awaiting confirmation
    pub pending: Option<PendingOverride>,
    /// Machine position
    pub mpos: Position,
    /// Work position
    pub wpos: Position,
    /// Spindle speed in RPM
    pub spindle_speed: f64,
    /// Bridge workflow state
    pub workflow: WorkflowState,
    /// Loaded program size in bytes
    pub sender_size: u64,
    /// Completion time of the loaded program
    pub sender_finish_time: Option<DateTime<Utc>>,
    /// Derived sender lifecycle
    pub sender_status: SenderStatus,
    /// Feeder has queued or in-flight commands
    pub feeder_pending: bool,
    /// Last probe result seen on the data stream
    pub last_probe: Option<ProbeResult>,
}

impl MachineState {
    /// Effective active state: the pending override if any, else the reported state
    pub fn active_state(&self) -> Option<ActiveState> {
        self.pending
            .map(|p| p.state)
            .or(self.reported_state)
    }

    /// True while the effective state rests on an unconfirmed override
    pub fn is_preliminary(&self) -> bool {
        self.pending.is_some()
    }

    /// Check the effective state against `state`
    pub fn is(&self, state: ActiveState) -> bool {
        self.active_state() == Some(state)
    }

    /// Recompute [`Self::sender_status`] from workflow and sender metadata
    pub fn refresh_sender_status(&mut self) -> SenderStatus {
        self.sender_status = derive_sender_status(
            self.workflow,
            self.sender_size,
            self.sender_finish_time.is_some(),
        );
        self.sender_status
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self {
            reported_state: None,
            pending: None,
            mpos: Position::default(),
            wpos: Position::default(),
            spindle_speed: 0.0,
            workflow: WorkflowState::Idle,
            sender_size: 0,
            sender_finish_time: None,
            sender_status: SenderStatus::Empty,
            feeder_pending: false,
            last_probe: None,
        }
    }
}

/// Derive the sender lifecycle from workflow state and sender metadata
pub fn derive_sender_status(workflow: WorkflowState, size: u64, finished: bool) -> SenderStatus {
    match workflow {
        WorkflowState::Running => SenderStatus::Running,
        WorkflowState::Paused => SenderStatus::Paused,
        WorkflowState::Idle if size == 0 => SenderStatus::Empty,
        WorkflowState::Idle if finished => SenderStatus::Done,
        WorkflowState::Idle => SenderStatus::Loaded,
    }
}

/// Typed "changed since last" comparison for polled values
pub trait ChangeDetect {
    /// True when `self` should be reported as different from `previous`
    fn differs_from(&self, previous: &Self) -> bool;
}

impl ChangeDetect for bool {
    fn differs_from(&self, previous: &Self) -> bool {
        self != previous
    }
}

impl ChangeDetect for f64 {
    fn differs_from(&self, previous: &Self) -> bool {
        (self - previous).abs() > f64::EPSILON
    }
}

/// Machine and work position pair as reported together
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionChange {
    /// Machine position
    pub mpos: Position,
    /// Work position
    pub wpos: Position,
}

impl PositionChange {
    /// Axis differences below this are reporting noise (mm)
    pub const TOLERANCE: f64 = 1e-6;
}

impl ChangeDetect for PositionChange {
    fn differs_from(&self, previous: &Self) -> bool {
        let axis = |a: &Position, b: &Position| {
            (a.x - b.x).abs() > Self::TOLERANCE
                || (a.y - b.y).abs() > Self::TOLERANCE
                || (a.z - b.z).abs() > Self::TOLERANCE
        };
        axis(&self.mpos, &previous.mpos) || axis(&self.wpos, &previous.wpos)
    }
}

/// Holds the last reported value of one polled quantity
#[derive(Debug, Clone, Default)]
pub struct Tracked<T> {
    last: Option<T>,
}

impl<T: ChangeDetect + Clone> Tracked<T> {
    /// Record `value`, returning true when it should be re-emitted
    pub fn update(&mut self, value: T) -> bool {
        let changed = match &self.last {
            Some(previous) => value.differs_from(previous),
            None => true,
        };
        if changed {
            self.last = Some(value);
        }
        changed
    }

    /// Forget the last value so the next update always reports
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Last reported value
    pub fn get(&self) -> Option<&T> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_status_derivation() {
        assert_eq!(
            derive_sender_status(WorkflowState::Idle, 0, false),
            SenderStatus::Empty
        );
        assert_eq!(
            derive_sender_status(WorkflowState::Idle, 120, true),
            SenderStatus::Done
        );
        assert_eq!(
            derive_sender_status(WorkflowState::Idle, 120, false),
            SenderStatus::Loaded
        );
        assert_eq!(
            derive_sender_status(WorkflowState::Running, 0, false),
            SenderStatus::Running
        );
        assert_eq!(
            derive_sender_status(WorkflowState::Running, 500, true),
            SenderStatus::Running
        );
        assert_eq!(
            derive_sender_status(WorkflowState::Paused, 500, false),
            SenderStatus::Paused
        );
    }

    #[test]
    fn test_pending_override_wins_until_cleared() {
        let mut state = MachineState {
            reported_state: Some(ActiveState::Idle),
            ..Default::default()
        };
        assert_eq!(state.active_state(), Some(ActiveState::Idle));
        assert!(!state.is_preliminary());

        state.pending = Some(PendingOverride {
            state: ActiveState::Home,
            source: OverrideSource::Command,
        });
        assert!(state.is(ActiveState::Home));
        assert!(state.is_preliminary());

        state.pending = None;
        assert!(state.is(ActiveState::Idle));
    }

    #[test]
    fn test_tracked_position_change() {
        let mut tracked = Tracked::default();
        let a = PositionChange {
            mpos: Position::new(1.0, 2.0, 3.0),
            wpos: Position::new(0.0, 0.0, 0.0),
        };
        assert!(tracked.update(a));
        assert!(!tracked.update(a));

        let mut noisy = a;
        noisy.mpos.x += 1e-9;
        assert!(!tracked.update(noisy));

        let mut moved = a;
        moved.wpos.z = -0.1;
        assert!(tracked.update(moved));
        assert_eq!(tracked.get(), Some(&moved));

        tracked.reset();
        assert!(tracked.update(moved));
    }

    #[test]
    fn test_tracked_bool() {
        let mut tracked = Tracked::default();
        assert!(tracked.update(false));
        assert!(!tracked.update(false));
        assert!(tracked.update(true));
    }
}

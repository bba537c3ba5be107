//! High-level controller commands

use super::{CancelFlag, MachineSession};
use crate::bridge::BridgeCommand;
use pcbmill_core::{
    ActiveState, ControllerError, ProbeResult, Result, SessionEvent, WorkCoordinateSystem,
};
use std::time::Duration;
use tracing::{debug, info, warn};

fn invalid(name: &str, reason: impl Into<String>) -> pcbmill_core::Error {
    ControllerError::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    }
    .into()
}

/// Build a rapid positioning line
///
/// At least one axis must be given.
pub fn goto_command(
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
    wcs: WorkCoordinateSystem,
) -> Result<String> {
    let selector = wcs
        .gcode()
        .ok_or_else(|| invalid("wcs", format!("{:?} is not a valid coordinate system", wcs)))?;

    let mut words = Vec::new();
    for (axis, value) in [('X', x), ('Y', y), ('Z', z)] {
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(invalid("position", format!("{} is not finite", axis)));
            }
            words.push(format!("{}{:.3}", axis, v));
        }
    }
    if words.is_empty() {
        return Err(invalid("position", "no axis given"));
    }

    Ok(format!("G90 {} G0 {}", selector, words.join(" ")))
}

/// Build a `G10 L20` line zeroing `axes` in `wcs`
pub fn work_zero_command(axes: &str, wcs: WorkCoordinateSystem) -> Result<String> {
    let p = wcs
        .p_index()
        .ok_or_else(|| invalid("wcs", "work zero needs a work coordinate system"))?;

    let mut words = Vec::new();
    for axis in axes.chars().map(|c| c.to_ascii_uppercase()) {
        if !matches!(axis, 'X' | 'Y' | 'Z') {
            return Err(invalid("axes", format!("unknown axis '{}'", axis)));
        }
        let word = format!("{}0", axis);
        if !words.contains(&word) {
            words.push(word);
        }
    }
    if words.is_empty() {
        return Err(invalid("axes", "no axis given"));
    }

    Ok(format!("G10 L20 P{} {}", p, words.join(" ")))
}

/// Build the relative `G38.2` probe lines
pub fn probe_z_commands(depth: f64, feed: f64) -> Result<Vec<String>> {
    if !(depth.is_finite() && depth > 0.0) {
        return Err(invalid("depth", "must be a positive distance"));
    }
    if !(feed.is_finite() && feed > 0.0) {
        return Err(invalid("feed", "must be positive"));
    }
    Ok(vec![
        format!("G91 G38.2 Z-{:.3} F{}", depth, feed),
        "G90".to_string(),
    ])
}

impl MachineSession {
    /// Run the homing cycle
    ///
    /// The state reads `Home` from the moment the command is issued.
    pub async fn home(&self) -> Result<()> {
        info!("Homing");
        self.apply_override(ActiveState::Home);
        self.send(BridgeCommand::Homing).await
    }

    /// Soft-reset the controller
    ///
    /// The state reads `Resetting` until the controller reports again.
    pub async fn reset(&self) -> Result<()> {
        info!("Resetting controller");
        self.apply_override(ActiveState::Resetting);
        {
            let mut st = self.inner.state.write();
            st.jogging = false;
            st.jog_ack_pending = false;
        }
        self.send(BridgeCommand::Reset).await
    }

    /// Clear an alarm lock
    pub async fn unlock(&self) -> Result<()> {
        self.send(BridgeCommand::Unlock).await
    }

    /// Ask the controller for a status report
    pub async fn status_report(&self) -> Result<()> {
        self.send(BridgeCommand::StatusReport).await
    }

    /// Feed hold
    pub async fn hold(&self) -> Result<()> {
        self.send(BridgeCommand::FeedHold).await
    }

    /// Cycle start, releasing a hold
    pub async fn resume(&self) -> Result<()> {
        self.send(BridgeCommand::CycleStart).await
    }

    /// Queue G-code lines on the feeder
    pub async fn send_gcode<S: AsRef<str>>(&self, lines: &[S]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        // Pending from this instant; the bridge confirms once it drains
        self.set_feeder_pending(true);
        self.send(BridgeCommand::gcode_lines(lines)).await
    }

    /// Rapid to a position in a work coordinate system
    pub async fn goto(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        wcs: WorkCoordinateSystem,
    ) -> Result<()> {
        let line = goto_command(x, y, z, wcs)?;
        self.send_gcode(&[line]).await
    }

    /// Rapid to a position in machine coordinates (`G53`)
    pub async fn goto_machine(&self, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Result<()> {
        self.goto(x, y, z, WorkCoordinateSystem::Machine).await
    }

    /// Make the current position zero for `axes` (e.g. `"XY"`) in `wcs`
    pub async fn set_work_zero(&self, axes: &str, wcs: WorkCoordinateSystem) -> Result<()> {
        let line = work_zero_command(axes, wcs)?;
        self.send_gcode(&[line]).await
    }

    /// Probe down by at most `depth` mm at `feed` mm/min
    ///
    /// Resolves with the `[PRB:]` result; a cycle that ends without a touch,
    /// or raises an alarm, is an error.
    pub async fn probe_z(&self, depth: f64, feed: f64) -> Result<ProbeResult> {
        let lines = probe_z_commands(depth, feed)?;
        let mut rx = self.inner.bus.receiver();
        self.send_gcode(&lines).await?;

        let result = self
            .next_event(
                &mut rx,
                "probe result",
                |event| match event {
                    SessionEvent::Probe(result) if result.ok => Some(Ok(*result)),
                    SessionEvent::Probe(_) => Some(Err(ControllerError::ProbeFailed {
                        reason: format!("no contact within {:.3}mm", depth),
                    }
                    .into())),
                    SessionEvent::Alarm { code, message } => Some(Err(ControllerError::Alarm {
                        code: *code,
                        message: message.clone(),
                    }
                    .into())),
                    _ => None,
                },
                None,
                self.inner.config.probe_timeout,
            )
            .await?;

        debug!("Probe touched at Z {:.3}", result.z);
        Ok(result)
    }

    /// Load a program into the bulk sender
    pub async fn load_gcode(&self, name: &str, gcode: &str) -> Result<()> {
        self.send(BridgeCommand::GcodeLoad {
            name: name.to_string(),
            gcode: gcode.to_string(),
        })
        .await
    }

    /// Unload the sender program
    pub async fn unload_gcode(&self) -> Result<()> {
        self.send(BridgeCommand::GcodeUnload).await
    }

    /// Start streaming the loaded program
    pub async fn start_job(&self) -> Result<()> {
        self.send(BridgeCommand::GcodeStart).await
    }

    /// Pause streaming
    pub async fn pause_job(&self) -> Result<()> {
        self.send(BridgeCommand::GcodePause).await
    }

    /// Resume a paused stream
    pub async fn resume_job(&self) -> Result<()> {
        self.send(BridgeCommand::GcodeResume).await
    }

    /// Stop streaming; `force` also resets the controller
    pub async fn stop_job(&self, force: bool) -> Result<()> {
        self.send(BridgeCommand::GcodeStop { force }).await
    }

    /// Drop everything queued on the feeder and recover from the hold
    ///
    /// Hold, wait for `Hold`, stop the feeder, wait for the transport to
    /// drain, restart the feeder, wait to leave `Hold`. A failed step aborts
    /// the sequence.
    pub async fn feeder_reset(&self, cancel: Option<&CancelFlag>) -> Result<()> {
        let timeout = self.inner.config.feeder_reset_timeout;
        let step_error = |step: &'static str, e: pcbmill_core::Error| -> pcbmill_core::Error {
            warn!("Feeder reset failed at {}: {}", step, e);
            ControllerError::FeederReset {
                step,
                source: Box::new(e),
            }
            .into()
        };

        info!("Resetting feeder");
        self.hold().await.map_err(|e| step_error("hold", e))?;

        self.until_true("hold", |s| s.is(ActiveState::Hold), cancel, timeout)
            .await
            .map_err(|e| step_error("wait for hold", e))?;

        self.send(BridgeCommand::FeederStop)
            .await
            .map_err(|e| step_error("stop feeder", e))?;
        self.set_feeder_pending(false);

        let transport = self
            .transport()
            .map_err(|e| step_error("drain", e))?;
        match tokio::time::timeout(timeout, transport.drain()).await {
            Ok(result) => result.map_err(|e| step_error("drain", e))?,
            Err(_) => {
                return Err(step_error(
                    "drain",
                    ControllerError::Timeout {
                        waiting_for: "transport drain".to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    }
                    .into(),
                ))
            }
        }

        self.send(BridgeCommand::FeederStart)
            .await
            .map_err(|e| step_error("start feeder", e))?;

        self.until_true(
            "release from hold",
            |s| s.active_state().is_some_and(|a| a != ActiveState::Hold),
            cancel,
            timeout,
        )
        .await
        .map_err(|e| step_error("wait for release", e))?;

        info!("Feeder reset complete");
        Ok(())
    }

    /// Send lines and wait for the feeder to finish them
    pub async fn run_gcode<S: AsRef<str>>(
        &self,
        lines: &[S],
        timeout: Duration,
        cancel: Option<&CancelFlag>,
    ) -> Result<()> {
        self.send_gcode(lines).await?;
        self.wait_for_gcode_complete(timeout, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goto_command() {
        assert_eq!(
            goto_command(Some(10.0), Some(5.0), None, WorkCoordinateSystem::DEFAULT).unwrap(),
            "G90 G54 G0 X10.000 Y5.000"
        );
        assert_eq!(
            goto_command(None, None, Some(-1.25), WorkCoordinateSystem::Machine).unwrap(),
            "G90 G53 G0 Z-1.250"
        );
        assert_eq!(
            goto_command(Some(1.0), None, None, WorkCoordinateSystem::Work(3)).unwrap(),
            "G90 G56 G0 X1.000"
        );
    }

    #[test]
    fn test_goto_command_rejects_bad_input() {
        assert!(goto_command(None, None, None, WorkCoordinateSystem::DEFAULT).is_err());
        assert!(goto_command(Some(1.0), None, None, WorkCoordinateSystem::Work(7)).is_err());
        assert!(goto_command(Some(f64::NAN), None, None, WorkCoordinateSystem::DEFAULT).is_err());
    }

    #[test]
    fn test_work_zero_command() {
        assert_eq!(
            work_zero_command("xy", WorkCoordinateSystem::DEFAULT).unwrap(),
            "G10 L20 P1 X0 Y0"
        );
        assert_eq!(
            work_zero_command("ZZ", WorkCoordinateSystem::Work(2)).unwrap(),
            "G10 L20 P2 Z0"
        );
        assert!(work_zero_command("XA", WorkCoordinateSystem::DEFAULT).is_err());
        assert!(work_zero_command("X", WorkCoordinateSystem::Machine).is_err());
    }

    #[test]
    fn test_probe_commands() {
        assert_eq!(
            probe_z_commands(5.0, 100.0).unwrap(),
            vec!["G91 G38.2 Z-5.000 F100".to_string(), "G90".to_string()]
        );
        assert!(probe_z_commands(0.0, 100.0).is_err());
        assert!(probe_z_commands(5.0, -1.0).is_err());
    }
}

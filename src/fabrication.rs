//! Fabrication workflows
//!
//! Sequences built on top of [`MachineSession`]: stock alignment, surface
//! probing and drilling. Workflows serialize their own controller traffic;
//! nothing here runs concurrently with another workflow on the same session.
//!
//! Every sequence that moves the tool below the safe height retracts to it
//! before returning an error, including cancellation.

use pcbmill_camtools::{deskew, DeskewResult, Hole, Point};
use pcbmill_communication::{CancelFlag, MachineSession};
use pcbmill_core::{ControllerError, Result, WorkCoordinateSystem};
use pcbmill_settings::MachineSettings;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One probed surface sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SurfacePoint {
    /// Work X
    pub x: f64,
    /// Work Y
    pub y: f64,
    /// Machine Z at contact
    pub z: f64,
}

/// Drilling cycle parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrillParams {
    /// Depth below work zero, mm
    pub depth: f64,
    /// Plunge feed, mm/min
    pub plunge_feed: f64,
}

impl Default for DrillParams {
    fn default() -> Self {
        Self {
            depth: 1.8,
            plunge_feed: 60.0,
        }
    }
}

impl DrillParams {
    fn validate(&self) -> Result<()> {
        if !(self.depth.is_finite() && self.depth > 0.0) {
            return Err(ControllerError::InvalidParameter {
                name: "depth".to_string(),
                reason: "must be a positive distance".to_string(),
            }
            .into());
        }
        if !(self.plunge_feed.is_finite() && self.plunge_feed > 0.0) {
            return Err(ControllerError::InvalidParameter {
                name: "plunge_feed".to_string(),
                reason: "must be positive".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Outcome of a completed drilling run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrillReport {
    /// Holes drilled
    pub drilled: usize,
    /// Holes requested
    pub total: usize,
}

/// Runs fabrication sequences on one machine session
pub struct FabricationOrchestrator {
    session: MachineSession,
    safe_z: f64,
    probe_depth: f64,
    probe_feed: f64,
    wcs: WorkCoordinateSystem,
    move_timeout: Duration,
}

impl FabricationOrchestrator {
    /// Create an orchestrator using the machine section of the configuration
    pub fn new(session: MachineSession, machine: &MachineSettings) -> Self {
        Self {
            session,
            safe_z: machine.safe_z,
            probe_depth: machine.probe_depth,
            probe_feed: machine.probe_feed,
            wcs: WorkCoordinateSystem::DEFAULT,
            move_timeout: Duration::from_millis(machine.state_timeout_ms),
        }
    }

    /// Work in `wcs` instead of `G54`
    pub fn with_wcs(mut self, wcs: WorkCoordinateSystem) -> Self {
        self.wcs = wcs;
        self
    }

    /// Deadline for each move to complete
    pub fn with_move_timeout(mut self, timeout: Duration) -> Self {
        self.move_timeout = timeout;
        self
    }

    /// The underlying session
    pub fn session(&self) -> &MachineSession {
        &self.session
    }

    /// Current work XY, used to capture a measured alignment point
    pub fn current_point(&self) -> Point {
        let wpos = self.session.state().wpos;
        Point::new(wpos.x, wpos.y)
    }

    /// Solve the correction mapping two artwork points onto their measured
    /// positions on the stock
    pub fn measure_deskew(
        &self,
        nominal_a: Point,
        nominal_b: Point,
        actual_a: Point,
        actual_b: Point,
    ) -> Result<DeskewResult> {
        let result = deskew(nominal_a, nominal_b, actual_a, actual_b)?;
        info!(
            "Deskew: rotation {:.4} deg, offset {}",
            result.rotation.to_degrees(),
            result.offset
        );
        Ok(result)
    }

    /// Rapid to the safe height and wait for the move to finish
    pub async fn safe_height(&self) -> Result<()> {
        self.session
            .goto(None, None, Some(self.safe_z), self.wcs)
            .await?;
        self.session
            .wait_for_gcode_complete(self.move_timeout, None)
            .await
    }

    /// Probe the surface height at each point
    pub async fn probe_surface(
        &self,
        points: &[Point],
        cancel: &CancelFlag,
    ) -> Result<Vec<SurfacePoint>> {
        info!("Probing {} surface points", points.len());
        let result = self.probe_points(points, cancel).await;
        self.finish("probing", result).await
    }

    async fn probe_points(&self, points: &[Point], cancel: &CancelFlag) -> Result<Vec<SurfacePoint>> {
        let mut samples = Vec::with_capacity(points.len());
        for point in points {
            check_cancel(cancel, "surface probing")?;
            self.travel_to(*point, cancel).await?;
            let touch = self.session.probe_z(self.probe_depth, self.probe_feed).await?;
            debug!("Surface at {}: Z {:.3}", point, touch.z);
            samples.push(SurfacePoint {
                x: point.x,
                y: point.y,
                z: touch.z,
            });
        }
        self.safe_height().await?;
        Ok(samples)
    }

    /// Drill every hole: travel at safe height, plunge, retract
    ///
    /// The cancel flag is checked before each hole.
    pub async fn drill_holes(
        &self,
        holes: &[Hole],
        params: &DrillParams,
        cancel: &CancelFlag,
    ) -> Result<DrillReport> {
        params.validate()?;
        info!("Drilling {} holes to {:.3}mm", holes.len(), params.depth);
        let result = self.drill_each(holes, params, cancel).await;
        self.finish("drilling", result).await
    }

    async fn drill_each(
        &self,
        holes: &[Hole],
        params: &DrillParams,
        cancel: &CancelFlag,
    ) -> Result<DrillReport> {
        let mut report = DrillReport {
            drilled: 0,
            total: holes.len(),
        };
        for hole in holes {
            check_cancel(cancel, "drilling")?;
            self.travel_to(hole.coord, cancel).await?;

            let plunge = [
                format!("G90 G1 Z{:.3} F{}", -params.depth, params.plunge_feed),
                format!("G0 Z{:.3}", self.safe_z),
            ];
            self.session.send_gcode(&plunge).await?;
            self.session
                .wait_for_gcode_complete(self.move_timeout, Some(cancel))
                .await?;

            report.drilled += 1;
            debug!("Drilled {}/{} at {}", report.drilled, report.total, hole.coord);
        }
        Ok(report)
    }

    async fn travel_to(&self, point: Point, cancel: &CancelFlag) -> Result<()> {
        self.session
            .goto(None, None, Some(self.safe_z), self.wcs)
            .await?;
        self.session
            .goto(Some(point.x), Some(point.y), None, self.wcs)
            .await?;
        self.session
            .wait_for_gcode_complete(self.move_timeout, Some(cancel))
            .await
    }

    /// Retract after a failed sequence, keeping the original error
    async fn finish<T>(&self, sequence: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!("Stopping {}: {}", sequence, e);
            if let Err(retract) = self.safe_height().await {
                warn!("Could not retract to safe height: {}", retract);
            }
        }
        result
    }
}

fn check_cancel(cancel: &CancelFlag, waiting_for: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ControllerError::Cancelled {
            waiting_for: waiting_for.to_string(),
        }
        .into());
    }
    Ok(())
}

use async_trait::async_trait;
use parking_lot::Mutex;
use pcbmill::camtools::{Hole, Point};
use pcbmill::communication::{BridgeCommand, BridgeEvent, CancelFlag, MachineSession, Transport};
use pcbmill::settings::MachineSettings;
use pcbmill::{session_config_from, ControllerError, DrillParams, Error, FabricationOrchestrator, Position};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// Records issued commands and forwards them to the scripted controller
struct MockTransport {
    sent: Arc<Mutex<Vec<BridgeCommand>>>,
    notify: mpsc::UnboundedSender<BridgeCommand>,
}

#[async_trait]
impl Transport for MockTransport {
    fn describe(&self) -> String {
        "mock".to_string()
    }

    async fn send(&self, command: BridgeCommand) -> pcbmill::Result<()> {
        self.sent.lock().push(command.clone());
        let _ = self.notify.send(command);
        Ok(())
    }

    async fn drain(&self) -> pcbmill::Result<()> {
        Ok(())
    }

    async fn close(&self) -> pcbmill::Result<()> {
        Ok(())
    }
}

fn report(state: &str) -> BridgeEvent {
    BridgeEvent::ControllerState {
        active_state: state.to_string(),
        mpos: Position::new(0.0, 0.0, 0.0),
        wpos: Position::new(0.0, 0.0, 0.0),
        spindle: None,
    }
}

fn data(line: &str) -> BridgeEvent {
    BridgeEvent::SerialData {
        line: line.to_string(),
    }
}

fn gcode_lines(sent: &Mutex<Vec<BridgeCommand>>) -> Vec<String> {
    sent.lock()
        .iter()
        .filter_map(|c| match c {
            BridgeCommand::Gcode(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

struct Rig {
    orchestrator: FabricationOrchestrator,
    sent: Arc<Mutex<Vec<BridgeCommand>>>,
}

/// A controller that finishes every move at once and answers probes with
/// `probe_line`. `on_gcode` runs for each G-code command before the reply.
async fn rig<F>(probe_line: &'static str, mut on_gcode: F) -> Rig
where
    F: FnMut(&str) + Send + 'static,
{
    let mut machine = MachineSettings::default();
    machine.poll_interval_ms = 5;
    machine.state_timeout_ms = 500;
    machine.probe_timeout_ms = 500;

    let session = MachineSession::new(session_config_from(&machine));
    let (notify, mut commands) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    session.attach(Arc::new(MockTransport {
        sent: sent.clone(),
        notify,
    }));
    session.handle_event(report("Idle")).await;

    let controller = session.clone();
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            if let BridgeCommand::Gcode(text) = command {
                on_gcode(&text);
                if text.contains("G38.2") {
                    controller.handle_event(data(probe_line)).await;
                }
                controller
                    .handle_event(BridgeEvent::FeederStatus {
                        queue: 0,
                        pending: false,
                    })
                    .await;
                controller.handle_event(report("Idle")).await;
            }
        }
    });

    Rig {
        orchestrator: FabricationOrchestrator::new(session, &machine)
            .with_move_timeout(Duration::from_millis(500)),
        sent,
    }
}

fn holes(points: &[(f64, f64)]) -> Vec<Hole> {
    points
        .iter()
        .map(|&(x, y)| Hole {
            tool: Some("drl-T1".to_string()),
            coord: Point::new(x, y),
            diameter: Some(0.8),
        })
        .collect()
}

#[tokio::test]
async fn drills_every_hole_at_safe_height() {
    let rig = rig("[PRB:0.000,0.000,0.000:1]", |_| {}).await;
    let params = DrillParams {
        depth: 1.5,
        plunge_feed: 80.0,
    };

    let report = rig
        .orchestrator
        .drill_holes(&holes(&[(10.0, 10.0), (20.0, 5.5)]), &params, &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(report.drilled, 2);
    assert_eq!(report.total, 2);

    let lines = gcode_lines(&rig.sent);
    assert_eq!(
        lines,
        vec![
            "G90 G54 G0 Z5.000",
            "G90 G54 G0 X10.000 Y10.000",
            "G90 G1 Z-1.500 F80\nG0 Z5.000",
            "G90 G54 G0 Z5.000",
            "G90 G54 G0 X20.000 Y5.500",
            "G90 G1 Z-1.500 F80\nG0 Z5.000",
        ]
    );
}

#[tokio::test]
async fn cancel_stops_between_holes_and_retracts() {
    let cancel = CancelFlag::new();
    let trip = cancel.clone();
    let rig = rig("[PRB:0.000,0.000,0.000:1]", move |text| {
        if text.contains("G1 Z") {
            trip.cancel();
        }
    })
    .await;

    let err = rig
        .orchestrator
        .drill_holes(
            &holes(&[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]),
            &DrillParams::default(),
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    let lines = gcode_lines(&rig.sent);
    assert_eq!(lines.iter().filter(|l| l.contains("G1 Z")).count(), 1);
    assert_eq!(lines.last().map(String::as_str), Some("G90 G54 G0 Z5.000"));
}

#[tokio::test]
async fn probes_each_surface_point() {
    let rig = rig("[PRB:4.000,3.000,-2.125:1]", |_| {}).await;

    let samples = rig
        .orchestrator
        .probe_surface(
            &[Point::new(4.0, 3.0), Point::new(40.0, 3.0)],
            &CancelFlag::new(),
        )
        .await
        .unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[1].x, 40.0);
    assert_eq!(samples[1].z, -2.125);

    let lines = gcode_lines(&rig.sent);
    assert_eq!(lines.iter().filter(|l| l.contains("G38.2")).count(), 2);
    assert_eq!(lines.last().map(String::as_str), Some("G90 G54 G0 Z5.000"));
}

#[tokio::test]
async fn failed_probe_retracts_and_reports() {
    let rig = rig("[PRB:0.000,0.000,-5.000:0]", |_| {}).await;

    let err = rig
        .orchestrator
        .probe_surface(&[Point::new(1.0, 1.0)], &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::ProbeFailed { .. })
    ));

    let lines = gcode_lines(&rig.sent);
    assert_eq!(lines.last().map(String::as_str), Some("G90 G54 G0 Z5.000"));
}

#[tokio::test]
async fn invalid_drill_parameters_send_nothing() {
    let rig = rig("[PRB:0.000,0.000,0.000:1]", |_| {}).await;
    let params = DrillParams {
        depth: -1.0,
        plunge_feed: 60.0,
    };
    let err = rig
        .orchestrator
        .drill_holes(&holes(&[(1.0, 1.0)]), &params, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::InvalidParameter { .. })
    ));
    assert!(rig.sent.lock().is_empty());
}

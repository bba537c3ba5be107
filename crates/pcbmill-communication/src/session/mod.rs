//! # Machine Session
//!
//! Stateful client for a Grbl controller reached through the local bridge.
//!
//! Two inbound sources drive the session and may arrive in any order:
//! controller-state reports (authoritative state and positions) and raw
//! serial data lines (`ALARM:`, `[MSG:]`, `[PRB:]`, `ok`, `error:`). Both are
//! folded into one [`MachineState`] and re-published as typed
//! [`SessionEvent`]s on the session's own [`EventBus`]. Every inbound
//! [`BridgeEvent`] is also forwarded untouched on a raw broadcast channel.
//!
//! The session is cheap to clone; clones share the same connection and state.

mod commands;
mod jog;
mod state;
mod wait;

pub use jog::{jog_command, JogTier, JogTiers};
pub use state::{
    derive_sender_status, ChangeDetect, MachineState, OverrideSource, PendingOverride,
    PositionChange, Tracked,
};
pub use wait::CancelFlag;

use crate::bridge::{BridgeCommand, BridgeEvent, TcpBridgeTransport, Transport};
use crate::firmware::grbl::{parse_data_line, DataLine};
use parking_lot::{Mutex, RwLock};
use pcbmill_core::{
    ActiveState, ControllerError, EventBus, EventBusConfig, Result, SessionEvent,
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the raw bridge event channel
const RAW_CHANNEL_CAPACITY: usize = 1024;

/// Session behaviour settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Issue a soft reset when the auto-reset trigger message is seen
    pub auto_reset: bool,
    /// `[MSG:]` text that triggers the automatic reset
    pub auto_reset_trigger: String,
    /// Jog speed tiers
    pub jog_tiers: JogTiers,
    /// Re-check interval for wait primitives
    pub poll_interval: Duration,
    /// Default deadline for state waits
    pub state_timeout: Duration,
    /// Deadline for each step of the feeder reset sequence
    pub feeder_reset_timeout: Duration,
    /// Deadline for a probe cycle to report
    pub probe_timeout: Duration,
    /// Event bus settings
    pub event_bus: EventBusConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_reset: false,
            auto_reset_trigger: "Reset to continue".to_string(),
            jog_tiers: JogTiers::default(),
            poll_interval: Duration::from_millis(100),
            state_timeout: Duration::from_secs(30),
            feeder_reset_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(60),
            event_bus: EventBusConfig::default(),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    machine: MachineState,
    ready: bool,
    jogging: bool,
    jog_ack_pending: bool,
    position: Tracked<PositionChange>,
    spindle: Tracked<f64>,
}

struct SessionInner {
    config: SessionConfig,
    state: RwLock<SessionState>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    bus: EventBus,
    raw: broadcast::Sender<BridgeEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// CNC protocol and state client
#[derive(Clone)]
pub struct MachineSession {
    inner: Arc<SessionInner>,
}

impl MachineSession {
    /// Create a disconnected session
    pub fn new(config: SessionConfig) -> Self {
        let (raw, _) = broadcast::channel(RAW_CHANNEL_CAPACITY);
        let bus = EventBus::with_config(config.event_bus.clone());
        Self {
            inner: Arc::new(SessionInner {
                config,
                state: RwLock::new(SessionState::default()),
                transport: RwLock::new(None),
                bus,
                raw,
                pump: Mutex::new(None),
            }),
        }
    }

    /// Session settings
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Typed session event bus
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Pass-through channel carrying every inbound bridge event unmodified
    pub fn raw_events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.raw.subscribe()
    }

    /// Snapshot of the machine state
    pub fn state(&self) -> MachineState {
        self.inner.state.read().machine.clone()
    }

    /// Effective active state, `None` before the first report
    pub fn active_state(&self) -> Option<ActiveState> {
        self.inner.state.read().machine.active_state()
    }

    /// A transport is attached
    pub fn is_connected(&self) -> bool {
        self.inner.transport.read().is_some()
    }

    /// Connected and the controller has reported its state at least once
    pub fn is_ready(&self) -> bool {
        self.inner.state.read().ready
    }

    /// Attach a transport without starting an event pump
    ///
    /// The caller feeds inbound events through [`Self::handle_event`].
    /// Any previously attached transport is dropped.
    pub fn attach(&self, transport: Arc<dyn Transport>) {
        let address = transport.describe();
        let previous = self.inner.transport.write().replace(transport);
        if previous.is_some() {
            debug!("Replacing existing transport");
        }
        {
            let mut st = self.inner.state.write();
            *st = SessionState::default();
        }
        info!("Session attached to {}", address);
        self.inner.bus.publish(SessionEvent::Connected { address });
    }

    /// Attach a transport and pump its inbound events into the session
    pub fn connect(&self, transport: Arc<dyn Transport>, events: mpsc::Receiver<BridgeEvent>) {
        self.attach(transport);
        self.spawn_pump(events);
    }

    /// Open a TCP connection to the bridge and attach it
    pub async fn connect_tcp(&self, address: &str, timeout: Duration) -> Result<()> {
        let (transport, events) = TcpBridgeTransport::connect(address, timeout).await?;
        self.connect(Arc::new(transport), events);
        Ok(())
    }

    /// Close the transport and return to the disconnected state
    pub async fn close(&self) -> Result<()> {
        if let Some(handle) = self.inner.pump.lock().take() {
            handle.abort();
        }
        let transport = self.inner.transport.write().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                warn!("Error closing transport: {}", e);
            }
            self.reset_after_disconnect(None, "closed by caller");
        }
        Ok(())
    }

    fn spawn_pump(&self, mut events: mpsc::Receiver<BridgeEvent>) {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let closing = matches!(event, BridgeEvent::Close);
                MachineSession { inner }.handle_event(event).await;
                if closing {
                    break;
                }
            }
            debug!("Bridge event pump finished");
        });
        if let Some(previous) = self.inner.pump.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Fold one inbound bridge event into the session
    pub async fn handle_event(&self, event: BridgeEvent) {
        let _ = self.inner.raw.send(event.clone());

        match event {
            BridgeEvent::ControllerState {
                active_state,
                mpos,
                wpos,
                spindle,
            } => self.on_controller_state(&active_state, mpos, wpos, spindle),
            BridgeEvent::SerialData { line } => self.on_data_line(line).await,
            // Either event can move the derived status; both re-emit it
            BridgeEvent::WorkflowState { state } => {
                let status = {
                    let mut st = self.inner.state.write();
                    st.machine.workflow = state;
                    st.machine.refresh_sender_status()
                };
                self.inner.bus.publish(SessionEvent::SenderStatusChanged(status));
            }
            BridgeEvent::SenderStatus { size, finish_time } => {
                let status = {
                    let mut st = self.inner.state.write();
                    st.machine.sender_size = size;
                    st.machine.sender_finish_time = finish_time;
                    st.machine.refresh_sender_status()
                };
                self.inner.bus.publish(SessionEvent::SenderStatusChanged(status));
            }
            BridgeEvent::FeederStatus { queue, pending } => {
                self.set_feeder_pending(queue > 0 || pending);
            }
            BridgeEvent::Error { message } => {
                error!("Bridge reported an error: {}", message);
                self.hard_disconnect(Some(message), "transport error");
            }
            BridgeEvent::Close => {
                self.hard_disconnect(None, "bridge closed the connection");
            }
        }
    }

    fn on_controller_state(
        &self,
        active_state: &str,
        mpos: pcbmill_core::Position,
        wpos: pcbmill_core::Position,
        spindle: Option<f64>,
    ) {
        let connected = self.is_connected();
        let mut events = Vec::new();
        {
            let mut st = self.inner.state.write();

            match active_state.parse::<ActiveState>() {
                Ok(new_state) => {
                    let was_preliminary = st.machine.pending.take().is_some();
                    let previous = st.machine.reported_state.replace(new_state);
                    if previous != Some(new_state) || was_preliminary {
                        events.push(SessionEvent::StateChanged {
                            state: new_state,
                            preliminary: false,
                        });
                    }
                    if connected && !st.ready {
                        st.ready = true;
                        events.push(SessionEvent::ReadyChanged(true));
                    }
                }
                Err(e) => warn!("Ignoring controller state: {}", e),
            }

            st.machine.mpos = mpos;
            st.machine.wpos = wpos;
            if st.position.update(PositionChange { mpos, wpos }) {
                events.push(SessionEvent::PositionChanged { mpos, wpos });
            }

            if let Some(speed) = spindle {
                st.machine.spindle_speed = speed;
                if st.spindle.update(speed) {
                    events.push(SessionEvent::SpindleChanged(speed));
                }
            }
        }
        self.publish_all(events);
    }

    async fn on_data_line(&self, line: String) {
        let parsed = parse_data_line(&line);
        let mut events = Vec::new();
        let mut auto_reset = false;
        {
            let mut st = self.inner.state.write();
            match &parsed {
                DataLine::Ok => st.jog_ack_pending = false,
                DataLine::Error(message) => {
                    st.jog_ack_pending = false;
                    events.push(SessionEvent::FirmwareError(message.clone()));
                }
                DataLine::Alarm { code, description } => {
                    st.machine.pending = Some(PendingOverride {
                        state: ActiveState::Alarm,
                        source: OverrideSource::DataLine,
                    });
                    st.jogging = false;
                    st.jog_ack_pending = false;
                    events.push(SessionEvent::StateChanged {
                        state: ActiveState::Alarm,
                        preliminary: true,
                    });
                    events.push(SessionEvent::Alarm {
                        code: *code,
                        message: description.clone(),
                    });
                }
                DataLine::Message(text) => {
                    events.push(SessionEvent::Message(text.clone()));
                    let trigger = &self.inner.config.auto_reset_trigger;
                    auto_reset = self.inner.config.auto_reset
                        && !trigger.is_empty()
                        && text.to_lowercase().contains(&trigger.to_lowercase());
                }
                DataLine::Probe(result) => {
                    st.machine.last_probe = Some(*result);
                    events.push(SessionEvent::Probe(*result));
                }
                DataLine::Banner(banner) => {
                    st.jogging = false;
                    st.jog_ack_pending = false;
                    events.push(SessionEvent::FirmwareReset {
                        banner: banner.clone(),
                    });
                }
                DataLine::Feedback(_) | DataLine::Text(_) => {}
            }
        }
        if let DataLine::Alarm { code, description } = &parsed {
            warn!("ALARM:{} - {}", code, description);
        }
        events.push(SessionEvent::Data(line));
        self.publish_all(events);

        if auto_reset {
            info!("Auto-reset trigger seen, resetting controller");
            if let Err(e) = self.reset().await {
                warn!("Automatic reset failed: {}", e);
            }
        }
    }

    /// Drop the transport after a socket-level failure
    fn hard_disconnect(&self, error: Option<String>, reason: &str) {
        let had_transport = self.inner.transport.write().take().is_some();
        if let Some(message) = &error {
            self.inner
                .bus
                .publish(SessionEvent::TransportError(message.clone()));
        }
        if had_transport {
            self.reset_after_disconnect(error, reason);
        }
    }

    fn reset_after_disconnect(&self, error: Option<String>, reason: &str) {
        let was_ready = {
            let mut st = self.inner.state.write();
            let was_ready = st.ready;
            *st = SessionState::default();
            was_ready
        };
        match error {
            Some(message) => warn!("Session disconnected ({}): {}", reason, message),
            None => info!("Session disconnected ({})", reason),
        }
        if was_ready {
            self.inner.bus.publish(SessionEvent::ReadyChanged(false));
        }
        self.inner.bus.publish(SessionEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    fn set_feeder_pending(&self, pending: bool) {
        let changed = {
            let mut st = self.inner.state.write();
            let changed = st.machine.feeder_pending != pending;
            st.machine.feeder_pending = pending;
            changed
        };
        if changed {
            self.inner
                .bus
                .publish(SessionEvent::FeederChanged { pending });
        }
    }

    /// Record a local override ahead of the command that justifies it
    fn apply_override(&self, state: ActiveState) {
        self.inner.state.write().machine.pending = Some(PendingOverride {
            state,
            source: OverrideSource::Command,
        });
        self.inner.bus.publish(SessionEvent::StateChanged {
            state,
            preliminary: true,
        });
    }

    fn publish_all(&self, events: Vec<SessionEvent>) {
        for event in events {
            self.inner.bus.publish(event);
        }
    }

    fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.inner
            .transport
            .read()
            .clone()
            .ok_or_else(|| ControllerError::NotConnected.into())
    }

    /// Issue one bridge command
    ///
    /// A connection-level failure disconnects the session before the error
    /// is returned.
    pub async fn send(&self, command: BridgeCommand) -> Result<()> {
        let transport = self.transport()?;
        debug!("-> {}", command.name());
        if let Err(e) = transport.send(command).await {
            if e.is_connection_error() {
                self.hard_disconnect(Some(e.to_string()), "send failed");
            }
            return Err(e);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MachineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.read();
        f.debug_struct("MachineSession")
            .field("connected", &self.is_connected())
            .field("ready", &st.ready)
            .field("state", &st.machine.active_state())
            .finish()
    }
}

//! Simulated camera hardware.
//!
//! Behaves like a platform camera stack: requests return immediately and
//! outcomes are delivered through the connection's callback, either
//! immediately, after a delay on a background thread, or only when a test
//! releases them. Every mode delivers events in the order they were
//! produced. Faults can be injected for every asynchronous step.

use super::{
    CameraHardware, ConnectionId, HardwareCallback, HardwareError, HardwareEvent, RequestId,
    SessionId, StillFrame, TransferredResource,
};
use crate::device::{Capability, DeviceEnumerator, DeviceId, DeviceInfo, Facing};
use crate::session::{CaptureRequest, OutputTarget, Resolution};
use chrono::Utc;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Platform error code used for injected faults.
const INJECTED_FAULT_CODE: i32 = 4;

/// When callbacks are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Delivered from inside the request call.
    #[default]
    Immediate,
    /// Delivered after the delay by a single background thread, so later
    /// events never overtake earlier ones.
    Delayed(Duration),
    /// Held until [`SimulatedHardware::release_next`] or `release_all`.
    Manual,
}

/// How the next open request should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFault {
    /// The request is refused synchronously.
    Refuse,
    /// The device reports an error callback instead of opening.
    Error(i32),
    /// The device reports a disconnect instead of opening.
    Disconnect,
}

/// Call counters, for asserting on what the controller asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareStats {
    pub open_calls: u64,
    pub device_closes: u64,
    pub session_creates: u64,
    pub session_closes: u64,
    pub repeating_starts: u64,
    pub capture_calls: u64,
}

struct SimConnection {
    device: DeviceId,
    callback: HardwareCallback,
}

struct SimSession {
    connection: ConnectionId,
    targets: Vec<OutputTarget>,
    repeating: Option<CaptureRequest>,
}

#[derive(Default)]
struct SimState {
    devices: Vec<DeviceInfo>,
    next_id: u64,
    connections: HashMap<ConnectionId, SimConnection>,
    sessions: HashMap<SessionId, SimSession>,
    open_faults: VecDeque<OpenFault>,
    configure_faults: usize,
    capture_faults: usize,
    session_close_faults: usize,
    held: VecDeque<(HardwareCallback, HardwareEvent)>,
    stats: HardwareStats,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn callback_for_session(&self, session: SessionId) -> Option<HardwareCallback> {
        let connection = self.sessions.get(&session)?.connection;
        self.connections.get(&connection).map(|c| c.callback.clone())
    }

    fn release(&mut self, resource: TransferredResource) {
        match resource {
            TransferredResource::Connection(id) => {
                self.connections.remove(&id);
                self.sessions.retain(|_, s| s.connection != id);
            }
            TransferredResource::Session(id) => {
                self.sessions.remove(&id);
            }
        }
    }
}

type Outgoing = Vec<(HardwareCallback, HardwareEvent)>;

/// An event waiting in delayed mode.
struct Scheduled {
    due: Instant,
    callback: HardwareCallback,
    event: HardwareEvent,
}

/// Scriptable in-process camera hardware.
pub struct SimulatedHardware {
    state: Arc<Mutex<SimState>>,
    mode: ResponseMode,
    /// Feeds the delivery thread; only set in delayed mode.
    scheduled: Option<Sender<Scheduled>>,
}

impl SimulatedHardware {
    /// Creates hardware exposing `devices`.
    pub fn new(devices: Vec<DeviceInfo>, mode: ResponseMode) -> Self {
        let state = Arc::new(Mutex::new(SimState {
            devices,
            ..Default::default()
        }));
        let scheduled = match mode {
            ResponseMode::Delayed(_) => Some(spawn_delivery(Arc::clone(&state))),
            _ => None,
        };
        Self {
            state,
            mode,
            scheduled,
        }
    }

    /// A phone-like layout: back camera `0` with multi-camera support and
    /// front camera `1`.
    pub fn dual(mode: ResponseMode) -> Self {
        Self::new(
            vec![
                DeviceInfo::new(
                    DeviceId::new("0", Facing::Back),
                    vec![Capability::BackwardCompatible, Capability::LogicalMultiCamera],
                ),
                DeviceInfo::new(
                    DeviceId::new("1", Facing::Front),
                    vec![Capability::BackwardCompatible],
                ),
            ],
            mode,
        )
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// Makes the next open request fail with `fault`.
    pub fn fail_next_open(&self, fault: OpenFault) {
        self.state.lock().open_faults.push_back(fault);
    }

    /// Makes the next session configuration fail.
    pub fn fail_next_configure(&self) {
        self.state.lock().configure_faults += 1;
    }

    /// Makes the next still capture fail.
    pub fn fail_next_capture(&self) {
        self.state.lock().capture_faults += 1;
    }

    /// Makes the next session close report an error.
    pub fn fail_next_session_close(&self) {
        self.state.lock().session_close_faults += 1;
    }

    /// Emits an unsolicited disconnect for the live connection to the first
    /// device facing `facing`. Returns false if no such connection exists.
    pub fn disconnect(&self, facing: Facing) -> bool {
        self.emit_device_event(facing, |connection| HardwareEvent::Disconnected { connection })
    }

    /// Emits an unsolicited error callback for the device facing `facing`.
    pub fn raise_error(&self, facing: Facing, code: i32) -> bool {
        self.emit_device_event(facing, |connection| HardwareEvent::Error { connection, code })
    }

    fn emit_device_event(
        &self,
        facing: Facing,
        make: impl FnOnce(ConnectionId) -> HardwareEvent,
    ) -> bool {
        let outgoing = {
            let state = self.state.lock();
            state
                .connections
                .iter()
                .find(|(_, c)| c.device.facing() == facing)
                .map(|(id, c)| (c.callback.clone(), make(*id)))
        };
        match outgoing {
            Some(event) => {
                self.dispatch(vec![event]);
                true
            }
            None => false,
        }
    }

    /// Delivers the oldest held event. Returns false if none was held.
    pub fn release_next(&self) -> bool {
        let next = self.state.lock().held.pop_front();
        match next {
            Some((callback, event)) => {
                deliver(&self.state, &callback, event);
                true
            }
            None => false,
        }
    }

    /// Delivers every held event in order and returns how many there were.
    pub fn release_all(&self) -> usize {
        let mut released = 0;
        while self.release_next() {
            released += 1;
        }
        released
    }

    /// Number of events waiting for release in manual mode.
    pub fn held_events(&self) -> usize {
        self.state.lock().held.len()
    }

    pub fn stats(&self) -> HardwareStats {
        self.state.lock().stats.clone()
    }

    /// Connections allocated and not yet closed.
    pub fn live_connections(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Live connections to devices facing `facing`.
    pub fn live_connections_for(&self, facing: Facing) -> usize {
        self.state
            .lock()
            .connections
            .values()
            .filter(|c| c.device.facing() == facing)
            .count()
    }

    /// Sessions configured and not yet closed.
    pub fn live_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Live sessions currently running a repeating request.
    pub fn repeating_sessions(&self) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .filter(|s| s.repeating.is_some())
            .count()
    }

    fn dispatch(&self, outgoing: Outgoing) {
        for (callback, event) in outgoing {
            match (self.mode, &self.scheduled) {
                (ResponseMode::Delayed(delay), Some(scheduled)) => {
                    let due = Instant::now() + delay;
                    if let Err(e) = scheduled.send(Scheduled {
                        due,
                        callback,
                        event,
                    }) {
                        // The delivery thread is gone; fall back to inline.
                        let Scheduled { callback, event, .. } = e.into_inner();
                        deliver(&self.state, &callback, event);
                    }
                }
                (ResponseMode::Manual, _) => self.state.lock().held.push_back((callback, event)),
                _ => deliver(&self.state, &callback, event),
            }
        }
    }
}

/// Starts the thread that delivers delayed events in FIFO order. It exits
/// once the hardware is dropped and the queue has drained.
fn spawn_delivery(state: Arc<Mutex<SimState>>) -> Sender<Scheduled> {
    let (tx, rx) = crossbeam_channel::unbounded::<Scheduled>();
    thread::spawn(move || {
        for Scheduled {
            due,
            callback,
            event,
        } in rx
        {
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
            deliver(&state, &callback, event);
        }
    });
    tx
}

/// Hands an event to its callback, reclaiming any resource it carried if
/// nobody is listening anymore.
fn deliver(state: &Mutex<SimState>, callback: &HardwareCallback, event: HardwareEvent) {
    let resource = event.transferred_resource();
    if !callback.deliver(event) {
        if let Some(resource) = resource {
            tracing::debug!(?resource, "Callback receiver gone, reclaiming resource");
            state.lock().release(resource);
        }
    }
}

fn synthetic_jpeg(sequence: u64, size: Resolution) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8];
    bytes.extend((0..64u64).map(|i| ((i ^ sequence) % 251) as u8));
    bytes.extend_from_slice(&size.width.to_be_bytes());
    bytes.extend_from_slice(&size.height.to_be_bytes());
    bytes.extend_from_slice(&[0xFF, 0xD9]);
    bytes
}

impl CameraHardware for SimulatedHardware {
    fn open(
        &self,
        device: &DeviceId,
        callback: HardwareCallback,
    ) -> Result<ConnectionId, HardwareError> {
        let (connection, outgoing) = {
            let mut state = self.state.lock();
            state.stats.open_calls += 1;

            if !state.devices.iter().any(|d| &d.id == device) {
                return Err(HardwareError::DeviceNotFound(device.to_string()));
            }
            if state.connections.values().any(|c| &c.device == device) {
                return Err(HardwareError::Busy(device.to_string()));
            }

            let fault = state.open_faults.pop_front();
            if fault == Some(OpenFault::Refuse) {
                return Err(HardwareError::AccessDenied(device.to_string()));
            }

            let connection = ConnectionId::new(state.next_id());
            state.connections.insert(
                connection,
                SimConnection {
                    device: device.clone(),
                    callback: callback.clone(),
                },
            );

            let event = match fault {
                Some(OpenFault::Error(code)) => HardwareEvent::Error { connection, code },
                Some(OpenFault::Disconnect) => HardwareEvent::Disconnected { connection },
                _ => HardwareEvent::Opened { connection },
            };
            (connection, vec![(callback, event)])
        };

        self.dispatch(outgoing);
        Ok(connection)
    }

    fn create_session(
        &self,
        connection: ConnectionId,
        targets: &[OutputTarget],
    ) -> Result<SessionId, HardwareError> {
        let (session, outgoing) = {
            let mut state = self.state.lock();
            state.stats.session_creates += 1;

            let callback = state
                .connections
                .get(&connection)
                .map(|c| c.callback.clone())
                .ok_or(HardwareError::UnknownConnection(connection))?;
            if state.sessions.values().any(|s| s.connection == connection) {
                return Err(HardwareError::Busy(format!("{connection} already has a session")));
            }

            let session = SessionId::new(state.next_id());
            let event = if state.configure_faults > 0 {
                state.configure_faults -= 1;
                HardwareEvent::SessionConfigureFailed { session }
            } else {
                state.sessions.insert(
                    session,
                    SimSession {
                        connection,
                        targets: targets.to_vec(),
                        repeating: None,
                    },
                );
                HardwareEvent::SessionConfigured { session }
            };
            (session, vec![(callback, event)])
        };

        self.dispatch(outgoing);
        Ok(session)
    }

    fn set_repeating_request(
        &self,
        session: SessionId,
        request: &CaptureRequest,
    ) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        let entry = state
            .sessions
            .get_mut(&session)
            .ok_or(HardwareError::UnknownSession(session))?;
        entry.repeating = Some(request.clone());
        state.stats.repeating_starts += 1;
        Ok(())
    }

    fn stop_repeating(&self, session: SessionId) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        let entry = state
            .sessions
            .get_mut(&session)
            .ok_or(HardwareError::UnknownSession(session))?;
        entry.repeating = None;
        Ok(())
    }

    fn capture(
        &self,
        session: SessionId,
        request: &CaptureRequest,
    ) -> Result<RequestId, HardwareError> {
        let (request_id, outgoing) = {
            let mut state = self.state.lock();
            state.stats.capture_calls += 1;

            let still = state
                .sessions
                .get(&session)
                .ok_or(HardwareError::UnknownSession(session))?
                .targets
                .iter()
                .find_map(|t| match t {
                    OutputTarget::Still(still) => Some(*still),
                    OutputTarget::Preview(_) => None,
                });
            let still = still.ok_or_else(|| HardwareError::Platform {
                code: INJECTED_FAULT_CODE,
                message: format!("{session} has no still target"),
            })?;
            if !request.targets.iter().all(|t| state.sessions[&session].targets.contains(t)) {
                return Err(HardwareError::Platform {
                    code: INJECTED_FAULT_CODE,
                    message: "request targets not part of session".into(),
                });
            }

            let callback = state
                .callback_for_session(session)
                .ok_or(HardwareError::UnknownSession(session))?;
            let request_id = RequestId::new(state.next_id());
            let event = if state.capture_faults > 0 {
                state.capture_faults -= 1;
                HardwareEvent::CaptureFailed {
                    session,
                    request: request_id,
                    code: INJECTED_FAULT_CODE,
                }
            } else {
                HardwareEvent::CaptureCompleted {
                    session,
                    request: request_id,
                    frame: StillFrame {
                        bytes: synthetic_jpeg(request_id.get(), still.size),
                        size: still.size,
                        format: still.format,
                        timestamp: Utc::now(),
                    },
                }
            };
            (request_id, vec![(callback, event)])
        };

        self.dispatch(outgoing);
        Ok(request_id)
    }

    fn close_session(&self, session: SessionId) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        state.stats.session_closes += 1;
        if state.sessions.remove(&session).is_none() {
            return Err(HardwareError::UnknownSession(session));
        }
        if state.session_close_faults > 0 {
            state.session_close_faults -= 1;
            return Err(HardwareError::Platform {
                code: INJECTED_FAULT_CODE,
                message: format!("injected failure closing {session}"),
            });
        }
        Ok(())
    }

    fn close_device(&self, connection: ConnectionId) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        state.stats.device_closes += 1;
        if !state.connections.contains_key(&connection) {
            return Err(HardwareError::UnknownConnection(connection));
        }
        state.release(TransferredResource::Connection(connection));
        Ok(())
    }
}

impl DeviceEnumerator for SimulatedHardware {
    fn devices(&self) -> Result<Vec<DeviceInfo>, HardwareError> {
        Ok(self.state.lock().devices.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AutofocusMode, ImageFormat, PreviewTarget, StillTarget, SurfaceId};
    use crossbeam_channel::{unbounded, Receiver};

    fn callback() -> (HardwareCallback, Receiver<HardwareEvent>) {
        let (tx, rx) = unbounded();
        (HardwareCallback::new(move |e| tx.send(e).is_ok()), rx)
    }

    fn back() -> DeviceId {
        DeviceId::new("0", Facing::Back)
    }

    fn targets() -> Vec<OutputTarget> {
        vec![
            OutputTarget::Preview(PreviewTarget::new(SurfaceId::new(1), Resolution::new(64, 48))),
            OutputTarget::Still(StillTarget {
                size: Resolution::new(128, 96),
                format: ImageFormat::Jpeg,
                max_images: 2,
            }),
        ]
    }

    #[test]
    fn test_open_configure_capture() {
        let hw = SimulatedHardware::dual(ResponseMode::Immediate);
        let (cb, rx) = callback();

        let conn = hw.open(&back(), cb).unwrap();
        assert!(matches!(rx.try_recv(), Ok(HardwareEvent::Opened { connection }) if connection == conn));
        assert_eq!(hw.live_connections(), 1);

        let session = hw.create_session(conn, &targets()).unwrap();
        assert!(matches!(rx.try_recv(), Ok(HardwareEvent::SessionConfigured { .. })));

        let still = match targets()[1] {
            OutputTarget::Still(s) => s,
            _ => unreachable!(),
        };
        let req = CaptureRequest::still(&still, AutofocusMode::ContinuousPicture);
        hw.capture(session, &req).unwrap();
        match rx.try_recv() {
            Ok(HardwareEvent::CaptureCompleted { frame, .. }) => {
                assert_eq!(&frame.bytes[..2], &[0xFF, 0xD8]);
                assert_eq!(frame.size, Resolution::new(128, 96));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        hw.close_session(session).unwrap();
        hw.close_device(conn).unwrap();
        assert_eq!(hw.live_connections(), 0);
        assert_eq!(hw.live_sessions(), 0);
    }

    #[test]
    fn test_double_open_is_busy() {
        let hw = SimulatedHardware::dual(ResponseMode::Immediate);
        let (cb, _rx) = callback();
        hw.open(&back(), cb.clone()).unwrap();
        assert!(matches!(hw.open(&back(), cb), Err(HardwareError::Busy(_))));
    }

    #[test]
    fn test_manual_mode_holds_events() {
        let hw = SimulatedHardware::dual(ResponseMode::Manual);
        let (cb, rx) = callback();
        hw.open(&back(), cb).unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(hw.held_events(), 1);
        assert_eq!(hw.release_all(), 1);
        assert!(matches!(rx.try_recv(), Ok(HardwareEvent::Opened { .. })));
    }

    #[test]
    fn test_undeliverable_open_is_reclaimed() {
        let hw = SimulatedHardware::dual(ResponseMode::Manual);
        let (cb, rx) = callback();
        hw.open(&back(), cb).unwrap();
        drop(rx);

        hw.release_all();
        assert_eq!(hw.live_connections(), 0);
    }

    #[test]
    fn test_open_faults() {
        let hw = SimulatedHardware::dual(ResponseMode::Immediate);
        let (cb, rx) = callback();

        hw.fail_next_open(OpenFault::Refuse);
        assert!(matches!(hw.open(&back(), cb.clone()), Err(HardwareError::AccessDenied(_))));
        assert_eq!(hw.live_connections(), 0);

        hw.fail_next_open(OpenFault::Error(3));
        hw.open(&back(), cb).unwrap();
        assert!(matches!(rx.try_recv(), Ok(HardwareEvent::Error { code: 3, .. })));
        // Partially allocated until closed.
        assert_eq!(hw.live_connections(), 1);
    }

    #[test]
    fn test_disconnect_targets_facing() {
        let hw = SimulatedHardware::dual(ResponseMode::Immediate);
        let (cb, rx) = callback();
        assert!(!hw.disconnect(Facing::Back));

        hw.open(&back(), cb).unwrap();
        let _ = rx.try_recv();
        assert!(!hw.disconnect(Facing::Front));
        assert!(hw.disconnect(Facing::Back));
        assert!(matches!(rx.try_recv(), Ok(HardwareEvent::Disconnected { .. })));
    }

    #[test]
    fn test_delayed_mode_delivers_later() {
        let hw = SimulatedHardware::dual(ResponseMode::Delayed(Duration::from_millis(5)));
        let (cb, rx) = callback();
        hw.open(&back(), cb).unwrap();
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, HardwareEvent::Opened { .. }));
    }

    #[test]
    fn test_delayed_mode_preserves_order() {
        let hw = SimulatedHardware::dual(ResponseMode::Delayed(Duration::from_millis(2)));
        let (cb, rx) = callback();
        let conn = hw.open(&back(), cb).unwrap();
        let session = hw.create_session(conn, &targets()).unwrap();

        let still = match targets()[1] {
            OutputTarget::Still(s) => s,
            _ => unreachable!(),
        };
        let req = CaptureRequest::still(&still, AutofocusMode::ContinuousPicture);
        let issued: Vec<RequestId> = (0..20).map(|_| hw.capture(session, &req).unwrap()).collect();

        let wait = Duration::from_secs(2);
        assert!(matches!(rx.recv_timeout(wait), Ok(HardwareEvent::Opened { .. })));
        assert!(matches!(rx.recv_timeout(wait), Ok(HardwareEvent::SessionConfigured { .. })));
        let completed: Vec<RequestId> = (0..20)
            .map(|_| match rx.recv_timeout(wait) {
                Ok(HardwareEvent::CaptureCompleted { request, .. }) => request,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(completed, issued);
    }

    #[test]
    fn test_undeliverable_error_is_reclaimed() {
        for fault in [OpenFault::Error(3), OpenFault::Disconnect] {
            let hw = SimulatedHardware::dual(ResponseMode::Manual);
            let (cb, rx) = callback();
            hw.fail_next_open(fault);
            hw.open(&back(), cb).unwrap();
            drop(rx);

            hw.release_all();
            assert_eq!(hw.live_connections(), 0, "{fault:?}");
        }
    }

    #[test]
    fn test_closing_device_invalidates_sessions() {
        let hw = SimulatedHardware::dual(ResponseMode::Immediate);
        let (cb, _rx) = callback();
        let conn = hw.open(&back(), cb).unwrap();
        let session = hw.create_session(conn, &targets()).unwrap();

        hw.close_device(conn).unwrap();
        assert_eq!(hw.live_sessions(), 0);
        assert!(matches!(
            hw.close_session(session),
            Err(HardwareError::UnknownSession(_))
        ));
    }
}

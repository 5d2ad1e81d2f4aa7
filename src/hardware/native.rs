//! Camera hardware backed by nokhwa.
//!
//! nokhwa cameras are blocking and not `Send` on every platform, so each
//! connection gets its own thread that creates, drives and drops the
//! camera. Calls on [`NativeHardware`] only enqueue work for that thread;
//! results come back through the connection's [`HardwareCallback`].
//!
//! Devices are mapped by enumeration order: index 0 is treated as the back
//! camera and index 1 as the front camera.

use super::{
    CameraHardware, ConnectionId, HardwareCallback, HardwareError, HardwareEvent, RequestId,
    SessionId, StillFrame,
};
use crate::device::{Capability, DeviceEnumerator, DeviceId, DeviceInfo, Facing};
use crate::session::{CaptureRequest, ImageFormat, OutputTarget, Resolution};
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

/// How often a streaming connection pulls a preview frame.
const PREVIEW_POLL: Duration = Duration::from_millis(33);

enum Job {
    Configure(SessionId),
    Repeating(Option<SessionId>),
    Capture(SessionId, RequestId),
    CloseSession(SessionId),
    Close,
}

#[derive(Default)]
struct NativeState {
    next_id: u64,
    connections: HashMap<ConnectionId, Sender<Job>>,
    sessions: HashMap<SessionId, ConnectionId>,
}

impl NativeState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn job_sender(&self, session: SessionId) -> Result<&Sender<Job>, HardwareError> {
        self.sessions
            .get(&session)
            .and_then(|c| self.connections.get(c))
            .ok_or(HardwareError::UnknownSession(session))
    }
}

/// Hardware layer over the platform's native camera API.
pub struct NativeHardware {
    backend: ApiBackend,
    state: Mutex<NativeState>,
}

impl NativeHardware {
    pub fn new() -> Self {
        Self {
            backend: ApiBackend::Auto,
            state: Mutex::new(NativeState::default()),
        }
    }
}

impl Default for NativeHardware {
    fn default() -> Self {
        Self::new()
    }
}

fn platform_error(e: impl std::fmt::Display) -> HardwareError {
    HardwareError::Platform {
        code: -1,
        message: e.to_string(),
    }
}

impl DeviceEnumerator for NativeHardware {
    fn devices(&self) -> Result<Vec<DeviceInfo>, HardwareError> {
        let cameras = nokhwa::query(self.backend).map_err(platform_error)?;
        let devices = cameras
            .iter()
            .take(2)
            .enumerate()
            .map(|(index, info)| {
                let facing = if index == 0 { Facing::Back } else { Facing::Front };
                tracing::debug!(index, name = %info.human_name(), %facing, "Found camera");
                DeviceInfo::new(
                    DeviceId::new(index.to_string(), facing),
                    vec![Capability::BackwardCompatible],
                )
            })
            .collect();
        Ok(devices)
    }
}

impl CameraHardware for NativeHardware {
    fn open(
        &self,
        device: &DeviceId,
        callback: HardwareCallback,
    ) -> Result<ConnectionId, HardwareError> {
        let index: u32 = device
            .as_str()
            .parse()
            .map_err(|_| HardwareError::DeviceNotFound(device.to_string()))?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let connection = {
            let mut state = self.state.lock();
            let connection = ConnectionId::new(state.next());
            // Registered before the thread can report it opened.
            state.connections.insert(connection, tx);
            connection
        };

        let spawned = thread::Builder::new()
            .name(format!("{}-native", device.facing()))
            .spawn(move || run_connection(connection, index, rx, callback));
        if let Err(e) = spawned {
            self.state.lock().connections.remove(&connection);
            return Err(platform_error(e));
        }
        Ok(connection)
    }

    fn create_session(
        &self,
        connection: ConnectionId,
        targets: &[OutputTarget],
    ) -> Result<SessionId, HardwareError> {
        let mut state = self.state.lock();
        let tx = state
            .connections
            .get(&connection)
            .cloned()
            .ok_or(HardwareError::UnknownConnection(connection))?;
        let session = SessionId::new(state.next());
        tracing::debug!(%connection, %session, targets = targets.len(), "Configuring native session");
        tx.send(Job::Configure(session))
            .map_err(|_| HardwareError::UnknownConnection(connection))?;
        state.sessions.insert(session, connection);
        Ok(session)
    }

    fn set_repeating_request(
        &self,
        session: SessionId,
        _request: &CaptureRequest,
    ) -> Result<(), HardwareError> {
        let state = self.state.lock();
        state
            .job_sender(session)?
            .send(Job::Repeating(Some(session)))
            .map_err(|_| HardwareError::UnknownSession(session))
    }

    fn stop_repeating(&self, session: SessionId) -> Result<(), HardwareError> {
        let state = self.state.lock();
        state
            .job_sender(session)?
            .send(Job::Repeating(None))
            .map_err(|_| HardwareError::UnknownSession(session))
    }

    fn capture(
        &self,
        session: SessionId,
        _request: &CaptureRequest,
    ) -> Result<RequestId, HardwareError> {
        let mut state = self.state.lock();
        let request = RequestId::new(state.next());
        state
            .job_sender(session)?
            .send(Job::Capture(session, request))
            .map_err(|_| HardwareError::UnknownSession(session))?;
        Ok(request)
    }

    fn close_session(&self, session: SessionId) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        let connection = state
            .sessions
            .remove(&session)
            .ok_or(HardwareError::UnknownSession(session))?;
        if let Some(tx) = state.connections.get(&connection) {
            // The thread may already have exited after a disconnect.
            let _ = tx.send(Job::CloseSession(session));
        }
        Ok(())
    }

    fn close_device(&self, connection: ConnectionId) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        let tx = state
            .connections
            .remove(&connection)
            .ok_or(HardwareError::UnknownConnection(connection))?;
        state.sessions.retain(|_, c| *c != connection);
        let _ = tx.send(Job::Close);
        Ok(())
    }
}

/// Owns one nokhwa camera for the lifetime of a connection.
fn run_connection(
    connection: ConnectionId,
    index: u32,
    jobs: Receiver<Job>,
    callback: HardwareCallback,
) {
    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);
    let mut camera = match Camera::new(CameraIndex::Index(index), format)
        .and_then(|mut camera| camera.open_stream().map(|()| camera))
    {
        Ok(camera) => camera,
        Err(e) => {
            tracing::warn!(%connection, index, error = %e, "Native camera failed to open");
            callback.deliver(HardwareEvent::Error {
                connection,
                code: -1,
            });
            return;
        }
    };

    if !callback.deliver(HardwareEvent::Opened { connection }) {
        // Nobody will ever close this connection.
        let _ = camera.stop_stream();
        return;
    }

    let mut active: Option<SessionId> = None;
    let mut repeating = false;
    loop {
        let job = if repeating {
            match jobs.recv_timeout(PREVIEW_POLL) {
                Ok(job) => Some(job),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match jobs.recv() {
                Ok(job) => Some(job),
                Err(_) => break,
            }
        };

        match job {
            None => {
                if let Err(e) = camera.frame() {
                    tracing::warn!(%connection, error = %e, "Preview frame lost, device disconnected");
                    callback.deliver(HardwareEvent::Disconnected { connection });
                    repeating = false;
                }
            }
            Some(Job::Configure(session)) => {
                active = Some(session);
                callback.deliver(HardwareEvent::SessionConfigured { session });
            }
            Some(Job::Repeating(session)) => {
                repeating = session.is_some() && session == active;
            }
            Some(Job::Capture(session, request)) => {
                let event = match grab_still(&mut camera) {
                    Ok(frame) => HardwareEvent::CaptureCompleted {
                        session,
                        request,
                        frame,
                    },
                    Err(e) => {
                        tracing::warn!(%connection, %request, error = %e, "Native still capture failed");
                        HardwareEvent::CaptureFailed {
                            session,
                            request,
                            code: -1,
                        }
                    }
                };
                callback.deliver(event);
            }
            Some(Job::CloseSession(session)) => {
                if active == Some(session) {
                    active = None;
                    repeating = false;
                }
            }
            Some(Job::Close) => break,
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::debug!(%connection, error = %e, "Failed to stop native stream");
    }
    tracing::debug!(%connection, "Native camera released");
}

fn grab_still(camera: &mut Camera) -> Result<StillFrame, HardwareError> {
    let buffer = camera.frame().map_err(platform_error)?;
    let resolution = buffer.resolution();
    let size = Resolution::new(resolution.width(), resolution.height());

    let (bytes, format) = match buffer.source_frame_format() {
        FrameFormat::MJPEG => (buffer.buffer().to_vec(), ImageFormat::Jpeg),
        _ => {
            let image = buffer.decode_image::<RgbFormat>().map_err(platform_error)?;
            (image.into_raw(), ImageFormat::Rgb8)
        }
    };

    Ok(StillFrame {
        bytes,
        size,
        format,
        timestamp: Utc::now(),
    })
}

//! Worker thread owning one controller's state machine.

use super::machine::{ControllerSetup, StateMachine};
use super::report::ControllerReport;
use super::status::StatusCell;
use crate::hardware::{HardwareCallback, HardwareEvent};
use crate::session::PreviewTarget;
use crossbeam_channel::{Receiver, Sender};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Caller requests, applied in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Start,
    Stop,
    Configure(PreviewTarget),
    CaptureStill,
}

/// Everything a worker consumes. Commands and hardware callbacks share one
/// queue so they are handled strictly one at a time.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Command(Command),
    Hardware(HardwareEvent),
    Shutdown,
}

/// Spawns the worker thread for `setup.facing`.
///
/// The hardware callback feeds `tx`; if the worker is gone the send fails
/// and the hardware reclaims whatever the event carried.
pub(crate) fn spawn(
    setup: ControllerSetup,
    tx: Sender<WorkerMessage>,
    rx: Receiver<WorkerMessage>,
    reports: Sender<ControllerReport>,
    status: Arc<StatusCell>,
) -> io::Result<JoinHandle<()>> {
    let facing = setup.facing;
    let callback = HardwareCallback::new(move |event| tx.send(WorkerMessage::Hardware(event)).is_ok());
    let mut machine = StateMachine::new(setup, callback, reports, status);

    thread::Builder::new()
        .name(format!("{facing}-camera"))
        .spawn(move || {
            tracing::debug!(%facing, "Controller worker started");
            while let Ok(message) = rx.recv() {
                if !machine.handle(message) {
                    break;
                }
            }
            tracing::debug!(%facing, "Controller worker exiting");
        })
}

//! Status snapshots published by a controller's worker.
//!
//! The worker is the only writer. Readers get copies and can block until a
//! predicate holds.

use super::ControllerState;
use crate::device::Facing;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Running counters for one controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub opens: u64,
    pub open_failures: u64,
    pub configure_failures: u64,
    pub disconnects: u64,
    pub stills_captured: u64,
    pub still_failures: u64,
    pub sink_failures: u64,
}

/// Point-in-time view of a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub facing: Facing,
    pub state: ControllerState,
    /// A device connection is held.
    pub device_live: bool,
    /// A configured session is held.
    pub session_live: bool,
    /// A stop is waiting for the in-flight step to resolve.
    pub stop_pending: bool,
    /// Commands the worker has applied so far.
    pub commands_applied: u64,
    pub stats: ControllerStats,
}

impl ControllerStatus {
    pub fn new(facing: Facing) -> Self {
        Self {
            facing,
            state: ControllerState::Closed,
            device_live: false,
            session_live: false,
            stop_pending: false,
            commands_applied: 0,
            stats: ControllerStats::default(),
        }
    }
}

pub(crate) struct StatusCell {
    status: Mutex<ControllerStatus>,
    changed: Condvar,
}

impl StatusCell {
    pub(crate) fn new(facing: Facing) -> Self {
        Self {
            status: Mutex::new(ControllerStatus::new(facing)),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn publish(&self, status: ControllerStatus) {
        *self.status.lock() = status;
        self.changed.notify_all();
    }

    pub(crate) fn snapshot(&self) -> ControllerStatus {
        self.status.lock().clone()
    }

    /// Blocks until `predicate` holds or `timeout` elapses.
    pub(crate) fn wait_until(
        &self,
        predicate: impl Fn(&ControllerStatus) -> bool,
        timeout: Duration,
    ) -> Option<ControllerStatus> {
        let deadline = Instant::now() + timeout;
        let mut status = self.status.lock();
        while !predicate(&status) {
            if self.changed.wait_until(&mut status, deadline).timed_out() {
                return predicate(&status).then(|| status.clone());
            }
        }
        Some(status.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_times_out() {
        let cell = StatusCell::new(Facing::Back);
        let result = cell.wait_until(
            |s| s.state == ControllerState::Streaming,
            Duration::from_millis(20),
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_wait_wakes_on_publish() {
        let cell = Arc::new(StatusCell::new(Facing::Back));
        let writer = Arc::clone(&cell);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let mut status = ControllerStatus::new(Facing::Back);
            status.state = ControllerState::Streaming;
            writer.publish(status);
        });

        let status = cell
            .wait_until(
                |s| s.state == ControllerState::Streaming,
                Duration::from_secs(2),
            )
            .unwrap();
        assert_eq!(status.state, ControllerState::Streaming);
        handle.join().unwrap();
    }
}

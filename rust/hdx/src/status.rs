//! Aggregate status of a data mover's outstanding transfers.

use std::fmt;

/// Coarse state of a data mover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// No transfer in flight and no unreported failure.
    Idle,
    /// At least one asynchronous transfer is still in flight.
    Busy,
    /// A transfer failed since the last `sync()`.
    Error,
}

/// Snapshot returned by `DataMover::get_status()`.
///
/// `state` is `Error` whenever `failed > 0`, otherwise `Busy` whenever
/// `in_flight > 0`, otherwise `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceStatus {
    pub state: DeviceState,
    /// Transfers issued asynchronously that have not reached a terminal state.
    pub in_flight: usize,
    /// Failed transfers not yet reported by a `sync()`.
    pub failed: usize,
}

impl DeviceStatus {
    pub fn new(in_flight: usize, failed: usize) -> DeviceStatus {
        let state = if failed > 0 {
            DeviceState::Error
        } else if in_flight > 0 {
            DeviceState::Busy
        } else {
            DeviceState::Idle
        };
        DeviceStatus {
            state,
            in_flight,
            failed,
        }
    }

    pub fn idle() -> DeviceStatus {
        DeviceStatus::new(0, 0)
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.state == DeviceState::Idle
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }

    #[inline]
    pub fn has_failed(&self) -> bool {
        self.failed > 0
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::idle()
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} (in flight: {}, failed: {})",
            self.state, self.in_flight, self.failed
        )
    }
}

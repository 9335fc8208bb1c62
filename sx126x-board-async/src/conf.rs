//! Transport timing parameters.

use embassy_time::Duration;

/// Timing used by [`crate::Sx126xTransport`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// How long the BUSY line may stay high before a command is abandoned.
    pub busy_timeout: Duration,
    /// How long NRESET is held low. The datasheet asks for at least 100 µs.
    pub reset_hold: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(100),
            reset_hold: Duration::from_micros(200),
        }
    }
}

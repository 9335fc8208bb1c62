//! SPI and DMA configuration parameters.

use embassy_time::Duration;
use embedded_hal::spi::{Mode, MODE_0, MODE_1, MODE_2, MODE_3};

use crate::dma::{DmaChannel, DEFAULT_CHUNK_SIZE};

/// Frequency of the clock feeding the SPI peripheral.
pub const SPI_SOURCE_CLOCK_HZ: u32 = 40_000_000;

/// Largest clock divider the SPI peripheral supports.
pub const MAX_CLOCK_DIVIDER: u32 = 256;

/// Slowest SPI clock reachable with [`MAX_CLOCK_DIVIDER`].
pub const MIN_SPI_FREQUENCY_HZ: u32 = SPI_SOURCE_CLOCK_HZ / MAX_CLOCK_DIVIDER;

/// An invalid SPI or DMA setting, detected at setup time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The requested SPI clock cannot be produced by any divider.
    FrequencyOutOfRange(u32),
    /// Polarity/phase selectors are `0..=3`.
    InvalidPolarPhase(u8),
}

/// The role the SPI peripheral plays on the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpiRole {
    /// The MCU drives the clock.
    Controller,
    /// The MCU follows an external clock.
    Peripheral,
}

/// Converts a combined polarity/phase selector into an SPI mode.
///
/// `0`: CPOL=0 CPHA=0, `1`: CPOL=0 CPHA=1, `2`: CPOL=1 CPHA=0, `3`: CPOL=1 CPHA=1.
pub fn mode_from_polar_phase(polar_phase: u8) -> Result<Mode, ConfigError> {
    match polar_phase {
        0 => Ok(MODE_0),
        1 => Ok(MODE_1),
        2 => Ok(MODE_2),
        3 => Ok(MODE_3),
        other => Err(ConfigError::InvalidPolarPhase(other)),
    }
}

/// Resolves a requested SPI clock to one the divider can produce.
///
/// Exact rates are returned unchanged. Otherwise the nearest reachable rate is picked,
/// preferring the slower one on a tie.
pub fn resolve_frequency(requested: u32) -> Result<u32, ConfigError> {
    for divider in 1..=MAX_CLOCK_DIVIDER {
        let rate = SPI_SOURCE_CLOCK_HZ / divider;
        if rate == requested {
            return Ok(rate);
        }
        if rate < requested {
            if divider == 1 {
                return Err(ConfigError::FrequencyOutOfRange(requested));
            }
            let faster = SPI_SOURCE_CLOCK_HZ / (divider - 1);
            let resolved = if faster - requested < requested - rate {
                faster
            } else {
                rate
            };
            log::debug!("spi: {requested} Hz not reachable, using {resolved} Hz");
            return Ok(resolved);
        }
    }
    Err(ConfigError::FrequencyOutOfRange(requested))
}

/// Time `len` bytes spend on the wire at `frequency` Hz, rounded up to a microsecond.
pub fn wire_time(len: usize, frequency: u32) -> Duration {
    let bits = len as u64 * 8;
    Duration::from_micros((bits * 1_000_000).div_ceil(u64::from(frequency.max(1))))
}

/// Configuration of the SPI peripheral driven by the DMA engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SpiConfig {
    /// Controller or peripheral role.
    pub role: SpiRole,
    /// Clock polarity and phase.
    pub mode: Mode,
    /// Requested SPI clock in Hz. See [`resolve_frequency`].
    pub frequency: u32,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            role: SpiRole::Controller,
            mode: MODE_0,
            frequency: 200_000,
        }
    }
}

impl SpiConfig {
    /// Sets the clock polarity and phase from a `0..=3` selector.
    pub fn with_polar_phase(mut self, polar_phase: u8) -> Result<Self, ConfigError> {
        self.mode = mode_from_polar_phase(polar_phase)?;
        Ok(self)
    }

    /// The clock rate the peripheral will actually run at.
    pub fn resolved_frequency(&self) -> Result<u32, ConfigError> {
        resolve_frequency(self.frequency)
    }

    /// Divider applied to [`SPI_SOURCE_CLOCK_HZ`] for every clock phase
    /// (start, stop, both data phases and the inter-frame interval).
    pub fn clock_divider(&self) -> Result<u16, ConfigError> {
        let rate = self.resolved_frequency()?;
        Ok((SPI_SOURCE_CLOCK_HZ / rate) as u16)
    }
}

/// DMA channel assignment and transfer limits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DmaConfig {
    /// Channel moving memory to the SPI transmit FIFO.
    pub tx_channel: DmaChannel,
    /// Channel moving the SPI receive FIFO to memory.
    pub rx_channel: DmaChannel,
    /// Bytes moved per descriptor, at most [`crate::dma::MAX_CHUNK_SIZE`].
    pub chunk_size: usize,
    /// Slack allowed on top of a transfer's wire time before it is abandoned.
    pub timeout: Duration,
}

impl DmaConfig {
    /// Deadline for moving `len` bytes at `frequency` Hz: the wire time plus
    /// [`timeout`](Self::timeout).
    pub fn transfer_timeout(&self, len: usize, frequency: u32) -> Duration {
        wire_time(len, frequency) + self.timeout
    }
}

impl Default for DmaConfig {
    fn default() -> Self {
        Self {
            tx_channel: DmaChannel(2),
            rx_channel: DmaChannel(3),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_rates_are_kept() {
        assert_eq!(resolve_frequency(40_000_000), Ok(40_000_000));
        assert_eq!(resolve_frequency(200_000), Ok(200_000));
        assert_eq!(resolve_frequency(MIN_SPI_FREQUENCY_HZ), Ok(156_250));
    }

    #[test]
    fn unreachable_rates_snap_to_nearest() {
        // 40 MHz / 3 = 13.33 MHz, 40 MHz / 2 = 20 MHz
        assert_eq!(resolve_frequency(14_000_000), Ok(13_333_333));
        assert_eq!(resolve_frequency(19_000_000), Ok(20_000_000));
    }

    #[test]
    fn out_of_range_rates_are_rejected() {
        assert_eq!(
            resolve_frequency(41_000_000),
            Err(ConfigError::FrequencyOutOfRange(41_000_000))
        );
        assert_eq!(
            resolve_frequency(150_000),
            Err(ConfigError::FrequencyOutOfRange(150_000))
        );
    }

    #[test]
    fn divider_matches_resolved_rate() {
        let conf = SpiConfig::default();
        assert_eq!(conf.clock_divider(), Ok(200));
        let conf = SpiConfig {
            frequency: 8_000_000,
            ..SpiConfig::default()
        };
        assert_eq!(conf.clock_divider(), Ok(5));
    }

    #[test]
    fn polar_phase_selects_mode() {
        assert_eq!(mode_from_polar_phase(1), Ok(MODE_1));
        assert_eq!(mode_from_polar_phase(3), Ok(MODE_3));
        assert_eq!(
            SpiConfig::default().with_polar_phase(4),
            Err(ConfigError::InvalidPolarPhase(4))
        );
    }

    #[test]
    fn transfer_deadline_grows_with_length() {
        let dma = DmaConfig::default();
        assert_eq!(wire_time(1, 40_000_000), Duration::from_micros(1));
        // 5000 bytes at 200 kHz spend 200 ms on the wire
        assert_eq!(
            dma.transfer_timeout(5000, 200_000),
            Duration::from_millis(300)
        );
        assert_eq!(dma.transfer_timeout(0, 200_000), dma.timeout);
    }
}

//! Error types for the SX126x transport.

use core::fmt::{self, Debug};

/// An error related to SPI communication.
pub enum SpiError<TSPIERR> {
    /// An error occurred during a `write` operation.
    Write(TSPIERR),
    /// An error occurred during a `transfer` operation.
    Transfer(TSPIERR),
}

impl<TSPIERR: Debug> Debug for SpiError<TSPIERR> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write(err) => write!(f, "Write({err:?})"),
            Self::Transfer(err) => write!(f, "Transfer({err:?})"),
        }
    }
}

/// An error related to GPIO pin operations.
pub enum PinError<TPINERR> {
    /// An error occurred on an output pin.
    Output(TPINERR),
    /// An error occurred on an input pin.
    Input(TPINERR),
}

impl<TPINERR: Debug> Debug for PinError<TPINERR> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output(err) => write!(f, "Output({err:?})"),
            Self::Input(err) => write!(f, "Input({err:?})"),
        }
    }
}

/// The main error type for the SX126x transport.
pub enum SxError<TSPIERR, TPINERR> {
    /// An SPI-related error.
    Spi(SpiError<TSPIERR>),
    /// A pin-related error.
    Pin(PinError<TPINERR>),
    /// The BUSY line did not go low in time.
    BusyTimeout,
}

impl<TSPIERR: Debug, TPINERR: Debug> Debug for SxError<TSPIERR, TPINERR> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spi(err) => write!(f, "Spi({err:?})"),
            Self::Pin(err) => write!(f, "Pin({err:?})"),
            Self::BusyTimeout => write!(f, "BusyTimeout"),
        }
    }
}

impl<TSPIERR, TPINERR> From<SpiError<TSPIERR>> for SxError<TSPIERR, TPINERR> {
    fn from(spi_err: SpiError<TSPIERR>) -> Self {
        SxError::Spi(spi_err)
    }
}

impl<TSPIERR, TPINERR> From<PinError<TPINERR>> for SxError<TSPIERR, TPINERR> {
    fn from(pin_err: PinError<TPINERR>) -> Self {
        SxError::Pin(pin_err)
    }
}

impl<TSPIERR: PartialEq> PartialEq for SpiError<TSPIERR> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Write(a), Self::Write(b)) | (Self::Transfer(a), Self::Transfer(b)) => a == b,
            _ => false,
        }
    }
}

impl<TPINERR: PartialEq> PartialEq for PinError<TPINERR> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Output(a), Self::Output(b)) | (Self::Input(a), Self::Input(b)) => a == b,
            _ => false,
        }
    }
}

impl<TSPIERR: PartialEq, TPINERR: PartialEq> PartialEq for SxError<TSPIERR, TPINERR> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Spi(a), Self::Spi(b)) => a == b,
            (Self::Pin(a), Self::Pin(b)) => a == b,
            (Self::BusyTimeout, Self::BusyTimeout) => true,
            _ => false,
        }
    }
}

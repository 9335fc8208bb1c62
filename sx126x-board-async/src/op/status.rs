//! The status byte returned by every read command.

/// Chip mode, bits 6:4 of the status byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChipMode {
    StandbyRc,
    StandbyXosc,
    Fs,
    Rx,
    Tx,
    Unknown(u8),
}

/// Outcome of the previous command, bits 3:1 of the status byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    DataAvailable,
    CommandTimeout,
    ProcessingError,
    FailureToExecute,
    TxDone,
    Unknown(u8),
}

/// Radio status byte.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Status {
    inner: u8,
}

impl From<u8> for Status {
    fn from(status: u8) -> Self {
        Self { inner: status }
    }
}

impl From<Status> for u8 {
    fn from(val: Status) -> Self {
        val.inner
    }
}

impl core::fmt::Debug for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Status")
            .field("chip_mode", &self.chip_mode())
            .field("command_status", &self.command_status())
            .finish()
    }
}

impl Status {
    pub fn chip_mode(self) -> ChipMode {
        match (self.inner >> 4) & 0x07 {
            0x2 => ChipMode::StandbyRc,
            0x3 => ChipMode::StandbyXosc,
            0x4 => ChipMode::Fs,
            0x5 => ChipMode::Rx,
            0x6 => ChipMode::Tx,
            other => ChipMode::Unknown(other),
        }
    }

    pub fn command_status(self) -> CommandStatus {
        match (self.inner >> 1) & 0x07 {
            0x2 => CommandStatus::DataAvailable,
            0x3 => CommandStatus::CommandTimeout,
            0x4 => CommandStatus::ProcessingError,
            0x5 => CommandStatus::FailureToExecute,
            0x6 => CommandStatus::TxDone,
            other => CommandStatus::Unknown(other),
        }
    }

    /// The previous command was rejected or timed out.
    pub fn is_error(self) -> bool {
        matches!(
            self.command_status(),
            CommandStatus::CommandTimeout
                | CommandStatus::ProcessingError
                | CommandStatus::FailureToExecute
        )
    }
}

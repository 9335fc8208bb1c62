//! SX126x command opcodes and the status byte.

mod status;

pub use status::*;

/// Command opcodes, as sent in the first byte of every SPI frame.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpCode {
    GetStatus = 0xC0,
    WriteRegister = 0x0D,
    ReadRegister = 0x1D,
    WriteBuffer = 0x0E,
    ReadBuffer = 0x1E,
    SetSleep = 0x84,
    SetStandby = 0x80,
    SetFs = 0xC1,
    SetTx = 0x83,
    SetRx = 0x82,
    SetPacketType = 0x8A,
    SetRfFrequency = 0x86,
    SetTxParams = 0x8E,
    SetPaConfig = 0x95,
    SetModulationParams = 0x8B,
    SetPacketParams = 0x8C,
    SetBufferBaseAddress = 0x8F,
    SetDioIrqParams = 0x08,
    GetIrqStatus = 0x12,
    ClearIrqStatus = 0x02,
    SetDio2AsRfSwitchCtrl = 0x9D,
    SetDio3AsTcxoCtrl = 0x97,
    Calibrate = 0x89,
    CalibrateImage = 0x98,
    GetRxBufferStatus = 0x13,
    GetPacketStatus = 0x14,
    GetStats = 0x10,
    GetDeviceErrors = 0x17,
    ClearDeviceErrors = 0x07,
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        val as u8
    }
}

/// Operating mode the host last put the radio in.
///
/// The radio cannot be queried while asleep, so the transport keeps track of it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OperatingMode {
    Sleep,
    #[default]
    StandbyRc,
    StandbyXosc,
    Fs,
    Tx,
    Rx,
    Cad,
}

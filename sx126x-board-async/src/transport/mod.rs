//! The synchronous command and register transport of the SX126x.
//!
//! Every exchange is one chip-select framed SPI transaction. The radio holds BUSY high
//! while it processes a command, so the transport waits for BUSY to drop before and
//! after every frame, each wait bounded by [`TransportConfig::busy_timeout`].

pub(crate) mod err;

use embassy_time::{with_timeout, Timer};
use embedded_hal::digital::InputPin;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::spi::Operation;
use embedded_hal_async::spi::SpiDevice;
use spi_dma_async::bus::DmaSpiBus;
use spi_dma_async::spi::RwLockDevice;

use crate::conf::TransportConfig;
use crate::op::{OpCode, OperatingMode, Status};

pub use self::err::{PinError, SpiError, SxError};

/// (BUSY, NRESET)
pub type Pins<TBUSY, TNRST> = (TBUSY, TNRST);

/// A transport whose SPI frames are moved by the DMA engine.
pub type DmaTransport<'s, P, CS, D, TBUSY, TNRST> =
    Sx126xTransport<RwLockDevice<DmaSpiBus<'s, P>, CS, D>, TBUSY, TNRST>;

const NOP: u8 = 0x00;

/// Command and register access to a Semtech SX1261/62.
pub struct Sx126xTransport<TSPI, TBUSY, TNRST> {
    spi: TSPI,
    busy_pin: TBUSY,
    nrst_pin: TNRST,
    config: TransportConfig,
    mode: OperatingMode,
}

impl<TSPI, TBUSY, TNRST, TSPIERR, TPINERR> Sx126xTransport<TSPI, TBUSY, TNRST>
where
    TPINERR: core::fmt::Debug,
    TSPI: SpiDevice<Error = TSPIERR>,
    TBUSY: InputPin<Error = TPINERR> + Wait,
    TNRST: OutputPin<Error = TPINERR>,
{
    /// Creates a new transport.
    ///
    /// # Arguments
    ///
    /// * `spi` - The radio's SPI device, framing transactions with its chip-select.
    /// * `pins` - The (BUSY, NRESET) pins.
    /// * `config` - Busy and reset timing.
    pub fn new(spi: TSPI, pins: Pins<TBUSY, TNRST>, config: TransportConfig) -> Self {
        let (busy_pin, nrst_pin) = pins;
        Self {
            spi,
            busy_pin,
            nrst_pin,
            config,
            mode: OperatingMode::default(),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The operating mode the radio was last put in.
    pub fn operating_mode(&self) -> OperatingMode {
        self.mode
    }

    /// Records a mode change made by the layer above, e.g. after `SetRx`.
    pub fn set_operating_mode(&mut self, mode: OperatingMode) {
        log::trace!("sx126x::mode {:?} -> {mode:?}", self.mode);
        self.mode = mode;
    }

    /// Gives back the SPI device and pins.
    pub fn release(self) -> (TSPI, Pins<TBUSY, TNRST>) {
        (self.spi, (self.busy_pin, self.nrst_pin))
    }

    /// Sends `opcode` followed by `buffer`.
    pub async fn write_command(
        &mut self,
        opcode: OpCode,
        buffer: &[u8],
    ) -> Result<(), SxError<TSPIERR, TPINERR>> {
        self.ensure_ready().await?;
        log::trace!("sx126x::write_command {opcode:?} {buffer:02x?}");
        let mut ops = [Operation::Write(&[opcode as u8]), Operation::Write(buffer)];
        self.spi
            .transaction(&mut ops)
            .await
            .map_err(SpiError::Write)?;

        if opcode == OpCode::SetSleep {
            // BUSY stays high while the radio sleeps.
            self.set_operating_mode(OperatingMode::Sleep);
            return Ok(());
        }
        self.wait_on_busy().await
    }

    /// Sends `opcode` and fills `buffer` with the reply.
    ///
    /// Returns the status byte the radio clocks out right after the opcode.
    pub async fn read_command(
        &mut self,
        opcode: OpCode,
        buffer: &mut [u8],
    ) -> Result<Status, SxError<TSPIERR, TPINERR>> {
        self.ensure_ready().await?;
        let mut status = [NOP];
        let mut ops = [
            Operation::Write(&[opcode as u8]),
            Operation::Read(&mut status),
            Operation::Read(buffer),
        ];
        self.spi
            .transaction(&mut ops)
            .await
            .map_err(SpiError::Transfer)?;
        let status = Status::from(status[0]);
        log::trace!("sx126x::read_command {opcode:?} {status:?} {buffer:02x?}");
        self.wait_on_busy().await?;
        Ok(status)
    }

    /// Writes `data` to consecutive registers starting at `address`.
    pub async fn write_registers(
        &mut self,
        address: u16,
        data: &[u8],
    ) -> Result<(), SxError<TSPIERR, TPINERR>> {
        self.ensure_ready().await?;
        let start_addr = address.to_be_bytes();
        let mut ops = [
            Operation::Write(&[OpCode::WriteRegister as u8]),
            Operation::Write(&start_addr),
            Operation::Write(data),
        ];
        self.spi
            .transaction(&mut ops)
            .await
            .map_err(SpiError::Write)?;
        log::trace!("sx126x::write_registers {address:#06x} {data:02x?}");
        self.wait_on_busy().await
    }

    /// Writes a single register.
    pub async fn write_register(
        &mut self,
        address: u16,
        value: u8,
    ) -> Result<(), SxError<TSPIERR, TPINERR>> {
        self.write_registers(address, &[value]).await
    }

    /// Reads consecutive registers starting at `address` into `result`.
    pub async fn read_registers(
        &mut self,
        address: u16,
        result: &mut [u8],
    ) -> Result<(), SxError<TSPIERR, TPINERR>> {
        self.ensure_ready().await?;
        let start_addr = address.to_be_bytes();
        let mut status = [NOP];
        let mut ops = [
            Operation::Write(&[OpCode::ReadRegister as u8]),
            Operation::Write(&start_addr),
            Operation::Read(&mut status),
            Operation::Read(result),
        ];
        self.spi
            .transaction(&mut ops)
            .await
            .map_err(SpiError::Transfer)?;
        log::trace!("sx126x::read_registers {address:#06x} {result:02x?}");
        self.wait_on_busy().await
    }

    /// Reads a single register.
    pub async fn read_register(&mut self, address: u16) -> Result<u8, SxError<TSPIERR, TPINERR>> {
        let mut value = [NOP];
        self.read_registers(address, &mut value).await?;
        Ok(value[0])
    }

    /// Writes `data` to the radio's data buffer at `offset`.
    pub async fn write_buffer(
        &mut self,
        offset: u8,
        data: &[u8],
    ) -> Result<(), SxError<TSPIERR, TPINERR>> {
        self.ensure_ready().await?;
        let header = [OpCode::WriteBuffer as u8, offset];
        let mut ops = [Operation::Write(&header), Operation::Write(data)];
        self.spi
            .transaction(&mut ops)
            .await
            .map_err(SpiError::Write)?;
        self.wait_on_busy().await
    }

    /// Reads the radio's data buffer at `offset` into `result`.
    pub async fn read_buffer(
        &mut self,
        offset: u8,
        result: &mut [u8],
    ) -> Result<(), SxError<TSPIERR, TPINERR>> {
        self.ensure_ready().await?;
        let header = [OpCode::ReadBuffer as u8, offset];
        let mut status = [NOP];
        let mut ops = [
            Operation::Write(&header),
            Operation::Read(&mut status),
            Operation::Read(result),
        ];
        self.spi
            .transaction(&mut ops)
            .await
            .map_err(SpiError::Transfer)?;
        self.wait_on_busy().await
    }

    /// Gets the current status of the modem.
    pub async fn get_status(&mut self) -> Result<Status, SxError<TSPIERR, TPINERR>> {
        self.read_command(OpCode::GetStatus, &mut []).await
    }

    /// Resets the device by pulling the NRESET pin low.
    pub async fn reset(&mut self) -> Result<(), SxError<TSPIERR, TPINERR>> {
        log::trace!("sx126x::reset");
        self.nrst_pin.set_low().map_err(PinError::Output)?;
        Timer::after(self.config.reset_hold).await;
        self.nrst_pin.set_high().map_err(PinError::Output)?;
        self.wait_on_busy().await?;
        self.set_operating_mode(OperatingMode::StandbyRc);
        Ok(())
    }

    /// Wakes the radio from sleep.
    ///
    /// The chip-select edge of a GetStatus frame wakes the radio, which then holds
    /// BUSY until it reaches standby.
    pub async fn wakeup(&mut self) -> Result<(), SxError<TSPIERR, TPINERR>> {
        log::trace!("sx126x::wakeup");
        self.spi
            .write(&[OpCode::GetStatus as u8, NOP])
            .await
            .map_err(SpiError::Write)?;
        self.wait_on_busy().await?;
        self.set_operating_mode(OperatingMode::StandbyRc);
        Ok(())
    }

    /// Checks if the modem's BUSY pin is high.
    pub fn is_busy(&mut self) -> bool {
        self.busy_pin.is_high().unwrap_or(true)
    }

    /// Waits until the BUSY pin goes low, at most `busy_timeout`.
    pub async fn wait_on_busy(&mut self) -> Result<(), SxError<TSPIERR, TPINERR>> {
        match with_timeout(self.config.busy_timeout, self.busy_pin.wait_for_low()).await {
            Ok(res) => res.map_err(PinError::Input).map_err(Into::into),
            Err(_) => {
                log::warn!(
                    "sx126x::busy still high after {} ms",
                    self.config.busy_timeout.as_millis()
                );
                Err(SxError::BusyTimeout)
            }
        }
    }

    async fn ensure_ready(&mut self) -> Result<(), SxError<TSPIERR, TPINERR>> {
        if self.mode == OperatingMode::Sleep {
            self.wakeup().await
        } else {
            self.wait_on_busy().await
        }
    }
}

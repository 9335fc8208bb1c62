//! A shared SPI bus implementation using `RwLock` for thread-safe access.
//!
//! This module provides `RwLockDevice`, a wrapper that allows multiple parts of an
//! application to share a single `SpiBus` instance. Each `RwLockDevice` manages its
//! own Chip Select (CS) pin, ensuring that only one device can communicate on the
//! bus at a time.

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, rwlock::RwLock};

use alloc::rc::Rc;
use core::fmt::Debug;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{Error, ErrorKind};
use embedded_hal::spi::{ErrorType, Operation};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::{SpiBus, SpiDevice};

/// A `RwLock`-based shared bus [`SpiDevice`] implementation.
///
/// This struct allows for sharing a single `SpiBus` among multiple device drivers.
/// It uses an `RwLock` to ensure exclusive access to the bus for each transaction.
/// Each `RwLockDevice` instance manages its own Chip Select (CS) pin.
pub struct RwLockDevice<BUS, CS, D> {
    bus: Rc<RwLock<CriticalSectionRawMutex, BUS>>,
    cs: CS,
    delay: D,
}

impl<BUS, CS, D> RwLockDevice<BUS, CS, D>
where
    CS: OutputPin,
{
    /// Creates a new `RwLockDevice` with its chip-select deasserted.
    ///
    /// # Arguments
    ///
    /// * `bus` - An `Rc<RwLock<...>>` wrapped SPI bus instance.
    /// * `cs` - The active-low Chip Select pin for this device.
    /// * `delay` - A delay provider that implements `DelayNs`.
    #[inline]
    pub fn new(
        bus: Rc<RwLock<CriticalSectionRawMutex, BUS>>,
        mut cs: CS,
        delay: D,
    ) -> Result<Self, CS::Error> {
        cs.set_high()?;
        Ok(Self { bus, cs, delay })
    }
}

impl<BUS, CS, D> ErrorType for RwLockDevice<BUS, CS, D>
where
    BUS: ErrorType,
    CS: OutputPin,
{
    type Error = DeviceError<BUS::Error, CS::Error>;
}

impl<BUS, CS, D> SpiDevice<u8> for RwLockDevice<BUS, CS, D>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    /// Performs an SPI transaction.
    ///
    /// This method acquires a write lock on the shared SPI bus, asserts the
    /// Chip Select pin, executes the provided operations, and then de-asserts
    /// the CS pin.
    #[inline]
    async fn transaction(
        &mut self,
        operations: &mut [Operation<'_, u8>],
    ) -> Result<(), Self::Error> {
        let bus = &mut *self.bus.write().await;

        let result = transaction(operations, bus, &mut self.delay, &mut self.cs).await;

        if let Err(err) = &result {
            log::warn!("Error communicating with the device: {err:?}");
        }

        result
    }
}

/// A common implementation to perform a transaction against the device.
///
/// This function handles the low-level details of an SPI transaction, including
/// asserting/de-asserting the CS pin and processing each operation. Processing
/// stops at the first failed operation.
#[inline]
pub async fn transaction<Word, BUS, CS, D>(
    operations: &mut [Operation<'_, Word>],
    bus: &mut BUS,
    delay: &mut D,
    cs: &mut CS,
) -> Result<(), DeviceError<BUS::Error, CS::Error>>
where
    BUS: SpiBus<Word> + ErrorType,
    CS: OutputPin,
    D: DelayNs,
    Word: Copy + 'static,
{
    cs.set_low().map_err(DeviceError::Cs)?;

    let op_res = {
        let mut result = Ok(());
        for op in operations {
            if let Err(err) = process_op::<BUS, D, Word>(bus, delay, op).await {
                log::warn!("Error communicating with the SPI device.");
                result = Err(err);
                break;
            }
        }
        result
    };

    // On failure, it's important to still flush and deassert CS.
    let flush_res = bus.flush().await;
    let cs_res = cs.set_high();

    op_res.map_err(DeviceError::Spi)?;
    flush_res.map_err(DeviceError::Spi)?;
    cs_res.map_err(DeviceError::Cs)?;

    Ok(())
}

/// An error type for `RwLockDevice` operations.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum DeviceError<BUS, CS> {
    /// An inner SPI bus operation failed.
    Spi(BUS),
    /// Asserting or deasserting the CS pin failed.
    Cs(CS),
}

impl<BUS, CS> Error for DeviceError<BUS, CS>
where
    BUS: Error + Debug,
    CS: Debug,
{
    #[inline]
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Spi(e) => e.kind(),
            Self::Cs(_) => ErrorKind::ChipSelectFault,
        }
    }
}

/// Processes a single SPI operation.
async fn process_op<'a, BUS: SpiBus<Word> + ErrorType, D: DelayNs, Word: Copy + 'static>(
    bus: &mut BUS,
    delay: &mut D,
    op: &mut Operation<'a, Word>,
) -> Result<(), <BUS as ErrorType>::Error> {
    match op {
        Operation::Read(buf) => bus.read(buf).await,
        Operation::Write(buf) => bus.write(buf).await,
        Operation::Transfer(read, write) => bus.transfer(read, write).await,
        Operation::TransferInPlace(buf) => bus.transfer_in_place(buf).await,
        Operation::DelayNs(ns) => {
            bus.flush().await?;
            delay.delay_ns(*ns).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::DmaSpiBus;
    use crate::conf::{DmaConfig, SpiConfig};
    use crate::dma::{DmaEngine, DmaError};
    use crate::mock::{MockDma, PortOp};
    use core::convert::Infallible;
    use embassy_futures::block_on;
    use std::cell::RefCell;
    use std::vec::Vec;

    #[derive(Clone, Default)]
    struct PinLog(Rc<RefCell<Vec<bool>>>);

    struct MockCs(PinLog);

    impl embedded_hal::digital::ErrorType for MockCs {
        type Error = Infallible;
    }

    impl OutputPin for MockCs {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.0 .0.borrow_mut().push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.0 .0.borrow_mut().push(true);
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    type Bus = DmaSpiBus<'static, MockDma>;

    fn shared_bus(port: MockDma) -> Rc<RwLock<CriticalSectionRawMutex, Bus>> {
        let signal = port.signal();
        let engine =
            DmaEngine::new(port, signal, SpiConfig::default(), DmaConfig::default()).unwrap();
        Rc::new(RwLock::new(DmaSpiBus::new(engine)))
    }

    #[test]
    fn transaction_is_framed_by_chip_select() {
        let port = MockDma::new();
        port.queue_miso(&[0xFF, 0xA2, 0x55]);
        let bus = shared_bus(port);
        let pins = PinLog::default();
        let mut device = RwLockDevice::new(bus.clone(), MockCs(pins.clone()), NoDelay).unwrap();

        let mut status = [0u8; 1];
        let mut data = [0u8; 1];
        block_on(device.transaction(&mut [
            Operation::Write(&[0xC0]),
            Operation::Read(&mut status),
            Operation::Read(&mut data),
        ]))
        .unwrap();

        assert_eq!(status, [0xA2]);
        assert_eq!(data, [0x55]);
        assert_eq!(*pins.0.borrow(), [true, false, true]);
        let bus = block_on(bus.read());
        assert_eq!(bus.engine().port().sent(), [0xC0, 0x00, 0x00]);
    }

    #[test]
    fn failed_operation_still_releases_chip_select() {
        let port = MockDma::new();
        port.set_stalled(true);
        let bus = shared_bus(port);
        let pins = PinLog::default();
        let mut device = RwLockDevice::new(bus.clone(), MockCs(pins.clone()), NoDelay).unwrap();

        let result = block_on(device.transaction(&mut [
            Operation::Write(&[0x80, 0x00]),
            Operation::Write(&[0x8A, 0x01]),
        ]));

        assert_eq!(result, Err(DeviceError::Spi(DmaError::Timeout)));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Other);
        assert_eq!(*pins.0.borrow(), [true, false, true]);
        // the second write is never started
        let bus = block_on(bus.read());
        let loads = bus
            .engine()
            .port()
            .ops()
            .into_iter()
            .filter(|op| matches!(op, PortOp::Load(..)))
            .count();
        assert_eq!(loads, 2);
    }

    #[test]
    fn chip_select_fault_kind() {
        let err: DeviceError<DmaError, ()> = DeviceError::Cs(());
        assert_eq!(err.kind(), ErrorKind::ChipSelectFault);
    }
}

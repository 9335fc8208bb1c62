//! An [`SpiBus`] that moves every operation through the DMA engine.

use embedded_hal::spi::ErrorType;
use embedded_hal_async::spi::SpiBus;

use crate::dma::{DmaEngine, DmaError, DmaPort};

/// Word clocked out while only reading.
pub const DEFAULT_FILL: u8 = 0x00;

/// SPI bus backed by a [`DmaEngine`].
///
/// Each operation is awaited to completion, so [`SpiBus::flush`] has nothing left to
/// wait for.
pub struct DmaSpiBus<'s, P> {
    engine: DmaEngine<'s, P>,
    fill: u8,
}

impl<'s, P> DmaSpiBus<'s, P>
where
    P: DmaPort,
{
    pub fn new(engine: DmaEngine<'s, P>) -> Self {
        Self {
            engine,
            fill: DEFAULT_FILL,
        }
    }

    /// Word sent during reads and read-only tails of uneven transfers.
    pub fn with_fill(mut self, fill: u8) -> Self {
        self.fill = fill;
        self
    }

    pub fn engine(&self) -> &DmaEngine<'s, P> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut DmaEngine<'s, P> {
        &mut self.engine
    }

    pub fn release(self) -> DmaEngine<'s, P> {
        self.engine
    }
}

impl<P> ErrorType for DmaSpiBus<'_, P> {
    type Error = DmaError;
}

impl<P> SpiBus<u8> for DmaSpiBus<'_, P>
where
    P: DmaPort,
{
    async fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        if words.is_empty() {
            return Ok(());
        }
        self.engine.read(words, self.fill).await
    }

    async fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        if words.is_empty() {
            return Ok(());
        }
        self.engine.write(words).await
    }

    async fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let common = read.len().min(write.len());
        if common > 0 {
            self.engine
                .transfer(&write[..common], &mut read[..common])
                .await?;
        }
        if write.len() > common {
            self.engine.write(&write[common..]).await
        } else if read.len() > common {
            self.engine.read(&mut read[common..], self.fill).await
        } else {
            Ok(())
        }
    }

    async fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        if words.is_empty() {
            return Ok(());
        }
        self.engine.transfer_in_place(words).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

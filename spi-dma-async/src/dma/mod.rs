//! SPI-over-DMA transfer engine.
//!
//! A transfer is described by two [`DescriptorChains`] (send and receive), loaded onto
//! one DMA channel each. The channel interrupt handlers report completion through a
//! shared [`CompletionSignal`] and the engine awaits both directions with a timeout.

mod chain;
mod signal;

pub use chain::{
    build_chains, DescriptorChains, DmaControl, DmaDescriptor, FifoAddrs, DEFAULT_CHUNK_SIZE,
    MAX_CHUNK_SIZE,
};
pub use signal::{CompletionSignal, ALL_DONE, RX_DONE, TX_DONE};

use core::fmt::Debug;

use embassy_time::{with_timeout, Duration};
use embedded_hal::spi::{Error, ErrorKind};

use crate::conf::{ConfigError, DmaConfig, SpiConfig, SpiRole};

/// A DMA controller channel number.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DmaChannel(pub u8);

/// Which way a channel moves data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Memory to the SPI transmit FIFO.
    MemoryToPeripheral,
    /// SPI receive FIFO to memory.
    PeripheralToMemory,
}

/// Register-level access to the DMA controller and the SPI peripheral it feeds.
///
/// The platform's channel interrupt handlers are expected to clear the channel's
/// terminal-count flag and call [`CompletionSignal::signal_tx`] or
/// [`CompletionSignal::signal_rx`].
pub trait DmaPort {
    /// Address of the SPI transmit FIFO register.
    fn tx_fifo(&self) -> usize;

    /// Address of the SPI receive FIFO register.
    fn rx_fifo(&self) -> usize;

    /// Applies role, mode and clock divider. Called once by [`DmaEngine::new`].
    fn configure_spi(&mut self, config: &SpiConfig, clock_divider: u16);

    fn disable_channel(&mut self, channel: DmaChannel);

    /// Clears a pending terminal-count interrupt of `channel`.
    fn clear_channel_interrupt(&mut self, channel: DmaChannel);

    fn enable_controller(&mut self);

    fn enable_spi(&mut self, role: SpiRole);

    /// Points `channel` at the head of a descriptor chain.
    fn load_chain(&mut self, channel: DmaChannel, direction: Direction, head: &DmaDescriptor);

    fn enable_channel(&mut self, channel: DmaChannel);
}

/// DMA transfer errors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DmaError {
    /// Chunk sizes must be in `1..=MAX_CHUNK_SIZE`.
    InvalidChunkSize(usize),
    /// A zero-length chain was requested.
    EmptyTransfer,
    /// Send and receive buffers differ in length.
    LengthMismatch { send: usize, receive: usize },
    /// The descriptor array could not be allocated.
    OutOfMemory,
    /// The completion interrupts did not arrive in time.
    Timeout,
}

impl Error for DmaError {
    #[inline]
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Drives SPI transfers through a pair of DMA channels.
pub struct DmaEngine<'s, P> {
    port: P,
    signal: &'s CompletionSignal,
    spi: SpiConfig,
    dma: DmaConfig,
    /// Resolved SPI clock in Hz.
    frequency: u32,
}

impl<'s, P> DmaEngine<'s, P>
where
    P: DmaPort,
{
    /// Configures the SPI peripheral and takes ownership of the port.
    ///
    /// `signal` must be the one the channel interrupt handlers report to.
    pub fn new(
        mut port: P,
        signal: &'s CompletionSignal,
        spi: SpiConfig,
        dma: DmaConfig,
    ) -> Result<Self, ConfigError> {
        let frequency = spi.resolved_frequency()?;
        let divider = spi.clock_divider()?;
        log::debug!(
            "dma: spi {:?} {:?} divider {divider}, channels tx {} rx {}",
            spi.role,
            spi.mode,
            dma.tx_channel.0,
            dma.rx_channel.0
        );
        port.configure_spi(&spi, divider);
        Ok(Self {
            port,
            signal,
            spi,
            dma,
            frequency,
        })
    }

    pub fn spi_config(&self) -> &SpiConfig {
        &self.spi
    }

    pub fn dma_config(&self) -> &DmaConfig {
        &self.dma
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn signal(&self) -> &'s CompletionSignal {
        self.signal
    }

    /// FIFO addresses to build chains against.
    pub fn fifos(&self) -> FifoAddrs {
        FifoAddrs {
            tx: self.port.tx_fifo(),
            rx: self.port.rx_fifo(),
        }
    }

    /// Starts the hardware on `chains` and returns without waiting.
    ///
    /// Whatever a previous transfer left behind is torn down first: both channels
    /// are disabled and their interrupt flags cleared before the new chains are
    /// loaded.
    ///
    /// # Safety
    ///
    /// The hardware keeps writing through `chains` until the returned [`Transfer`]
    /// completes or is dropped. The caller must not leak it (`mem::forget`, a
    /// reference cycle), otherwise the buffers behind `chains` may be freed while
    /// both channels are still enabled. [`transfer`](Self::transfer),
    /// [`write`](Self::write) and [`read`](Self::read) wrap this safely.
    pub unsafe fn start_transfer<'t>(
        &'t mut self,
        chains: &'t DescriptorChains<'t>,
    ) -> Transfer<'t, 's, P> {
        let DmaConfig {
            tx_channel,
            rx_channel,
            ..
        } = self.dma;

        self.signal.clear();

        self.port.disable_channel(tx_channel);
        self.port.disable_channel(rx_channel);
        self.port.clear_channel_interrupt(tx_channel);
        self.port.clear_channel_interrupt(rx_channel);

        self.port.enable_controller();
        self.port.enable_spi(self.spi.role);

        self.port
            .load_chain(tx_channel, Direction::MemoryToPeripheral, chains.tx_head());
        self.port
            .load_chain(rx_channel, Direction::PeripheralToMemory, chains.rx_head());

        log::trace!(
            "dma: start {} bytes, {} descriptors per direction",
            chains.len(),
            chains.tx().len()
        );

        self.port.enable_channel(tx_channel);
        self.port.enable_channel(rx_channel);

        Transfer {
            engine: self,
            _chains: chains,
            finished: false,
        }
    }

    /// Full-duplex transfer of two equally sized buffers.
    pub async fn transfer(&mut self, send: &[u8], receive: &mut [u8]) -> Result<(), DmaError> {
        let chains = build_chains(
            send,
            receive,
            send.len(),
            self.dma.chunk_size,
            self.fifos(),
        )?;
        self.run(&chains).await
    }

    /// Sends `send`, discarding the bytes clocked in.
    pub async fn write(&mut self, send: &[u8]) -> Result<(), DmaError> {
        let chains = DescriptorChains::write_only(send, self.fifos(), self.dma.chunk_size)?;
        self.run(&chains).await
    }

    /// Fills `receive` while clocking out `fill`.
    pub async fn read(&mut self, receive: &mut [u8], fill: u8) -> Result<(), DmaError> {
        let chains =
            DescriptorChains::read_only(receive, fill, self.fifos(), self.dma.chunk_size)?;
        self.run(&chains).await
    }

    /// Sends `words` and replaces them with the received bytes.
    pub async fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), DmaError> {
        let chains = DescriptorChains::in_place(words, self.fifos(), self.dma.chunk_size)?;
        self.run(&chains).await
    }

    async fn run(&mut self, chains: &DescriptorChains<'_>) -> Result<(), DmaError> {
        let timeout = self.dma.transfer_timeout(chains.len(), self.frequency);
        // SAFETY: the transfer is awaited to the end or dropped with this future.
        let transfer = unsafe { self.start_transfer(chains) };
        transfer.wait_completion(timeout).await
    }

    /// Stops both channels and drops any pending completion.
    pub fn halt(&mut self) {
        self.port.disable_channel(self.dma.tx_channel);
        self.port.disable_channel(self.dma.rx_channel);
        self.port.clear_channel_interrupt(self.dma.tx_channel);
        self.port.clear_channel_interrupt(self.dma.rx_channel);
        self.signal.clear();
    }

    /// Gives the port back.
    pub fn release(self) -> P {
        self.port
    }
}

/// An in-flight transfer.
///
/// Holds the engine and the descriptor chains borrowed until the transfer has
/// completed. Dropping it early halts both channels, so the chains and the buffers
/// behind them can be released.
#[must_use = "dropping a transfer halts it"]
pub struct Transfer<'t, 's, P>
where
    P: DmaPort,
{
    engine: &'t mut DmaEngine<'s, P>,
    _chains: &'t DescriptorChains<'t>,
    finished: bool,
}

impl<P> Transfer<'_, '_, P>
where
    P: DmaPort,
{
    /// Waits until both directions have signalled completion.
    pub async fn wait_completion(mut self, timeout: Duration) -> Result<(), DmaError> {
        let signal = self.engine.signal;
        match with_timeout(timeout, signal.wait(ALL_DONE)).await {
            Ok(()) => {
                self.finished = true;
                log::trace!("dma: transfer complete");
                Ok(())
            }
            Err(_) => {
                log::warn!(
                    "dma: transfer timed out after {} ms, completion bits {:#04x}",
                    timeout.as_millis(),
                    signal.bits()
                );
                Err(DmaError::Timeout)
            }
        }
    }
}

impl<P> Drop for Transfer<'_, '_, P>
where
    P: DmaPort,
{
    fn drop(&mut self) {
        if !self.finished {
            self.engine.halt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDma, PortOp};
    use embassy_futures::block_on;
    use std::vec;

    const TX: DmaChannel = DmaChannel(2);
    const RX: DmaChannel = DmaChannel(3);

    fn engine(port: MockDma) -> DmaEngine<'static, MockDma> {
        let signal = port.signal();
        DmaEngine::new(port, signal, SpiConfig::default(), DmaConfig::default()).unwrap()
    }

    #[test]
    fn new_configures_spi_divider() {
        let engine = engine(MockDma::new());
        assert_eq!(engine.port().ops(), [PortOp::ConfigureSpi(200)]);
    }

    #[test]
    fn bad_frequency_fails_setup() {
        let port = MockDma::new();
        let signal = port.signal();
        let spi = SpiConfig {
            frequency: 50_000_000,
            ..SpiConfig::default()
        };
        assert_eq!(
            DmaEngine::new(port, signal, spi, DmaConfig::default()).err(),
            Some(ConfigError::FrequencyOutOfRange(50_000_000))
        );
    }

    #[test]
    fn start_sequence_tears_down_before_loading() {
        let mut engine = engine(MockDma::new());
        engine.port.clear_ops();

        block_on(engine.transfer(&[1, 2, 3], &mut [0; 3])).unwrap();

        assert_eq!(
            engine.port().ops(),
            [
                PortOp::Disable(TX),
                PortOp::Disable(RX),
                PortOp::ClearInterrupt(TX),
                PortOp::ClearInterrupt(RX),
                PortOp::EnableController,
                PortOp::EnableSpi(SpiRole::Controller),
                PortOp::Load(TX, Direction::MemoryToPeripheral),
                PortOp::Load(RX, Direction::PeripheralToMemory),
                PortOp::Enable(TX),
                PortOp::Enable(RX),
            ]
        );
    }

    #[test]
    fn full_duplex_moves_bytes_both_ways() {
        let port = MockDma::new();
        port.queue_miso(&[0xAA, 0xBB, 0xCC]);
        let mut engine = engine(port);

        let mut receive = [0u8; 3];
        block_on(engine.transfer(&[1, 2, 3], &mut receive)).unwrap();

        assert_eq!(receive, [0xAA, 0xBB, 0xCC]);
        assert_eq!(engine.port().sent(), [1, 2, 3]);
        assert_eq!(engine.signal().tx_interrupts(), 1);
        assert_eq!(engine.signal().rx_interrupts(), 1);
    }

    #[test]
    fn multi_chunk_transfer_completes_once() {
        let port = MockDma::new();
        let mut engine = engine(port);

        let send: vec::Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let mut receive = vec![0u8; 5000];
        block_on(engine.transfer(&send, &mut receive)).unwrap();

        // with nothing queued the mock loops MOSI back to MISO
        assert_eq!(receive, send);
        assert_eq!(engine.signal().tx_interrupts(), 1);
    }

    #[test]
    fn consecutive_transfers_reset_channels() {
        let mut engine = engine(MockDma::new());

        block_on(engine.write(&[0x80, 0x00])).unwrap();
        // the mock leaves channels enabled with their interrupt pending
        assert!(engine.port().is_enabled(TX));
        assert!(engine.port().interrupt_pending(RX));

        engine.port.clear_ops();
        block_on(engine.write(&[0x0D, 0x08, 0xAC, 0x01])).unwrap();

        let ops = engine.port().ops();
        let first_load = ops
            .iter()
            .position(|op| matches!(op, PortOp::Load(..)))
            .unwrap();
        for ch in [TX, RX] {
            let disabled = ops.iter().position(|op| *op == PortOp::Disable(ch)).unwrap();
            let cleared = ops
                .iter()
                .position(|op| *op == PortOp::ClearInterrupt(ch))
                .unwrap();
            assert!(disabled < first_load);
            assert!(cleared < first_load);
        }
        assert_eq!(engine.port().sent(), [0x80, 0x00, 0x0D, 0x08, 0xAC, 0x01]);
    }

    #[test]
    fn stalled_transfer_times_out_and_halts() {
        let port = MockDma::new();
        port.set_stalled(true);
        let mut engine = engine(port);

        let result = block_on(engine.read(&mut [0u8; 4], 0xFF));

        assert_eq!(result, Err(DmaError::Timeout));
        assert!(!engine.port().is_enabled(TX));
        assert!(!engine.port().is_enabled(RX));
        assert_eq!(engine.signal().bits(), 0);
    }

    #[test]
    fn dropping_a_started_transfer_halts_both_channels() {
        let port = MockDma::new();
        port.set_stalled(true);
        let mut engine = engine(port);
        let fifos = engine.fifos();

        let send = [1u8, 2, 3];
        let mut receive = [0u8; 3];
        let chains = build_chains(&send, &mut receive, 3, DEFAULT_CHUNK_SIZE, fifos).unwrap();
        // SAFETY: the transfer is dropped while the chains are still alive.
        let transfer = unsafe { engine.start_transfer(&chains) };
        drop(transfer);

        assert!(!engine.port().is_enabled(TX));
        assert!(!engine.port().is_enabled(RX));
    }

    #[test]
    fn read_clocks_out_fill_byte() {
        let port = MockDma::new();
        port.queue_miso(&[7, 8]);
        let mut engine = engine(port);

        let mut receive = [0u8; 2];
        block_on(engine.read(&mut receive, 0x00)).unwrap();

        assert_eq!(receive, [7, 8]);
        assert_eq!(engine.port().sent(), [0x00, 0x00]);
    }

    #[test]
    fn in_place_replaces_words() {
        let port = MockDma::new();
        port.queue_miso(&[0xA2, 0x00, 0x12]);
        let mut engine = engine(port);

        let mut words = [0x1D, 0x07, 0x40];
        block_on(engine.transfer_in_place(&mut words)).unwrap();

        assert_eq!(words, [0xA2, 0x00, 0x12]);
        assert_eq!(engine.port().sent(), [0x1D, 0x07, 0x40]);
    }

    #[test]
    fn empty_transfer_is_rejected_before_touching_hardware() {
        let mut engine = engine(MockDma::new());
        engine.port.clear_ops();
        assert_eq!(block_on(engine.write(&[])), Err(DmaError::EmptyTransfer));
        assert!(engine.port().ops().is_empty());
    }
}

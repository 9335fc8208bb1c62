//! In-memory DMA controller for tests, here and in crates built on this one.
//!
//! Enabled by the `test-util` feature.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::conf::{SpiConfig, SpiRole};
use crate::dma::{CompletionSignal, DmaChannel, DmaDescriptor, DmaPort, Direction};

pub const TX_FIFO: usize = 0x4000_A288;
pub const RX_FIFO: usize = 0x4000_A28C;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortOp {
    ConfigureSpi(u16),
    Disable(DmaChannel),
    ClearInterrupt(DmaChannel),
    EnableController,
    EnableSpi(SpiRole),
    Load(DmaChannel, Direction),
    Enable(DmaChannel),
}

#[derive(Default)]
struct Channel {
    head: Option<(Direction, *const DmaDescriptor)>,
    enabled: bool,
    pending: bool,
}

#[derive(Default)]
struct State {
    ops: Vec<PortOp>,
    channels: [Channel; 4],
    miso: VecDeque<u8>,
    sent: Vec<u8>,
    stalled: bool,
}

/// Walks the loaded descriptor chains as soon as both channels are enabled.
///
/// Bytes clocked in come from the queued MISO bytes, or loop back from MOSI when
/// the queue is empty. Channels stay enabled with their interrupt pending after a
/// transfer, like hardware whose interrupt handler only signals completion.
pub struct MockDma {
    state: RefCell<State>,
    signal: &'static CompletionSignal,
}

impl Default for MockDma {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDma {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State::default()),
            signal: Box::leak(Box::new(CompletionSignal::new())),
        }
    }

    pub fn signal(&self) -> &'static CompletionSignal {
        self.signal
    }

    pub fn queue_miso(&self, bytes: &[u8]) {
        self.state.borrow_mut().miso.extend(bytes.iter().copied());
    }

    /// Never complete transfers.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.borrow_mut().stalled = stalled;
    }

    pub fn ops(&self) -> Vec<PortOp> {
        self.state.borrow().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.borrow_mut().ops.clear();
    }

    pub fn sent(&self) -> Vec<u8> {
        self.state.borrow().sent.clone()
    }

    pub fn is_enabled(&self, channel: DmaChannel) -> bool {
        self.state.borrow().channels[channel.0 as usize].enabled
    }

    pub fn interrupt_pending(&self, channel: DmaChannel) -> bool {
        self.state.borrow().channels[channel.0 as usize].pending
    }

    fn head(state: &State, direction: Direction) -> Option<(usize, *const DmaDescriptor)> {
        state.channels.iter().enumerate().find_map(|(i, ch)| match ch.head {
            Some((dir, head)) if dir == direction && ch.enabled => Some((i, head)),
            _ => None,
        })
    }

    fn run(&self) {
        let mut state = self.state.borrow_mut();
        if state.stalled {
            return;
        }
        let (Some((tx_ch, tx_head)), Some((rx_ch, rx_head))) = (
            Self::head(&state, Direction::MemoryToPeripheral),
            Self::head(&state, Direction::PeripheralToMemory),
        ) else {
            return;
        };

        let mut mosi = Vec::new();
        let tx_irq = unsafe {
            walk(tx_head, |desc, k| {
                let addr = if desc.ctrl().src_increment() {
                    desc.src() + k
                } else {
                    desc.src()
                };
                mosi.push(*(addr as *const u8));
            })
        };

        let mut index = 0;
        let miso = &mut state.miso;
        let rx_irq = unsafe {
            walk(rx_head, |desc, k| {
                let addr = if desc.ctrl().dst_increment() {
                    desc.dst() + k
                } else {
                    desc.dst()
                };
                let byte = miso.pop_front().unwrap_or(mosi[index]);
                *(addr as *mut u8) = byte;
                index += 1;
            })
        };

        state.sent.extend_from_slice(&mosi);
        state.channels[tx_ch].pending = tx_irq;
        state.channels[rx_ch].pending = rx_irq;
        drop(state);

        if tx_irq {
            self.signal.signal_tx();
        }
        if rx_irq {
            self.signal.signal_rx();
        }
    }
}

// Visits every byte position of the chain and returns whether its final descriptor
// raises the completion interrupt.
//
// SAFETY: `head` starts a chain of live descriptors whose addresses are valid for
// their transfer sizes.
unsafe fn walk(head: *const DmaDescriptor, mut visit: impl FnMut(&DmaDescriptor, usize)) -> bool {
    let mut current = head;
    loop {
        let desc = &*current;
        for k in 0..desc.ctrl().transfer_size() {
            visit(desc, k);
        }
        if desc.next() == 0 {
            return desc.ctrl().interrupt();
        }
        assert!(!desc.ctrl().interrupt(), "interrupt flag before end of chain");
        current = desc.next() as *const DmaDescriptor;
    }
}

impl DmaPort for MockDma {
    fn tx_fifo(&self) -> usize {
        TX_FIFO
    }

    fn rx_fifo(&self) -> usize {
        RX_FIFO
    }

    fn configure_spi(&mut self, _config: &SpiConfig, clock_divider: u16) {
        self.state
            .borrow_mut()
            .ops
            .push(PortOp::ConfigureSpi(clock_divider));
    }

    fn disable_channel(&mut self, channel: DmaChannel) {
        let mut state = self.state.borrow_mut();
        state.ops.push(PortOp::Disable(channel));
        state.channels[channel.0 as usize].enabled = false;
    }

    fn clear_channel_interrupt(&mut self, channel: DmaChannel) {
        let mut state = self.state.borrow_mut();
        state.ops.push(PortOp::ClearInterrupt(channel));
        state.channels[channel.0 as usize].pending = false;
    }

    fn enable_controller(&mut self) {
        self.state.borrow_mut().ops.push(PortOp::EnableController);
    }

    fn enable_spi(&mut self, role: SpiRole) {
        self.state.borrow_mut().ops.push(PortOp::EnableSpi(role));
    }

    fn load_chain(&mut self, channel: DmaChannel, direction: Direction, head: &DmaDescriptor) {
        let mut state = self.state.borrow_mut();
        let ch = &mut state.channels[channel.0 as usize];
        assert!(!ch.enabled, "chain loaded onto an enabled channel");
        assert!(!ch.pending, "chain loaded with a stale interrupt pending");
        ch.head = Some((direction, head as *const DmaDescriptor));
        state.ops.push(PortOp::Load(channel, direction));
    }

    fn enable_channel(&mut self, channel: DmaChannel) {
        {
            let mut state = self.state.borrow_mut();
            state.ops.push(PortOp::Enable(channel));
            state.channels[channel.0 as usize].enabled = true;
        }
        self.run();
    }
}

//! Linked-list descriptor chains for scatter/gather SPI transfers.

use alloc::vec::Vec;
use core::fmt::{self, Debug};
use core::marker::PhantomData;
use core::mem::size_of;

use super::DmaError;

/// Largest byte count a single descriptor can move (12-bit size field).
pub const MAX_CHUNK_SIZE: usize = 0x0FFF;

/// Bytes per descriptor used unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

const TRANSFER_SIZE_MASK: u32 = 0x0FFF;
const SRC_INCREMENT: u32 = 1 << 26;
const DST_INCREMENT: u32 = 1 << 27;
const COMPLETION_INTERRUPT: u32 = 1 << 31;

/// The control word of a descriptor.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct DmaControl {
    inner: u32,
}

impl DmaControl {
    /// A control word moving `size` bytes, with no increments and no interrupt.
    pub const fn new(size: u16) -> Self {
        Self {
            inner: size as u32 & TRANSFER_SIZE_MASK,
        }
    }

    pub const fn with_src_increment(self) -> Self {
        Self {
            inner: self.inner | SRC_INCREMENT,
        }
    }

    pub const fn with_dst_increment(self) -> Self {
        Self {
            inner: self.inner | DST_INCREMENT,
        }
    }

    /// Raise the channel interrupt once this descriptor finishes.
    pub const fn with_interrupt(self) -> Self {
        Self {
            inner: self.inner | COMPLETION_INTERRUPT,
        }
    }

    pub const fn transfer_size(&self) -> usize {
        (self.inner & TRANSFER_SIZE_MASK) as usize
    }

    pub const fn src_increment(&self) -> bool {
        self.inner & SRC_INCREMENT != 0
    }

    pub const fn dst_increment(&self) -> bool {
        self.inner & DST_INCREMENT != 0
    }

    pub const fn interrupt(&self) -> bool {
        self.inner & COMPLETION_INTERRUPT != 0
    }

    pub const fn bits(&self) -> u32 {
        self.inner
    }
}

impl From<DmaControl> for u32 {
    fn from(value: DmaControl) -> Self {
        value.inner
    }
}

impl Debug for DmaControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaControl")
            .field("transfer_size", &self.transfer_size())
            .field("src_increment", &self.src_increment())
            .field("dst_increment", &self.dst_increment())
            .field("interrupt", &self.interrupt())
            .finish()
    }
}

/// One hardware linked-list item.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DmaDescriptor {
    src: usize,
    dst: usize,
    next: usize,
    ctrl: DmaControl,
}

impl DmaDescriptor {
    pub fn src(&self) -> usize {
        self.src
    }

    pub fn dst(&self) -> usize {
        self.dst
    }

    /// Address of the following descriptor, `0` at the end of the chain.
    pub fn next(&self) -> usize {
        self.next
    }

    pub fn ctrl(&self) -> DmaControl {
        self.ctrl
    }
}

/// Memory side of a transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Endpoint {
    addr: usize,
    increment: bool,
}

impl Endpoint {
    pub(crate) fn memory(addr: *const u8) -> Self {
        Self {
            addr: addr as usize,
            increment: true,
        }
    }

    pub(crate) fn fixed(addr: *const u8) -> Self {
        Self {
            addr: addr as usize,
            increment: false,
        }
    }

    fn at(&self, offset: usize) -> usize {
        if self.increment {
            self.addr + offset
        } else {
            self.addr
        }
    }
}

/// Addresses of the SPI peripheral FIFO registers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FifoAddrs {
    /// Transmit FIFO, written by the send chain.
    pub tx: usize,
    /// Receive FIFO, read by the receive chain.
    pub rx: usize,
}

/// A send chain and a receive chain of equal total length.
///
/// The chains borrow the buffers they point into for `'buf`, so the memory stays
/// valid for as long as the hardware may walk the descriptors.
pub struct DescriptorChains<'buf> {
    tx: Vec<DmaDescriptor>,
    rx: Vec<DmaDescriptor>,
    len: usize,
    // Dummy source or sink for one-sided transfers. Heap allocated so it does not
    // move with the chains. Only the descriptors read it.
    #[cfg_attr(not(test), allow(dead_code))]
    scratch: Vec<u8>,
    _buffers: PhantomData<&'buf mut [u8]>,
}

impl<'buf> DescriptorChains<'buf> {
    /// Chains moving `send` out while filling `receive`.
    pub fn build(
        send: &'buf [u8],
        receive: &'buf mut [u8],
        fifos: FifoAddrs,
        chunk_size: usize,
    ) -> Result<Self, DmaError> {
        build_chains(send, receive, send.len(), chunk_size, fifos)
    }

    /// Chains sending `send` and discarding whatever is clocked in.
    pub fn write_only(
        send: &'buf [u8],
        fifos: FifoAddrs,
        chunk_size: usize,
    ) -> Result<Self, DmaError> {
        let mut scratch = scratch(0)?;
        let sink = Endpoint::fixed(scratch.as_mut_ptr());
        Self::from_endpoints(
            Endpoint::memory(send.as_ptr()),
            sink,
            send.len(),
            fifos,
            chunk_size,
            scratch,
        )
    }

    /// Chains clocking out `fill` repeatedly while filling `receive`.
    pub fn read_only(
        receive: &'buf mut [u8],
        fill: u8,
        fifos: FifoAddrs,
        chunk_size: usize,
    ) -> Result<Self, DmaError> {
        let scratch = scratch(fill)?;
        let source = Endpoint::fixed(scratch.as_ptr());
        Self::from_endpoints(
            source,
            Endpoint::memory(receive.as_mut_ptr()),
            receive.len(),
            fifos,
            chunk_size,
            scratch,
        )
    }

    /// Chains sending `words` and overwriting them with the received bytes.
    ///
    /// The receive chain trails the send chain by at least one FIFO entry, so every
    /// byte is sent before it is overwritten.
    pub fn in_place(
        words: &'buf mut [u8],
        fifos: FifoAddrs,
        chunk_size: usize,
    ) -> Result<Self, DmaError> {
        let ptr = words.as_mut_ptr();
        Self::from_endpoints(
            Endpoint::memory(ptr),
            Endpoint::memory(ptr),
            words.len(),
            fifos,
            chunk_size,
            Vec::new(),
        )
    }

    pub(crate) fn from_endpoints(
        send: Endpoint,
        receive: Endpoint,
        len: usize,
        fifos: FifoAddrs,
        chunk_size: usize,
        scratch: Vec<u8>,
    ) -> Result<Self, DmaError> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(DmaError::InvalidChunkSize(chunk_size));
        }
        if len == 0 {
            return Err(DmaError::EmptyTransfer);
        }

        let count = len.div_ceil(chunk_size);
        let mut tx = Vec::new();
        tx.try_reserve_exact(count)
            .map_err(|_| DmaError::OutOfMemory)?;
        let mut rx = Vec::new();
        rx.try_reserve_exact(count)
            .map_err(|_| DmaError::OutOfMemory)?;

        for i in 0..count {
            let offset = i * chunk_size;
            let size = chunk_size.min(len - offset) as u16;

            let mut tx_ctrl = DmaControl::new(size);
            if send.increment {
                tx_ctrl = tx_ctrl.with_src_increment();
            }
            let mut rx_ctrl = DmaControl::new(size);
            if receive.increment {
                rx_ctrl = rx_ctrl.with_dst_increment();
            }
            if i == count - 1 {
                tx_ctrl = tx_ctrl.with_interrupt();
                rx_ctrl = rx_ctrl.with_interrupt();
            }

            tx.push(DmaDescriptor {
                src: send.at(offset),
                dst: fifos.tx,
                next: 0,
                ctrl: tx_ctrl,
            });
            rx.push(DmaDescriptor {
                src: fifos.rx,
                dst: receive.at(offset),
                next: 0,
                ctrl: rx_ctrl,
            });
        }

        link(&mut tx);
        link(&mut rx);

        for (i, (t, r)) in tx.iter().zip(rx.iter()).enumerate() {
            log::trace!("dma: lli[{i}] tx {t:?}");
            log::trace!("dma: lli[{i}] rx {r:?}");
        }

        Ok(Self {
            tx,
            rx,
            len,
            scratch,
            _buffers: PhantomData,
        })
    }

    /// The send chain, head first.
    pub fn tx(&self) -> &[DmaDescriptor] {
        &self.tx
    }

    /// The receive chain, head first.
    pub fn rx(&self) -> &[DmaDescriptor] {
        &self.rx
    }

    /// Total bytes moved in each direction.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn tx_head(&self) -> &DmaDescriptor {
        &self.tx[0]
    }

    pub(crate) fn rx_head(&self) -> &DmaDescriptor {
        &self.rx[0]
    }

    #[cfg(test)]
    pub(crate) fn scratch_len(&self) -> usize {
        self.scratch.len()
    }
}

/// Builds a send chain over `send` and a receive chain over `receive`, both `length`
/// bytes long and split into descriptors of at most `chunk_size` bytes.
pub fn build_chains<'buf>(
    send: &'buf [u8],
    receive: &'buf mut [u8],
    length: usize,
    chunk_size: usize,
    fifos: FifoAddrs,
) -> Result<DescriptorChains<'buf>, DmaError> {
    if send.len() != length || receive.len() != length {
        return Err(DmaError::LengthMismatch {
            send: send.len(),
            receive: receive.len(),
        });
    }
    DescriptorChains::from_endpoints(
        Endpoint::memory(send.as_ptr()),
        Endpoint::memory(receive.as_mut_ptr()),
        length,
        fifos,
        chunk_size,
        Vec::new(),
    )
}

fn scratch(fill: u8) -> Result<Vec<u8>, DmaError> {
    let mut scratch = Vec::new();
    scratch
        .try_reserve_exact(1)
        .map_err(|_| DmaError::OutOfMemory)?;
    scratch.push(fill);
    Ok(scratch)
}

// The descriptor array must not move after this point; its heap storage does not
// move when the owning `Vec` does.
fn link(chain: &mut [DmaDescriptor]) {
    let base = chain.as_ptr() as usize;
    let last = chain.len() - 1;
    for (i, desc) in chain.iter_mut().enumerate() {
        desc.next = if i == last {
            0
        } else {
            base + (i + 1) * size_of::<DmaDescriptor>()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;

    const FIFOS: FifoAddrs = FifoAddrs {
        tx: 0x4000_A288,
        rx: 0x4000_A28C,
    };

    #[test]
    fn long_transfer_is_split_into_chunks() {
        let send = vec![0xA5u8; 5000];
        let mut receive = vec![0u8; 5000];
        let recv_addr = receive.as_ptr() as usize;
        let chains = build_chains(&send, &mut receive, 5000, 2048, FIFOS).unwrap();

        let sizes: Vec<usize> = chains
            .tx()
            .iter()
            .map(|d| d.ctrl().transfer_size())
            .collect();
        assert_eq!(sizes, [2048, 2048, 904]);
        assert_eq!(chains.rx().len(), 3);
        assert_eq!(chains.len(), 5000);

        for (i, d) in chains.tx().iter().enumerate() {
            assert_eq!(d.src(), send.as_ptr() as usize + i * 2048);
            assert_eq!(d.dst(), FIFOS.tx);
            assert!(d.ctrl().src_increment());
            assert!(!d.ctrl().dst_increment());
        }
        for (i, d) in chains.rx().iter().enumerate() {
            assert_eq!(d.src(), FIFOS.rx);
            assert_eq!(d.dst(), recv_addr + i * 2048);
            assert!(d.ctrl().dst_increment());
            assert!(!d.ctrl().src_increment());
        }
    }

    #[test]
    fn only_last_descriptor_interrupts() {
        let send = vec![0u8; 5000];
        let mut receive = vec![0u8; 5000];
        let chains = build_chains(&send, &mut receive, 5000, 2048, FIFOS).unwrap();

        for chain in [chains.tx(), chains.rx()] {
            let flags: Vec<bool> = chain.iter().map(|d| d.ctrl().interrupt()).collect();
            assert_eq!(flags, [false, false, true]);
        }
    }

    #[test]
    fn descriptors_are_linked_in_order() {
        let send = vec![0u8; 10];
        let mut receive = vec![0u8; 10];
        let chains = build_chains(&send, &mut receive, 10, 4, FIFOS).unwrap();

        let tx = chains.tx();
        assert_eq!(tx.len(), 3);
        assert_eq!(tx[0].next(), &tx[1] as *const DmaDescriptor as usize);
        assert_eq!(tx[1].next(), &tx[2] as *const DmaDescriptor as usize);
        assert_eq!(tx[2].next(), 0);
        let total: usize = tx.iter().map(|d| d.ctrl().transfer_size()).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let send = vec![0u8; 4096];
        let mut receive = vec![0u8; 4096];
        let chains = build_chains(&send, &mut receive, 4096, 2048, FIFOS).unwrap();
        let sizes: Vec<usize> = chains
            .rx()
            .iter()
            .map(|d| d.ctrl().transfer_size())
            .collect();
        assert_eq!(sizes, [2048, 2048]);
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let send = [0u8; 8];
        let mut receive = [0u8; 8];
        assert_eq!(
            build_chains(&send, &mut receive, 8, 0, FIFOS).err(),
            Some(DmaError::InvalidChunkSize(0))
        );
        assert_eq!(
            build_chains(&send, &mut receive, 8, 4096, FIFOS).err(),
            Some(DmaError::InvalidChunkSize(4096))
        );
        assert_eq!(
            build_chains(&[], &mut [], 0, 2048, FIFOS).err(),
            Some(DmaError::EmptyTransfer)
        );
        let mut short = [0u8; 4];
        assert_eq!(
            build_chains(&send, &mut short, 8, 2048, FIFOS).err(),
            Some(DmaError::LengthMismatch {
                send: 8,
                receive: 4
            })
        );
    }

    #[test]
    fn one_sided_chains_use_a_fixed_dummy() {
        let send = [1u8, 2, 3];
        let chains = DescriptorChains::write_only(&send, FIFOS, 2048).unwrap();
        assert_eq!(chains.scratch_len(), 1);
        let rx = &chains.rx()[0];
        assert!(!rx.ctrl().dst_increment());
        assert_eq!(rx.ctrl().transfer_size(), 3);

        let mut receive = [0u8; 3000];
        let chains = DescriptorChains::read_only(&mut receive, 0xFF, FIFOS, 2048).unwrap();
        assert_eq!(chains.tx().len(), 2);
        assert!(chains.tx().iter().all(|d| !d.ctrl().src_increment()));
        assert_eq!(chains.tx()[0].src(), chains.tx()[1].src());
    }

    #[test]
    fn control_word_packs_fields() {
        let ctrl = DmaControl::new(904).with_src_increment().with_interrupt();
        assert_eq!(u32::from(ctrl), 904 | (1 << 26) | (1 << 31));
        assert_eq!(DmaControl::new(0x1FFF).transfer_size(), 0x0FFF);
    }
}

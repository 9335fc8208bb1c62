//! Packet buffers and the FIFO that hands them to the network stack.
//!
//! A [`PacketBuffer`] is a single zero-filled allocation laid out as
//! `[link | header | payload]`. The link is the queue node, so queueing a buffer never
//! allocates.

use alloc::alloc::{alloc_zeroed, dealloc};
use core::alloc::Layout;
use core::cell::RefCell;
use core::fmt;
use core::mem::{size_of, ManuallyDrop};
use core::ptr::{self, NonNull};
use core::slice;

use critical_section::Mutex;

use crate::event::{Event, EventQueue, QueueId};

/// Bytes taken by the queue node in front of every header.
pub const LINK_SIZE: usize = size_of::<Link>();

/// Packet buffer errors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketError {
    /// The allocator could not provide the block.
    OutOfMemory,
    /// Header plus payload do not fit in a single allocation.
    TooLarge,
}

#[repr(C)]
struct Link {
    next: Option<NonNull<Link>>,
    header_len: usize,
    payload_len: usize,
}

/// Addresses and sizes of a buffer's regions, for the stack above.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PacketShape {
    pub header_len: usize,
    pub payload_len: usize,
    pub header_ptr: *const u8,
    pub payload_ptr: *const u8,
}

/// An owned packet: header and payload regions behind the queue link.
pub struct PacketBuffer {
    link: NonNull<Link>,
}

// The buffer exclusively owns its allocation.
unsafe impl Send for PacketBuffer {}

fn block_layout(header_len: usize, payload_len: usize) -> Result<Layout, PacketError> {
    let data_len = header_len
        .checked_add(payload_len)
        .ok_or(PacketError::TooLarge)?;
    let data = Layout::array::<u8>(data_len).map_err(|_| PacketError::TooLarge)?;
    let (layout, header_offset) = Layout::new::<Link>()
        .extend(data)
        .map_err(|_| PacketError::TooLarge)?;
    debug_assert_eq!(header_offset, LINK_SIZE);
    Ok(layout.pad_to_align())
}

impl PacketBuffer {
    /// Allocates a zero-filled buffer with `header_len` header bytes followed by
    /// `payload_len` payload bytes.
    pub fn allocate(header_len: usize, payload_len: usize) -> Result<Self, PacketError> {
        let layout = block_layout(header_len, payload_len)?;

        // SAFETY: `layout` has a non-zero size, it always contains a `Link`.
        let block = unsafe { alloc_zeroed(layout) };
        let link = NonNull::new(block.cast::<Link>()).ok_or_else(|| {
            log::warn!(
                "pbuf: cannot allocate {} bytes ({header_len} + {payload_len})",
                layout.size()
            );
            PacketError::OutOfMemory
        })?;

        // SAFETY: `link` points to a fresh block sized and aligned for a `Link`.
        unsafe {
            ptr::write(
                link.as_ptr(),
                Link {
                    next: None,
                    header_len,
                    payload_len,
                },
            );
        }

        let buffer = Self { link };
        debug_assert_eq!(
            buffer.linkage_ptr() as usize + LINK_SIZE,
            buffer.header_ptr() as usize
        );
        debug_assert_eq!(
            buffer.header_ptr() as usize + header_len,
            buffer.payload_ptr() as usize
        );
        log::trace!("pbuf: allocated {header_len} + {payload_len}");
        Ok(buffer)
    }

    fn link(&self) -> &Link {
        // SAFETY: the link lives as long as the buffer.
        unsafe { self.link.as_ref() }
    }

    pub fn header_len(&self) -> usize {
        self.link().header_len
    }

    pub fn payload_len(&self) -> usize {
        self.link().payload_len
    }

    /// Start of the allocation, where the queue link sits.
    pub fn linkage_ptr(&self) -> *const u8 {
        self.link.as_ptr().cast::<u8>()
    }

    fn header_ptr(&self) -> *mut u8 {
        // SAFETY: the header starts right after the link, inside the allocation.
        unsafe { self.link.as_ptr().cast::<u8>().add(LINK_SIZE) }
    }

    fn payload_ptr(&self) -> *mut u8 {
        // SAFETY: the payload follows the header, inside the allocation.
        unsafe { self.header_ptr().add(self.header_len()) }
    }

    pub fn header(&self) -> &[u8] {
        // SAFETY: `header_len` initialised bytes start at `header_ptr`.
        unsafe { slice::from_raw_parts(self.header_ptr(), self.header_len()) }
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `header`, and `&mut self` makes the borrow unique.
        unsafe { slice::from_raw_parts_mut(self.header_ptr(), self.header_len()) }
    }

    pub fn payload(&self) -> &[u8] {
        // SAFETY: `payload_len` initialised bytes start at `payload_ptr`.
        unsafe { slice::from_raw_parts(self.payload_ptr(), self.payload_len()) }
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `payload`, and `&mut self` makes the borrow unique.
        unsafe { slice::from_raw_parts_mut(self.payload_ptr(), self.payload_len()) }
    }

    pub fn shape(&self) -> PacketShape {
        PacketShape {
            header_len: self.header_len(),
            payload_len: self.payload_len(),
            header_ptr: self.header_ptr(),
            payload_ptr: self.payload_ptr(),
        }
    }

    fn into_link(self) -> NonNull<Link> {
        ManuallyDrop::new(self).link
    }
}

impl Drop for PacketBuffer {
    fn drop(&mut self) {
        let (header_len, payload_len) = (self.header_len(), self.payload_len());
        // Allocation succeeded with these lengths, so the layout is valid.
        if let Ok(layout) = block_layout(header_len, payload_len) {
            // SAFETY: the block was allocated with this layout and is freed once.
            unsafe { dealloc(self.link.as_ptr().cast::<u8>(), layout) }
        }
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("header_len", &self.header_len())
            .field("payload_len", &self.payload_len())
            .finish()
    }
}

struct List {
    head: Option<NonNull<Link>>,
    tail: Option<NonNull<Link>>,
    len: usize,
    /// An `Event::Packets` was posted and the consumer has not emptied the queue since.
    notified: bool,
}

// The list owns every buffer linked into it.
unsafe impl Send for List {}

/// FIFO of packet buffers, safe to use from interrupt and task context.
pub struct PacketQueue {
    list: Mutex<RefCell<List>>,
    id: QueueId,
}

impl PacketQueue {
    /// An empty queue announcing itself as `id`.
    pub const fn new(id: QueueId) -> Self {
        Self {
            list: Mutex::new(RefCell::new(List {
                head: None,
                tail: None,
                len: 0,
                notified: false,
            })),
            id,
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Appends `buffer` at the tail.
    ///
    /// When `notify` is given and no notification is outstanding, posts
    /// [`Event::Packets`] to it. One notification covers every packet queued until
    /// the consumer empties the queue. A full event queue is logged, the packet stays
    /// queued and the next enqueue tries again.
    pub fn enqueue(&self, buffer: PacketBuffer, notify: Option<&EventQueue>) {
        let link = buffer.into_link();

        critical_section::with(|cs| {
            let mut list = self.list.borrow_ref_mut(cs);
            // SAFETY: the queue now owns the buffer behind `link`, and the tail link
            // belongs to a buffer the queue owns.
            unsafe {
                (*link.as_ptr()).next = None;
                match list.tail {
                    Some(tail) => (*tail.as_ptr()).next = Some(link),
                    None => list.head = Some(link),
                }
            }
            list.tail = Some(link);
            list.len += 1;

            let Some(events) = notify else {
                return;
            };
            if list.notified {
                return;
            }
            if events.post(Event::Packets(self.id)).is_ok() {
                list.notified = true;
            } else {
                log::warn!("pbuf: event queue full, queue {} not notified", self.id.0);
            }
        });
    }

    /// Pops the oldest buffer.
    ///
    /// Once the queue is empty the next enqueue notifies again, so the consumer
    /// should dequeue until this returns `None`.
    pub fn dequeue(&self) -> Option<PacketBuffer> {
        critical_section::with(|cs| {
            let mut list = self.list.borrow_ref_mut(cs);
            let Some(head) = list.head else {
                list.notified = false;
                return None;
            };
            // SAFETY: `head` belongs to a buffer the queue owns.
            let next = unsafe { (*head.as_ptr()).next.take() };
            list.head = next;
            if next.is_none() {
                list.tail = None;
                list.notified = false;
            }
            list.len -= 1;
            Some(PacketBuffer { link: head })
        })
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.list.borrow_ref(cs).len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PacketQueue {
    fn drop(&mut self) {
        while self.dequeue().is_some() {}
    }
}

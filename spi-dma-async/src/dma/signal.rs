//! Completion handshake between the DMA interrupt handlers and the waiting task.

use core::future::poll_fn;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use core::task::Poll;

use embassy_sync::waitqueue::AtomicWaker;

/// Set by the transmit channel interrupt.
pub const TX_DONE: u8 = 1 << 0;
/// Set by the receive channel interrupt.
pub const RX_DONE: u8 = 1 << 1;
/// Both directions finished.
pub const ALL_DONE: u8 = TX_DONE | RX_DONE;

/// Completion bits plus the waker of the task waiting on them.
///
/// Each interrupt handler only ever sets its own bit. The single waiter clears the
/// bits it waited for in one atomic step once all of them are set, so a completion
/// arriving between the check and the clear cannot be lost.
pub struct CompletionSignal {
    bits: AtomicU8,
    waker: AtomicWaker,
    tx_count: AtomicU32,
    rx_count: AtomicU32,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU8::new(0),
            waker: AtomicWaker::new(),
            tx_count: AtomicU32::new(0),
            rx_count: AtomicU32::new(0),
        }
    }

    /// Forget any completion left over from an earlier transfer.
    pub fn clear(&self) {
        self.bits.store(0, Ordering::Release);
    }

    /// Called from the transmit channel interrupt handler.
    pub fn signal_tx(&self) {
        self.tx_count.fetch_add(1, Ordering::Relaxed);
        self.bits.fetch_or(TX_DONE, Ordering::AcqRel);
        self.waker.wake();
    }

    /// Called from the receive channel interrupt handler.
    pub fn signal_rx(&self) {
        self.rx_count.fetch_add(1, Ordering::Relaxed);
        self.bits.fetch_or(RX_DONE, Ordering::AcqRel);
        self.waker.wake();
    }

    /// The bits currently set.
    pub fn bits(&self) -> u8 {
        self.bits.load(Ordering::Acquire)
    }

    /// Clears `mask` and returns `true` if every bit of it was set. Leaves the bits
    /// untouched otherwise.
    pub fn try_take(&self, mask: u8) -> bool {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            if current & mask != mask {
                return false;
            }
            match self.bits.compare_exchange_weak(
                current,
                current & !mask,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Waits until every bit of `mask` is set, then clears them.
    pub async fn wait(&self, mask: u8) {
        poll_fn(|cx| {
            if self.try_take(mask) {
                return Poll::Ready(());
            }
            self.waker.register(cx.waker());
            // A signal may have landed before the waker was registered.
            if self.try_take(mask) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }

    /// Number of transmit completion interrupts seen so far.
    pub fn tx_interrupts(&self) -> u32 {
        self.tx_count.load(Ordering::Relaxed)
    }

    /// Number of receive completion interrupts seen so far.
    pub fn rx_interrupts(&self) -> u32 {
        self.rx_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_requires_every_bit() {
        let signal = CompletionSignal::new();
        signal.signal_tx();
        assert!(!signal.try_take(ALL_DONE));
        assert_eq!(signal.bits(), TX_DONE);

        signal.signal_rx();
        assert!(signal.try_take(ALL_DONE));
        assert_eq!(signal.bits(), 0);
    }

    #[test]
    fn wait_completes_when_both_directions_finish() {
        let signal = CompletionSignal::new();
        signal.signal_rx();
        signal.signal_tx();
        embassy_futures::block_on(signal.wait(ALL_DONE));
        assert_eq!(signal.bits(), 0);
        assert_eq!(signal.tx_interrupts(), 1);
        assert_eq!(signal.rx_interrupts(), 1);
    }

    #[test]
    fn clear_drops_stale_completion() {
        let signal = CompletionSignal::new();
        signal.signal_tx();
        signal.clear();
        signal.signal_rx();
        assert!(!signal.try_take(ALL_DONE));
    }
}

#![no_std]
#![doc = "Scatter/gather SPI-over-DMA transfers and a shared SPI bus for embedded-hal-async."]

// The DMA engine is written against the linked-list (LLI) DMA controller found on
// the BL602: one descriptor chain per direction, a fixed peripheral FIFO address on
// one side and an incrementing memory address on the other.
//
// Layers, bottom up:
// - `dma`: descriptor chains, the completion signal and the transfer engine.
// - `bus`: an `embedded_hal_async::spi::SpiBus` that runs every operation as a DMA transfer.
// - `spi`: a shared-bus `SpiDevice` that frames transactions with chip-select.

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod bus;
pub mod conf;
pub mod dma;
pub mod spi;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

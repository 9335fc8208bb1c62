//! An asynchronous, `no_std` board I/O layer for Semtech SX126x LoRa transceivers.
//!
//! This crate sits between a LoRa MAC and the radio. It provides:
//!
//! * [`dio`], a dispatcher that turns DIO line interrupts into deferred events.
//! * [`pbuf`], packet buffers and the queues that hand them to the MAC task.
//! * [`Sx126xTransport`], command and register access over an async `SpiDevice`,
//!   normally the DMA-driven bus of the `spi-dma-async` crate (see [`DmaTransport`]).
//!
//! Deferred events from both the dispatcher and the packet queues are delivered
//! through one [`event::EventQueue`], so a single task can service the radio.

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod conf;
pub mod dio;
pub mod event;
pub mod io;
pub mod op;
pub mod pbuf;

mod transport;
pub use transport::*;

pub use spi_dma_async;

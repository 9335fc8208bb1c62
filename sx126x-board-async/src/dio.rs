//! DIO interrupt dispatch.
//!
//! The radio signals events on its DIO lines. [`DioDispatcher::dispatch`] runs from the
//! GPIO interrupt: it masks every line that fired and posts a [`DeferredEvent`] for it.
//! The consumer task then calls [`DioDispatcher::handle_event`], which runs the line's
//! handler and re-arms the line.

use alloc::boxed::Box;
use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::event::{Event, EventQueue};

/// Default number of lines a dispatcher can serve (DIO0 to DIO5).
pub const MAX_LINES: usize = 6;

/// A GPIO number.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineId(pub u8);

/// Input pull resistor.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Pull {
    #[default]
    None,
    Up,
    Down,
}

/// Condition raising the line interrupt.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Trigger {
    /// Falling edge.
    NegativePulse,
    /// Rising edge.
    #[default]
    PositivePulse,
    /// Low level.
    NegativeLevel,
    /// High level.
    PositiveLevel,
}

/// Whether the interrupt is synchronised to the GPIO clock.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum InterruptControl {
    Sync,
    #[default]
    Async,
}

/// Electrical and trigger settings of a registered line.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LineConfig {
    pub pull: Pull,
    pub trigger: Trigger,
    pub control: InterruptControl,
}

/// A set of lines, for masking groups of them at once.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct LineSet {
    inner: u32,
}

impl LineSet {
    /// Lines `0..CAPACITY` can be members of a set.
    pub const CAPACITY: u8 = 32;

    /// Creates a new, empty `LineSet`.
    pub const fn none() -> Self {
        Self { inner: 0 }
    }

    /// Adds a line. Lines above 31 cannot be represented and are ignored.
    pub const fn with(self, line: LineId) -> Self {
        if line.0 >= 32 {
            return self;
        }
        Self {
            inner: self.inner | 1 << line.0,
        }
    }

    pub const fn contains(&self, line: LineId) -> bool {
        line.0 < 32 && self.inner & (1 << line.0) != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.inner == 0
    }

    pub const fn len(&self) -> usize {
        self.inner.count_ones() as usize
    }

    /// The lines in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = LineId> + '_ {
        (0..32u8)
            .map(LineId)
            .filter(move |line| self.contains(*line))
    }
}

impl From<LineSet> for u32 {
    fn from(val: LineSet) -> Self {
        val.inner
    }
}

impl From<u32> for LineSet {
    fn from(mask: u32) -> Self {
        Self { inner: mask }
    }
}

impl fmt::Debug for LineSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|line| line.0)).finish()
    }
}

/// Access to the GPIO interrupt controller.
///
/// Every method takes `&self`, since [`DioDispatcher::dispatch`] calls them from
/// interrupt context.
pub trait LinePort {
    /// Number of GPIO lines. Valid ids are `0..line_count()`.
    fn line_count(&self) -> u8;

    /// Makes `line` a GPIO input with the given pull.
    fn configure_input(&self, line: LineId, pull: Pull);

    fn set_interrupt_mode(&self, line: LineId, control: InterruptControl, trigger: Trigger);

    /// A masked line keeps latching its status but raises no interrupt.
    fn set_masked(&self, line: LineId, masked: bool);

    fn is_masked(&self, line: LineId) -> bool;

    /// The line's latched interrupt status.
    fn interrupt_pending(&self, line: LineId) -> bool;

    fn clear_interrupt(&self, line: LineId);
}

/// Task-context handler of one line.
pub trait LineHandler: Send {
    fn on_line_event(&mut self, line: LineId);
}

impl<F> LineHandler for F
where
    F: FnMut(LineId) + Send,
{
    fn on_line_event(&mut self, line: LineId) {
        self(line)
    }
}

/// A line that fired, posted from interrupt context.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeferredEvent {
    /// Pool slot the line is bound to.
    pub slot: u8,
    pub line: LineId,
}

/// Line registration errors. Fatal at setup.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The port has no such line.
    InvalidLine(LineId),
    /// The line already has a handler.
    AlreadyRegistered(LineId),
    /// Every slot of the pool is bound.
    PoolExhausted,
    /// The line has no handler.
    NotRegistered(LineId),
    /// The line's handler is running.
    InUse(LineId),
}

/// Snapshot of the dispatch counters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DispatchStats<const N: usize> {
    /// Interrupts per pool slot.
    pub per_slot: [u32; N],
    /// Interrupts that matched no armed, unmasked line.
    pub unmatched: u32,
    /// Posts that found the event queue full and were deferred.
    pub overflow: u32,
}

struct Slot {
    line: Option<LineId>,
    handler: Option<Box<dyn LineHandler>>,
    /// The line fired but its event did not fit in the event queue.
    unposted: bool,
}

impl Slot {
    const fn empty() -> Self {
        Self {
            line: None,
            handler: None,
            unposted: false,
        }
    }
}

/// Routes GPIO interrupts of up to `N` lines to their handlers.
pub struct DioDispatcher<'q, P, const N: usize = MAX_LINES> {
    port: P,
    events: &'q EventQueue,
    slots: Mutex<CriticalSectionRawMutex, RefCell<[Slot; N]>>,
    counters: [AtomicU32; N],
    unmatched: AtomicU32,
    overflow: AtomicU32,
}

impl<'q, P, const N: usize> DioDispatcher<'q, P, N>
where
    P: LinePort,
{
    /// Creates a dispatcher posting to `events`. No line is registered.
    pub fn new(port: P, events: &'q EventQueue) -> Self {
        Self {
            port,
            events,
            slots: Mutex::new(RefCell::new(core::array::from_fn(|_| Slot::empty()))),
            counters: core::array::from_fn(|_| AtomicU32::new(0)),
            unmatched: AtomicU32::new(0),
            overflow: AtomicU32::new(0),
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Binds `line` to a free slot and arms its interrupt.
    ///
    /// Returns the slot index.
    pub fn register_line(
        &self,
        line: LineId,
        config: LineConfig,
        handler: Box<dyn LineHandler>,
    ) -> Result<u8, ConfigError> {
        // group masking works on a LineSet
        if line.0 >= self.port.line_count() || line.0 >= LineSet::CAPACITY {
            return Err(ConfigError::InvalidLine(line));
        }

        let slot = self.slots.lock(|slots| {
            let mut slots = slots.borrow_mut();
            if slots.iter().any(|slot| slot.line == Some(line)) {
                return Err(ConfigError::AlreadyRegistered(line));
            }
            let (index, slot) = slots
                .iter_mut()
                .enumerate()
                .find(|(_, slot)| slot.line.is_none())
                .ok_or(ConfigError::PoolExhausted)?;
            slot.line = Some(line);
            slot.handler = Some(handler);
            slot.unposted = false;
            self.counters[index].store(0, Ordering::Relaxed);
            Ok(index as u8)
        })?;

        self.port.configure_input(line, config.pull);
        self.port.set_masked(line, true);
        self.port
            .set_interrupt_mode(line, config.control, config.trigger);
        self.port.set_masked(line, false);

        log::debug!("dio: line {} bound to slot {slot} ({config:?})", line.0);
        Ok(slot)
    }

    /// Disarms `line` and frees its slot.
    ///
    /// Events already queued for the line are ignored once they reach
    /// [`handle_event`](Self::handle_event).
    pub fn unregister_line(&self, line: LineId) -> Result<Box<dyn LineHandler>, ConfigError> {
        let handler = self.slots.lock(|slots| {
            let mut slots = slots.borrow_mut();
            let slot = slots
                .iter_mut()
                .find(|slot| slot.line == Some(line))
                .ok_or(ConfigError::NotRegistered(line))?;
            let handler = slot.handler.take().ok_or(ConfigError::InUse(line))?;

            self.port.set_masked(line, true);
            self.port.clear_interrupt(line);
            slot.line = None;
            slot.unposted = false;
            Ok(handler)
        })?;

        log::debug!("dio: line {} released", line.0);
        Ok(handler)
    }

    /// GPIO interrupt entry point.
    ///
    /// For every armed line that is unmasked and has its status set: masks the line,
    /// counts the interrupt and posts an [`Event::Line`]. The status flag is left for
    /// [`acknowledge`](Self::acknowledge) to clear.
    ///
    /// An event that finds the event queue full is kept on its slot and posted by a
    /// later `dispatch` or [`repost_deferred`](Self::repost_deferred). Returns the
    /// number of events posted.
    pub fn dispatch(&self) -> usize {
        let fired = self.slots.lock(|slots| {
            let mut slots = slots.borrow_mut();
            let mut fired = 0;
            for (index, slot) in slots.iter_mut().enumerate() {
                let Some(line) = slot.line else {
                    continue;
                };
                if slot.unposted {
                    fired += usize::from(self.post_deferred(index, slot));
                    continue;
                }
                if self.port.is_masked(line) || !self.port.interrupt_pending(line) {
                    continue;
                }

                self.port.set_masked(line, true);
                self.counters[index].fetch_add(1, Ordering::Relaxed);
                slot.unposted = true;
                if self.post_deferred(index, slot) {
                    fired += 1;
                } else {
                    self.overflow.fetch_add(1, Ordering::Relaxed);
                    log::warn!("dio: event queue full, line {} held", line.0);
                }
            }
            fired
        });

        if fired == 0 {
            self.unmatched.fetch_add(1, Ordering::Relaxed);
        }
        fired
    }

    /// Posts the events [`dispatch`](Self::dispatch) could not queue.
    ///
    /// The consumer calls this after draining the event queue. Returns the number
    /// of events posted.
    pub fn repost_deferred(&self) -> usize {
        self.slots.lock(|slots| {
            let mut slots = slots.borrow_mut();
            let mut posted = 0;
            for (index, slot) in slots.iter_mut().enumerate() {
                if slot.unposted && self.post_deferred(index, slot) {
                    posted += 1;
                }
            }
            posted
        })
    }

    fn post_deferred(&self, index: usize, slot: &mut Slot) -> bool {
        let Some(line) = slot.line else {
            return false;
        };
        let event = DeferredEvent {
            slot: index as u8,
            line,
        };
        if self.events.post(Event::Line(event)).is_err() {
            return false;
        }
        slot.unposted = false;
        true
    }

    /// Runs the handler of a line event, then acknowledges the line.
    ///
    /// Returns `false` for stale events whose slot was released or rebound.
    pub fn handle_event(&self, event: DeferredEvent) -> bool {
        let handler = self.slots.lock(|slots| {
            let mut slots = slots.borrow_mut();
            let slot = slots.get_mut(event.slot as usize)?;
            if slot.line != Some(event.line) {
                return None;
            }
            slot.handler.take()
        });

        let Some(mut handler) = handler else {
            log::debug!(
                "dio: ignoring stale event for line {} (slot {})",
                event.line.0,
                event.slot
            );
            return false;
        };

        log::trace!("dio: line {} handler start", event.line.0);
        handler.on_line_event(event.line);

        let restored = self.slots.lock(|slots| {
            let mut slots = slots.borrow_mut();
            match slots.get_mut(event.slot as usize) {
                Some(slot) if slot.line == Some(event.line) && slot.handler.is_none() => {
                    slot.handler = Some(handler);
                    true
                }
                _ => false,
            }
        });

        if restored {
            self.acknowledge(event.line);
        }
        self.repost_deferred();
        restored
    }

    /// Clears the line's status flag, then unmasks it.
    ///
    /// Returns `false` if the line is not registered.
    pub fn acknowledge(&self, line: LineId) -> bool {
        if self.slot_of(line).is_none() {
            return false;
        }
        self.port.clear_interrupt(line);
        self.port.set_masked(line, false);
        true
    }

    /// Masks every line of `set`.
    pub fn mask_group(&self, set: LineSet) {
        for line in set.iter().filter(|line| line.0 < self.port.line_count()) {
            self.port.set_masked(line, true);
        }
        log::trace!("dio: masked {set:?}");
    }

    /// Unmasks every line of `set`.
    pub fn unmask_group(&self, set: LineSet) {
        for line in set.iter().filter(|line| line.0 < self.port.line_count()) {
            self.port.set_masked(line, false);
        }
        log::trace!("dio: unmasked {set:?}");
    }

    /// The slot `line` is bound to.
    pub fn slot_of(&self, line: LineId) -> Option<u8> {
        self.slots.lock(|slots| {
            slots
                .borrow()
                .iter()
                .position(|slot| slot.line == Some(line))
                .map(|index| index as u8)
        })
    }

    /// Interrupts counted for `line` since it was registered.
    pub fn line_count_for(&self, line: LineId) -> Option<u32> {
        self.slot_of(line)
            .map(|slot| self.counters[slot as usize].load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> DispatchStats<N> {
        DispatchStats {
            per_slot: core::array::from_fn(|i| self.counters[i].load(Ordering::Relaxed)),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            overflow: self.overflow.load(Ordering::Relaxed),
        }
    }
}

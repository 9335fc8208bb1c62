//! SX126x DIO wiring on top of the [`DioDispatcher`].

use alloc::boxed::Box;

use crate::dio::{ConfigError, DioDispatcher, LineConfig, LineHandler, LineId, LinePort, LineSet};

/// DIO0 to DIO5.
pub const DIO_COUNT: usize = 6;

/// Handlers for DIO0 to DIO5. `None` leaves the DIO unregistered.
pub type DioHandlers = [Option<Box<dyn LineHandler>>; DIO_COUNT];

/// GPIO lines the radio's DIO pins are wired to. `None` for unconnected pins.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DioLines {
    pub dio: [Option<LineId>; DIO_COUNT],
}

impl DioLines {
    pub const fn new(dio: [Option<LineId>; DIO_COUNT]) -> Self {
        Self { dio }
    }

    /// The line of DIO`index`.
    pub fn line(&self, index: usize) -> Option<LineId> {
        self.dio.get(index).copied().flatten()
    }

    /// DIO0 to DIO3: packet done, receive timeout, channel change and CAD done.
    pub fn rx_lines(&self) -> LineSet {
        self.dio[..4]
            .iter()
            .flatten()
            .fold(LineSet::none(), |set, line| set.with(*line))
    }

    /// Every connected DIO.
    pub fn all(&self) -> LineSet {
        self.dio
            .iter()
            .flatten()
            .fold(LineSet::none(), |set, line| set.with(*line))
    }
}

/// The radio's DIO lines, registered with a dispatcher.
pub struct Sx126xIo<'d, 'q, P, const N: usize> {
    dispatcher: &'d DioDispatcher<'q, P, N>,
    lines: DioLines,
}

impl<'d, 'q, P, const N: usize> Sx126xIo<'d, 'q, P, N>
where
    P: LinePort,
{
    pub fn new(dispatcher: &'d DioDispatcher<'q, P, N>, lines: DioLines) -> Self {
        Self { dispatcher, lines }
    }

    pub fn lines(&self) -> &DioLines {
        &self.lines
    }

    /// Registers every DIO that has both a line and a handler, with the default
    /// rising-edge configuration. Returns the lines registered.
    pub fn register_dio_handlers(&self, handlers: DioHandlers) -> Result<LineSet, ConfigError> {
        let mut registered = LineSet::none();
        for (index, handler) in handlers.into_iter().enumerate() {
            let (Some(line), Some(handler)) = (self.lines.line(index), handler) else {
                continue;
            };
            self.dispatcher
                .register_line(line, LineConfig::default(), handler)?;
            log::debug!("sx126x: DIO{index} on line {}", line.0);
            registered = registered.with(line);
        }
        Ok(registered)
    }

    /// Releases every registered DIO. Returns how many were released.
    pub fn deinit(&self) -> usize {
        let released = (0..DIO_COUNT)
            .filter_map(|index| self.lines.line(index))
            .filter(|line| self.dispatcher.unregister_line(*line).is_ok())
            .count();
        log::debug!("sx126x: released {released} DIO lines");
        released
    }

    /// Masks DIO0 to DIO3 around radio mode changes.
    pub fn rx_irq_disable(&self) {
        self.dispatcher.mask_group(self.lines.rx_lines());
    }

    pub fn rx_irq_enable(&self) {
        self.dispatcher.unmask_group(self.lines.rx_lines());
    }

    /// Interrupts counted per DIO, `None` for unregistered ones.
    pub fn dio_counts(&self) -> [Option<u32>; DIO_COUNT] {
        core::array::from_fn(|index| {
            self.lines
                .line(index)
                .and_then(|line| self.dispatcher.line_count_for(line))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dio::tests::MockLines;
    use crate::dio::MAX_LINES;
    use crate::event::{Event, EventQueue};

    const LINES: DioLines = DioLines::new([
        Some(LineId(10)),
        Some(LineId(11)),
        None,
        Some(LineId(13)),
        Some(LineId(14)),
        None,
    ]);

    fn handlers() -> DioHandlers {
        [
            Some(Box::new(|_: LineId| {})),
            Some(Box::new(|_: LineId| {})),
            Some(Box::new(|_: LineId| {})),
            None,
            Some(Box::new(|_: LineId| {})),
            Some(Box::new(|_: LineId| {})),
        ]
    }

    #[test]
    fn registers_wired_dios_with_handlers() {
        let events = EventQueue::new();
        let dio: DioDispatcher<_, MAX_LINES> = DioDispatcher::new(MockLines::new(), &events);
        let io = Sx126xIo::new(&dio, LINES);

        let registered = io.register_dio_handlers(handlers()).unwrap();

        // DIO2 is unwired, DIO3 has no handler, DIO5 is unwired
        assert_eq!(
            registered,
            LineSet::none()
                .with(LineId(10))
                .with(LineId(11))
                .with(LineId(14))
        );
        assert_eq!(dio.slot_of(LineId(14)), Some(2));
    }

    #[test]
    fn rx_group_masks_dio0_to_dio3() {
        let events = EventQueue::new();
        let dio: DioDispatcher<_, MAX_LINES> = DioDispatcher::new(MockLines::new(), &events);
        let io = Sx126xIo::new(&dio, LINES);
        io.register_dio_handlers(handlers()).unwrap();

        io.rx_irq_disable();
        assert!(dio.port().masked(10));
        assert!(dio.port().masked(11));
        // DIO4 is outside the receive group
        assert!(!dio.port().masked(14));

        dio.port().raise(10);
        dio.port().raise(14);
        assert_eq!(dio.dispatch(), 1);
        assert!(matches!(events.try_next(), Some(Event::Line(e)) if e.line == LineId(14)));

        io.rx_irq_enable();
        assert!(!dio.port().masked(10));
        assert_eq!(dio.dispatch(), 1);
        assert_eq!(io.dio_counts(), [Some(1), Some(0), None, None, Some(1), None]);
    }

    #[test]
    fn deinit_releases_every_registered_dio() {
        let events = EventQueue::new();
        let dio: DioDispatcher<_, MAX_LINES> = DioDispatcher::new(MockLines::new(), &events);
        let io = Sx126xIo::new(&dio, LINES);
        io.register_dio_handlers(handlers()).unwrap();

        assert_eq!(io.deinit(), 3);
        assert_eq!(dio.slot_of(LineId(10)), None);
        assert!(dio.port().masked(11));
    }
}

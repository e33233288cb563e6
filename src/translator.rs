use std::io;

use evdev::{
    AbsoluteAxisCode, AbsoluteAxisEvent, EventSummary, InputEvent, KeyEvent, SynchronizationCode,
};

use crate::{
    filter::{FilterSettings, FilterState, radial_deadzone, trigger_deadzone},
    gamepad::GamepadSink,
    mapping::{AxisRange, AxisRole, MappingTable, Stick, StickAxis},
};

/// Turns the raw event stream of the physical controller into canonical frames.
///
/// Translated events are held back until the source reports the end of its
/// frame, so the virtual device only ever sees complete updates. Stick axes
/// are filtered as pairs at that point.
pub struct Translator {
    table: MappingTable,
    settings: FilterSettings,
    filter: FilterState,
    stick_outputs: [Option<(AbsoluteAxisCode, AxisRange)>; 4],
    sticks: [i32; 4],
    dirty: [bool; 2],
    frame: Vec<InputEvent>,
    /// Set between SYN_DROPPED and the next SYN_REPORT
    dropping: bool,
}

impl Translator {
    pub fn new(table: MappingTable, settings: FilterSettings) -> Self {
        let mut stick_outputs = [None; 4];
        for mapping in table.axes() {
            if let AxisRole::Stick(axis) = mapping.role {
                stick_outputs[axis.index()] = Some((mapping.destination, mapping.destination_range));
            }
        }
        Self {
            table,
            settings,
            filter: FilterState::default(),
            stick_outputs,
            sticks: [0; 4],
            dirty: [false; 2],
            frame: Vec::with_capacity(16),
            dropping: false,
        }
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    #[cfg(test)]
    pub fn filter_state(&self) -> &FilterState {
        &self.filter
    }

    /// Forget everything learned from the previous device session.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.sticks = [0; 4];
        self.discard_frame();
    }

    fn discard_frame(&mut self) {
        self.dirty = [false; 2];
        self.frame.clear();
        self.dropping = false;
    }

    /// Writes one frame with every button released and every axis at rest.
    pub fn neutral_frame<G: GamepadSink>(&mut self, gamepad: &mut G) -> io::Result<()> {
        self.reset();
        let mut buttons: Vec<_> = self.table.destination_buttons().collect();
        buttons.sort_by_key(|code| code.0);
        for code in buttons {
            gamepad.emit(KeyEvent::new_now(code, 0).into());
        }
        let mut axes: Vec<_> = self
            .table
            .axes()
            .map(|mapping| (mapping.destination, mapping.rest()))
            .collect();
        axes.sort_by_key(|(code, _)| code.0);
        for (code, value) in axes {
            gamepad.emit(AbsoluteAxisEvent::new_now(code, value).into());
        }
        gamepad.flush()
    }

    pub fn feed<G: GamepadSink>(&mut self, event: InputEvent, gamepad: &mut G) -> io::Result<()> {
        match event.destructure() {
            EventSummary::Synchronization(_, code, _) if code == SynchronizationCode::SYN_REPORT => {
                if self.dropping {
                    tracing::debug!("Resuming after dropped events");
                    self.discard_frame();
                    return Ok(());
                }
                return self.finish_frame(gamepad);
            }
            EventSummary::Synchronization(_, code, _) if code == SynchronizationCode::SYN_DROPPED => {
                tracing::warn!("Source dropped events, discarding until the next report");
                self.discard_frame();
                self.dropping = true;
            }
            _ if self.dropping => {}
            EventSummary::Key(_, code, value) => match self.table.translate_button(code) {
                Ok(destination) => self
                    .frame
                    .push(KeyEvent::new_now(destination, value).into()),
                Err(gap) => tracing::debug!("Dropping event with value {value}: {gap}"),
            },
            EventSummary::AbsoluteAxis(_, code, value) => self.axis(code, value),
            _ => {}
        }
        Ok(())
    }

    fn axis(&mut self, code: AbsoluteAxisCode, raw: i32) {
        let mapping = match self.table.axis(code) {
            Ok(mapping) => *mapping,
            Err(gap) => {
                tracing::debug!("Dropping event with value {raw}: {gap}");
                return;
            }
        };
        let value = mapping.scale(raw);
        match mapping.role {
            AxisRole::Stick(axis) => {
                self.sticks[axis.index()] = value;
                self.dirty[axis.stick().index()] = true;
            }
            AxisRole::Trigger => {
                let value =
                    trigger_deadzone(value, mapping.destination_range, self.settings.trigger_deadzone);
                self.push_axis(mapping.destination, value);
            }
            AxisRole::Hat => self.push_axis(mapping.destination, value),
        }
    }

    fn push_axis(&mut self, code: AbsoluteAxisCode, value: i32) {
        self.frame.push(AbsoluteAxisEvent::new_now(code, value).into());
    }

    fn finish_sticks(&mut self) {
        for stick in Stick::ALL {
            if !std::mem::take(&mut self.dirty[stick.index()]) {
                continue;
            }
            let (ax, ay) = stick.axes();
            let (Some((x_code, range)), Some((y_code, _))) =
                (self.stick_outputs[ax.index()], self.stick_outputs[ay.index()])
            else {
                continue;
            };
            let (x, y) = radial_deadzone(
                self.sticks[ax.index()],
                self.sticks[ay.index()],
                range,
                self.settings.stick_deadzone,
            );
            for (axis, code, value) in [(ax, x_code, x), (ay, y_code, y)] {
                self.emit_stick(axis, code, value);
            }
        }
    }

    fn emit_stick(&mut self, axis: StickAxis, code: AbsoluteAxisCode, value: i32) {
        let threshold = self.settings.jitter_threshold;
        if let Some(value) = self.filter.jitter(axis).suppress(value, threshold) {
            self.push_axis(code, value);
        }
    }

    fn finish_frame<G: GamepadSink>(&mut self, gamepad: &mut G) -> io::Result<()> {
        self.finish_sticks();
        if self.frame.is_empty() {
            return Ok(());
        }
        for event in self.frame.drain(..) {
            gamepad.emit(event);
        }
        gamepad.flush()
    }
}

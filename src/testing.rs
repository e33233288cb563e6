//! Event builders and a recording sink shared by the unit tests.

use std::io;

use evdev::{
    AbsoluteAxisCode, AbsoluteAxisEvent, InputEvent, KeyCode, KeyEvent, SynchronizationCode,
    SynchronizationEvent,
};

use crate::gamepad::GamepadSink;

pub type Recorded = (u16, u16, i32);

pub fn key(code: KeyCode, value: i32) -> InputEvent {
    KeyEvent::new_now(code, value).into()
}

pub fn abs(code: AbsoluteAxisCode, value: i32) -> InputEvent {
    AbsoluteAxisEvent::new_now(code, value).into()
}

pub fn syn() -> InputEvent {
    SynchronizationEvent::new_now(SynchronizationCode::SYN_REPORT, 0).into()
}

pub fn syn_dropped() -> InputEvent {
    SynchronizationEvent::new_now(SynchronizationCode::SYN_DROPPED, 0).into()
}

pub fn recorded(event: &InputEvent) -> Recorded {
    (event.event_type().0, event.code(), event.value())
}

/// Collects flushed frames instead of writing to uinput.
#[derive(Debug, Default)]
pub struct Recorder {
    pub pending: Vec<Recorded>,
    pub frames: Vec<Vec<Recorded>>,
}

impl GamepadSink for Recorder {
    fn emit(&mut self, event: InputEvent) {
        self.pending.push(recorded(&event));
    }

    fn flush(&mut self) -> io::Result<()> {
        self.frames.push(std::mem::take(&mut self.pending));
        Ok(())
    }

    fn destroy(self) {}
}

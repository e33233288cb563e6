use std::collections::HashMap;

use evdev::{AbsInfo, AbsoluteAxisCode, KeyCode};
use thiserror::Error;

pub const STICK_RANGE: AxisRange = AxisRange::new(-32768, 32767);
pub const TRIGGER_RANGE: AxisRange = AxisRange::new(0, 1023);
pub const HAT_RANGE: AxisRange = AxisRange::new(-1, 1);

const STICK_FUZZ: i32 = 16;
const STICK_FLAT: i32 = 128;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    #[error("axis {axis:?} has an empty source range [{min}, {max}]")]
    EmptySourceRange {
        axis: AbsoluteAxisCode,
        min: i32,
        max: i32,
    },
    #[error("axis {axis:?} has an empty destination range [{min}, {max}]")]
    EmptyDestinationRange {
        axis: AbsoluteAxisCode,
        min: i32,
        max: i32,
    },
    #[error("button {0:?} is mapped more than once")]
    DuplicateButton(KeyCode),
    #[error("axis {0:?} is mapped more than once")]
    DuplicateAxis(AbsoluteAxisCode),
}

/// A source code that has no entry in the mapping table.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TranslationGap {
    #[error("unmapped button {0:?}")]
    Button(KeyCode),
    #[error("unmapped axis {0:?}")]
    Axis(AbsoluteAxisCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRange {
    pub min: i32,
    pub max: i32,
}

impl AxisRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    fn span(&self) -> i64 {
        self.max as i64 - self.min as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stick {
    Left,
    Right,
}

impl Stick {
    pub const ALL: [Stick; 2] = [Stick::Left, Stick::Right];

    pub fn axes(self) -> (StickAxis, StickAxis) {
        match self {
            Stick::Left => (StickAxis::LeftX, StickAxis::LeftY),
            Stick::Right => (StickAxis::RightX, StickAxis::RightY),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// One component of an analog stick, on the destination side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StickAxis {
    LeftX,
    LeftY,
    RightX,
    RightY,
}

impl StickAxis {
    pub fn stick(self) -> Stick {
        match self {
            StickAxis::LeftX | StickAxis::LeftY => Stick::Left,
            StickAxis::RightX | StickAxis::RightY => Stick::Right,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisRole {
    Stick(StickAxis),
    Trigger,
    Hat,
}

/// Translation of one physical axis onto one canonical axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisMapping {
    pub source: AbsoluteAxisCode,
    pub destination: AbsoluteAxisCode,
    pub role: AxisRole,
    pub source_range: AxisRange,
    pub destination_range: AxisRange,
    pub fuzz: i32,
    pub flat: i32,
    pub invert: bool,
}

impl AxisMapping {
    pub fn new(
        source: AbsoluteAxisCode,
        destination: AbsoluteAxisCode,
        role: AxisRole,
        source_range: AxisRange,
        destination_range: AxisRange,
    ) -> Self {
        Self {
            source,
            destination,
            role,
            source_range,
            destination_range,
            fuzz: 0,
            flat: 0,
            invert: false,
        }
    }

    /// Identity transform over `range`.
    pub fn direct(
        source: AbsoluteAxisCode,
        destination: AbsoluteAxisCode,
        role: AxisRole,
        range: AxisRange,
    ) -> Self {
        Self::new(source, destination, role, range, range)
    }

    pub fn with_noise(mut self, fuzz: i32, flat: i32) -> Self {
        self.fuzz = fuzz;
        self.flat = flat;
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = !self.invert;
        self
    }

    fn validate(&self) -> Result<(), MappingError> {
        if self.source_range.span() <= 0 {
            return Err(MappingError::EmptySourceRange {
                axis: self.source,
                min: self.source_range.min,
                max: self.source_range.max,
            });
        }
        if self.destination_range.span() <= 0 {
            return Err(MappingError::EmptyDestinationRange {
                axis: self.destination,
                min: self.destination_range.min,
                max: self.destination_range.max,
            });
        }
        Ok(())
    }

    /// Linear range transform. Out-of-range input is clamped to the source range first.
    pub fn scale(&self, raw: i32) -> i32 {
        let src = self.source_range;
        let dst = self.destination_range;
        let raw = raw.clamp(src.min, src.max) as i64;
        let offset = if self.invert {
            src.max as i64 - raw
        } else {
            raw - src.min as i64
        };
        (dst.min as i64 + offset * dst.span() / src.span()) as i32
    }

    /// Destination value of the axis when nothing touches it.
    pub fn rest(&self) -> i32 {
        0.clamp(self.destination_range.min, self.destination_range.max)
    }

    /// The setup advertised for the destination axis on the virtual device.
    pub fn abs_info(&self) -> AbsInfo {
        AbsInfo::new(
            self.rest(),
            self.destination_range.min,
            self.destination_range.max,
            self.fuzz,
            self.flat,
            0,
        )
    }
}

/// Immutable lookup from physical codes to canonical codes.
#[derive(Debug, Clone)]
pub struct MappingTable {
    buttons: HashMap<KeyCode, KeyCode>,
    axes: HashMap<AbsoluteAxisCode, AxisMapping>,
}

impl MappingTable {
    pub fn new(
        buttons: impl IntoIterator<Item = (KeyCode, KeyCode)>,
        axes: impl IntoIterator<Item = AxisMapping>,
    ) -> Result<Self, MappingError> {
        let mut button_map = HashMap::new();
        for (source, destination) in buttons {
            if button_map.insert(source, destination).is_some() {
                return Err(MappingError::DuplicateButton(source));
            }
        }
        let mut axis_map = HashMap::new();
        for mapping in axes {
            mapping.validate()?;
            if axis_map.insert(mapping.source, mapping).is_some() {
                return Err(MappingError::DuplicateAxis(mapping.source));
            }
        }
        Ok(Self {
            buttons: button_map,
            axes: axis_map,
        })
    }

    /// The SCUF Envision Pro V2 wiring onto the Xbox layout.
    pub fn builtin() -> Result<Self, MappingError> {
        let buttons = [
            (KeyCode::BTN_SOUTH, KeyCode::BTN_SOUTH),
            (KeyCode::BTN_EAST, KeyCode::BTN_EAST),
            (KeyCode::BTN_C, KeyCode::BTN_NORTH),
            (KeyCode::BTN_NORTH, KeyCode::BTN_WEST),
            (KeyCode::BTN_WEST, KeyCode::BTN_TL),
            (KeyCode::BTN_Z, KeyCode::BTN_TR),
            (KeyCode::BTN_TL, KeyCode::BTN_SELECT),
            (KeyCode::BTN_TR, KeyCode::BTN_START),
            (KeyCode::BTN_TL2, KeyCode::BTN_THUMBL),
            (KeyCode::BTN_TR2, KeyCode::BTN_THUMBR),
            (KeyCode::BTN_MODE, KeyCode::BTN_MODE),
            // Paddles land on the Elite paddle slots
            (KeyCode::BTN_TRIGGER_HAPPY1, KeyCode::BTN_TRIGGER_HAPPY1),
            (KeyCode::BTN_TRIGGER_HAPPY2, KeyCode::BTN_TRIGGER_HAPPY2),
            (KeyCode::BTN_TRIGGER_HAPPY3, KeyCode::BTN_TRIGGER_HAPPY3),
        ];

        use AbsoluteAxisCode as Abs;
        let axes = [
            (Abs::ABS_X, Abs::ABS_X, AxisRole::Stick(StickAxis::LeftX)),
            (Abs::ABS_Y, Abs::ABS_Y, AxisRole::Stick(StickAxis::LeftY)),
            (Abs::ABS_Z, Abs::ABS_RX, AxisRole::Stick(StickAxis::RightX)),
            (Abs::ABS_RZ, Abs::ABS_RY, AxisRole::Stick(StickAxis::RightY)),
            (Abs::ABS_RX, Abs::ABS_Z, AxisRole::Trigger),
            (Abs::ABS_RY, Abs::ABS_RZ, AxisRole::Trigger),
            (Abs::ABS_HAT0X, Abs::ABS_HAT0X, AxisRole::Hat),
            (Abs::ABS_HAT0Y, Abs::ABS_HAT0Y, AxisRole::Hat),
        ]
        .map(|(source, destination, role)| match role {
            AxisRole::Stick(_) => AxisMapping::direct(source, destination, role, STICK_RANGE)
                .with_noise(STICK_FUZZ, STICK_FLAT),
            AxisRole::Trigger => AxisMapping::direct(source, destination, role, TRIGGER_RANGE),
            AxisRole::Hat => AxisMapping::direct(source, destination, role, HAT_RANGE),
        });

        Self::new(buttons, axes)
    }

    pub fn translate_button(&self, source: KeyCode) -> Result<KeyCode, TranslationGap> {
        self.buttons
            .get(&source)
            .copied()
            .ok_or(TranslationGap::Button(source))
    }

    pub fn axis(&self, source: AbsoluteAxisCode) -> Result<&AxisMapping, TranslationGap> {
        self.axes.get(&source).ok_or(TranslationGap::Axis(source))
    }

    pub fn translate_axis(
        &self,
        source: AbsoluteAxisCode,
        raw: i32,
    ) -> Result<(AbsoluteAxisCode, i32), TranslationGap> {
        let mapping = self.axis(source)?;
        Ok((mapping.destination, mapping.scale(raw)))
    }

    pub fn destination_buttons(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.buttons.values().copied()
    }

    pub fn axes(&self) -> impl Iterator<Item = &AxisMapping> {
        self.axes.values()
    }
}

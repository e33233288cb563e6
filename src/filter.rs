//! Conditioning of analog values after they have been mapped onto canonical ranges.
//!
//! Sticks get a radial deadzone followed by per-axis jitter suppression,
//! triggers get a linear deadzone, hats are left alone.

use crate::mapping::{AxisRange, StickAxis};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    /// Radius on the normalized [-1, 1] stick plane.
    pub stick_deadzone: f64,
    /// Smallest change of a stick axis that is emitted.
    pub jitter_threshold: i32,
    /// Trigger values below this clamp to rest.
    pub trigger_deadzone: i32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            stick_deadzone: 0.107,
            jitter_threshold: 64,
            trigger_deadzone: 10,
        }
    }
}

/// Apply a circular deadzone to one stick.
///
/// The pair is normalized by `range.max`. Inside the radius the stick is
/// centered, outside it the magnitude is rescaled so that it grows from zero
/// at the deadzone edge to full scale at full deflection, keeping the
/// direction.
pub fn radial_deadzone(x: i32, y: i32, range: AxisRange, radius: f64) -> (i32, i32) {
    let full = range.max as f64;
    let nx = (x as f64 / full).clamp(-1.0, 1.0);
    let ny = (y as f64 / full).clamp(-1.0, 1.0);
    let magnitude = nx.hypot(ny);
    if magnitude <= radius {
        return (0, 0);
    }

    let scale = ((magnitude - radius) / (1.0 - radius)).min(1.0);
    let output = |n: f64| {
        let v = (n / magnitude * scale * full).round();
        v.clamp(range.min as f64, range.max as f64) as i32
    };
    (output(nx), output(ny))
}

pub fn trigger_deadzone(value: i32, range: AxisRange, threshold: i32) -> i32 {
    if value - range.min < threshold {
        range.min
    } else {
        value
    }
}

/// Last value emitted for one axis.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JitterMemory {
    last: Option<i32>,
}

impl JitterMemory {
    /// Returns the value to emit, or `None` when the change is noise.
    /// Center is emitted whenever the last emitted value was off center.
    pub fn suppress(&mut self, value: i32, threshold: i32) -> Option<i32> {
        let noise = match self.last {
            None => false,
            Some(last) if value == 0 => last == 0,
            Some(last) => (value - last).abs() < threshold,
        };
        if noise {
            return None;
        }
        self.last = Some(value);
        Some(value)
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<i32> {
        self.last
    }
}

/// Per-session memory of the stick filters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilterState {
    jitter: [JitterMemory; 4],
}

impl FilterState {
    pub fn jitter(&mut self, axis: StickAxis) -> &mut JitterMemory {
        &mut self.jitter[axis.index()]
    }

    #[cfg(test)]
    pub fn last_emitted(&self, axis: StickAxis) -> Option<i32> {
        self.jitter[axis.index()].last()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

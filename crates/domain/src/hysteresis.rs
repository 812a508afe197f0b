//! HysteresisSwitch — threshold switching without chatter.
//!
//! A plain threshold comparison flips back and forth when the measured value
//! hovers around the threshold. This switch widens the decision point into a
//! band: switching on requires `threshold + width/2`, switching off requires
//! dropping below `threshold - width/2`.

/// A two-point controller around a configurable threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HysteresisSwitch {
    threshold: f64,
    width: f64,
    on: bool,
}

impl HysteresisSwitch {
    /// Create a switch around `threshold` with the given band `width`,
    /// starting in the off state.
    #[must_use]
    pub fn new(threshold: f64, width: f64) -> Self {
        Self::with_state(threshold, width, false)
    }

    /// Create a switch with an explicit initial state.
    #[must_use]
    pub fn with_state(threshold: f64, width: f64, on: bool) -> Self {
        Self {
            threshold,
            width,
            on,
        }
    }

    /// Replace the threshold. Takes effect on the next [`update`](Self::update).
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    /// Feed a measured value and return the resulting state.
    ///
    /// The comparison is `>=` against `threshold - width/2` while on and
    /// `threshold + width/2` while off, so a value inside the band keeps the
    /// current state.
    pub fn update(&mut self, value: f64) -> bool {
        let effective = if self.on {
            self.threshold - self.width / 2.0
        } else {
            self.threshold + self.width / 2.0
        };
        self.on = value >= effective;
        self.on
    }

    /// Current state without feeding a new value.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.on
    }
}

//! Items — named platform values the rules observe and command.
//!
//! An item is the unit of state exposed by the automation platform: a wall
//! switch, a dimmer channel, a numeric sensor, a door contact. Rules never
//! talk to hardware; they read and write items by name.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a platform item.
///
/// Names are the only identity items have; the platform guarantees they are
/// unique within a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemName(String);

impl ItemName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ItemName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The kind of values an item carries, and which commands it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Binary on/off actuator.
    Switch,
    /// Percentage actuator (lights); also accepts on/off and step commands.
    Dimmer,
    /// Percentage actuator for blinds; 0 is open, 100 is closed.
    #[serde(rename = "rollershutter")]
    RollerShutter,
    /// Numeric sensor or setpoint.
    Number,
    /// Binary open/closed sensor; not commandable.
    Contact,
    /// Free-form text, used for persisted rule states.
    Text,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Switch => f.write_str("switch"),
            Self::Dimmer => f.write_str("dimmer"),
            Self::RollerShutter => f.write_str("rollershutter"),
            Self::Number => f.write_str("number"),
            Self::Contact => f.write_str("contact"),
            Self::Text => f.write_str("text"),
        }
    }
}

/// Binary actuator value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OnOff {
    On,
    Off,
}

impl OnOff {
    #[must_use]
    pub fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

impl From<bool> for OnOff {
    fn from(value: bool) -> Self {
        if value { Self::On } else { Self::Off }
    }
}

/// Shutter travel command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpDown {
    Up,
    Down,
}

/// Relative dimming command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Step {
    Increase,
    Decrease,
}

/// Contact sensor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpenClosed {
    Open,
    Closed,
}

impl OpenClosed {
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// A value carried by an item state or command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    OnOff(OnOff),
    Percent(f64),
    Decimal(f64),
    UpDown(UpDown),
    Step(Step),
    OpenClosed(OpenClosed),
    Text(String),
    /// Halt shutter travel.
    Stop,
    /// No usable value (unlinked channel, startup).
    Undef,
}

impl Value {
    /// Numeric view of [`Percent`](Self::Percent) and [`Decimal`](Self::Decimal) values.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Percent(v) | Self::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    /// Binary view of [`OnOff`](Self::OnOff) values.
    #[must_use]
    pub fn as_on_off(&self) -> Option<OnOff> {
        match self {
            Self::OnOff(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_undef(&self) -> bool {
        matches!(self, Self::Undef)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnOff(OnOff::On) => f.write_str("ON"),
            Self::OnOff(OnOff::Off) => f.write_str("OFF"),
            Self::Percent(v) | Self::Decimal(v) => write!(f, "{v}"),
            Self::UpDown(UpDown::Up) => f.write_str("UP"),
            Self::UpDown(UpDown::Down) => f.write_str("DOWN"),
            Self::Step(Step::Increase) => f.write_str("INCREASE"),
            Self::Step(Step::Decrease) => f.write_str("DECREASE"),
            Self::OpenClosed(OpenClosed::Open) => f.write_str("OPEN"),
            Self::OpenClosed(OpenClosed::Closed) => f.write_str("CLOSED"),
            Self::Text(v) => f.write_str(v),
            Self::Stop => f.write_str("STOP"),
            Self::Undef => f.write_str("UNDEF"),
        }
    }
}

impl From<OnOff> for Value {
    fn from(value: OnOff) -> Self {
        Self::OnOff(value)
    }
}

impl From<OpenClosed> for Value {
    fn from(value: OpenClosed) -> Self {
        Self::OpenClosed(value)
    }
}

/// Everything needed to create an item in the platform registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub name: ItemName,
    pub kind: ItemKind,
    pub label: Option<String>,
}

impl ItemSpec {
    #[must_use]
    pub fn new(name: impl Into<ItemName>, kind: ItemKind) -> Self {
        Self {
            name: name.into(),
            kind,
            label: None,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

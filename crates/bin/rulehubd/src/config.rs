//! Configuration loading — one TOML file describing items and rules.
//!
//! Looks for `rulehub.toml` in the working directory (override with
//! `RULEHUB_CONFIG`). Items are declared up front and seeded into the
//! platform before any rule is built; every rule section embeds the rule's
//! own configuration type, so the file mirrors the rule API one to one.

use serde::Deserialize;

use rulehub_app::rules::{
    CurrentSwitchConfig, EnergySaveConfig, LightConfig, MotionConfig, PresenceConfig,
    ShadingConfig, SleepConfig, SpeakerConfig, VentilationConfig,
};
use rulehub_domain::item::{ItemKind, ItemName, ItemSpec, OnOff, OpenClosed, Value};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Items to create and seed before the rules start.
    pub items: Vec<ItemConfig>,
    pub lights: Vec<LightConfig>,
    pub presence: Option<PresenceConfig>,
    pub sleep: Option<SleepConfig>,
    pub shadings: Vec<ShadingConfig>,
    pub ventilations: Vec<VentilationConfig>,
    pub motions: Vec<MotionConfig>,
    pub speakers: Vec<SpeakerConfig>,
    pub energy_saves: Vec<EnergySaveConfig>,
    pub current_switches: Vec<CurrentSwitchConfig>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "rulehubd=info,rulehub=info".to_string(),
        }
    }
}

/// One item declaration with its optional startup value.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemConfig {
    pub name: ItemName,
    pub kind: ItemKind,
    /// Startup value in command notation (`ON`, `OPEN`, `42.5`, free text).
    #[serde(default)]
    pub initial: Option<String>,
}

impl ItemConfig {
    #[must_use]
    pub fn spec(&self) -> ItemSpec {
        ItemSpec::new(self.name.clone(), self.kind)
    }

    /// Parse the `initial` field against the item kind.
    ///
    /// # Errors
    ///
    /// Fails when the text does not fit the kind's vocabulary.
    pub fn initial_value(&self) -> Result<Option<Value>, ConfigError> {
        let Some(raw) = &self.initial else {
            return Ok(None);
        };
        let invalid = || ConfigError::InvalidInitial {
            item: self.name.clone(),
            kind: self.kind,
            value: raw.clone(),
        };
        let value = match self.kind {
            ItemKind::Switch => match raw.as_str() {
                "ON" => Value::OnOff(OnOff::On),
                "OFF" => Value::OnOff(OnOff::Off),
                _ => return Err(invalid()),
            },
            ItemKind::Contact => match raw.as_str() {
                "OPEN" => Value::OpenClosed(OpenClosed::Open),
                "CLOSED" => Value::OpenClosed(OpenClosed::Closed),
                _ => return Err(invalid()),
            },
            ItemKind::Dimmer | ItemKind::RollerShutter => {
                Value::Percent(raw.parse().map_err(|_| invalid())?)
            }
            ItemKind::Number => Value::Decimal(raw.parse().map_err(|_| invalid())?),
            ItemKind::Text => Value::Text(raw.clone()),
        };
        Ok(Some(value))
    }
}

impl Config {
    /// Load configuration from `rulehub.toml` (or `RULEHUB_CONFIG`) then
    /// apply environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is malformed.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("RULEHUB_CONFIG").unwrap_or_else(|_| "rulehub.toml".to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("RULEHUB_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    /// Number of rule sections across all families.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.lights.len()
            + usize::from(self.presence.is_some())
            + usize::from(self.sleep.is_some())
            + self.shadings.len()
            + self.ventilations.len()
            + self.motions.len()
            + self.speakers.len()
            + self.energy_saves.len()
            + self.current_switches.len()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// An `initial` value outside its item kind's vocabulary.
    #[error("invalid initial value {value:?} for {kind} item {item}")]
    InvalidInitial {
        item: ItemName,
        kind: ItemKind,
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.logging.filter, "rulehubd=info,rulehub=info");
        assert!(config.items.is_empty());
        assert_eq!(config.rule_count(), 0);
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.rule_count(), 0);
    }

    #[test]
    fn should_parse_items_and_rules() {
        let toml = "
            [logging]
            filter = 'debug'

            [[items]]
            name = 'kitchen_light'
            kind = 'dimmer'
            initial = '0'

            [[items]]
            name = 'kitchen_door'
            kind = 'contact'
            initial = 'CLOSED'

            [[lights]]
            name = 'kitchen'
            light_item = 'kitchen_light'
            control_items = []

            [lights.settings.on.night]
            brightness = 80.0
            timeout = 600

            [[current_switches]]
            name = 'washer'
            current_item = 'washer_current'
            output_item = 'washer_running'

            [current_switches.settings]
            extended_timeout = 120
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.items.len(), 2);
        assert_eq!(config.rule_count(), 2);
        assert_eq!(config.lights[0].name, "kitchen");
        assert_eq!(config.current_switches[0].settings.extended_timeout, 120);
    }

    #[test]
    fn should_parse_initial_values_per_kind() {
        let item = |kind, initial: &str| ItemConfig {
            name: ItemName::from("x"),
            kind,
            initial: Some(initial.to_string()),
        };
        assert_eq!(
            item(ItemKind::Switch, "ON").initial_value().unwrap(),
            Some(Value::OnOff(OnOff::On))
        );
        assert_eq!(
            item(ItemKind::Contact, "OPEN").initial_value().unwrap(),
            Some(Value::OpenClosed(OpenClosed::Open))
        );
        assert_eq!(
            item(ItemKind::Dimmer, "42.5").initial_value().unwrap(),
            Some(Value::Percent(42.5))
        );
        assert_eq!(
            item(ItemKind::Number, "0.3").initial_value().unwrap(),
            Some(Value::Decimal(0.3))
        );
        assert_eq!(
            item(ItemKind::Text, "auto.on").initial_value().unwrap(),
            Some(Value::Text("auto.on".into()))
        );
    }

    #[test]
    fn should_reject_initial_values_outside_the_vocabulary() {
        let item = ItemConfig {
            name: ItemName::from("door"),
            kind: ItemKind::Contact,
            initial: Some("ON".to_string()),
        };
        assert!(matches!(
            item.initial_value(),
            Err(ConfigError::InvalidInitial { .. })
        ));
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.rule_count(), 0);
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }
}

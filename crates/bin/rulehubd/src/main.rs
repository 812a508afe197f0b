//! # rulehubd — rulehub daemon
//!
//! Composition root that loads the configuration, seeds the platform,
//! builds the configured rules, and runs the engine.
//!
//! ## Responsibilities
//! - Parse configuration (`rulehub.toml`, env vars)
//! - Create and seed the platform items
//! - Construct each configured rule, isolating per-rule failures
//! - Run the engine loop until SIGINT
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no rule logic belongs here.

mod config;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use rulehub_adapter_virtual::VirtualPlatform;
use rulehub_app::engine::RuleEngine;
use rulehub_app::ports::Platform;
use rulehub_app::rules::{
    CurrentSwitchRule, EnergySaveRule, LightRule, MotionRule, PresenceRule, Rule, ShadingRule,
    SleepRule, SpeakerRule, VentilationRule,
};

use self::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    let platform = Arc::new(VirtualPlatform::new());
    seed_items(&platform, &config).await?;
    tracing::info!(items = config.items.len(), "platform seeded");

    let mut engine = RuleEngine::new(Arc::clone(&platform));
    build_rules(&platform, &config, &mut engine).await;
    if config.rule_count() == 0 {
        tracing::warn!("no rules configured; the engine will only relay events");
    }
    engine.init().await;

    tokio::select! {
        () = engine.run() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("shutdown signal received");
        }
    }
    Ok(())
}

async fn seed_items(platform: &Arc<VirtualPlatform>, config: &Config) -> anyhow::Result<()> {
    for item in &config.items {
        platform.ensure_item(&item.spec()).await?;
        if let Some(value) = item.initial_value()? {
            platform.post_update(&item.name, value).await?;
        }
    }
    Ok(())
}

/// Build every configured rule; a rule that fails construction is logged
/// and left out, the others still run.
async fn build_rules(
    platform: &Arc<VirtualPlatform>,
    config: &Config,
    engine: &mut RuleEngine<Arc<VirtualPlatform>>,
) {
    macro_rules! build {
        ($config:expr, $rule:ty, $variant:ident) => {
            match <$rule>::new(platform, $config.clone()).await {
                Ok(rule) => engine.add_rule(Rule::$variant(rule)),
                Err(error) => {
                    tracing::error!(rule = %$config.name, %error, "rule failed to build");
                }
            }
        };
    }

    for light in &config.lights {
        build!(light, LightRule, Light);
    }
    if let Some(presence) = &config.presence {
        build!(presence, PresenceRule, Presence);
    }
    if let Some(sleep) = &config.sleep {
        build!(sleep, SleepRule, Sleep);
    }
    for shading in &config.shadings {
        build!(shading, ShadingRule, Shading);
    }
    for ventilation in &config.ventilations {
        build!(ventilation, VentilationRule, Ventilation);
    }
    for motion in &config.motions {
        build!(motion, MotionRule, Motion);
    }
    for speaker in &config.speakers {
        build!(speaker, SpeakerRule, Speaker);
    }
    for energy_save in &config.energy_saves {
        build!(energy_save, EnergySaveRule, EnergySave);
    }
    for current_switch in &config.current_switches {
        build!(current_switch, CurrentSwitchRule, CurrentSwitch);
    }
}

use serde::Deserialize;
use std::fs;
use std::env;
use std::time::Duration;
use anyhow::{Context, Result};

use crate::draw::QualityWeights;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub limiter: LimiterConfig,
    pub lootboxes: LootBoxesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimiterConfig {
    pub duration_ms: u64,
    pub num_events: usize,
    pub num_limits: usize,
}

impl LimiterConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LootBoxesConfig {
    pub regular: BoxConfig,
    pub release_celebration: BoxConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoxConfig {
    pub cost: u64,
    pub cards_num: usize,
    pub wood: u32,
    pub silver: u32,
    pub gold: u32,
    pub diamond: u32,
}

impl BoxConfig {
    pub fn weights(&self) -> QualityWeights {
        QualityWeights {
            wood: self.wood,
            silver: self.silver,
            gold: self.gold,
            diamond: self.diamond,
        }
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}

pub fn load_config() -> Result<Config> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

    let config_content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path))?;

    parse_config(&config_content)
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use geoenrich::models::BoundaryType;
use geoenrich::package::PackageConfig;
use geoenrich::resolve::RankingRule;

/// Optional TOML configuration; command line flags take precedence
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub package: Option<PackageConfig>,
    #[serde(default)]
    pub enrich: EnrichConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EnrichConfig {
    #[serde(default)]
    pub boundaries: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
    pub latitude_col: Option<String>,
    pub longitude_col: Option<String>,
    pub id_column: Option<String>,
    pub id_boundary: Option<BoundaryType>,
    pub rule: Option<RankingRule>,
    pub zoom: Option<u8>,
    pub index_col: Option<String>,
    #[serde(default)]
    pub keep_quadkey: bool,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}

use crate::filter::PathFilter;
use crate::model::FileAttributes;
use crate::tracker::DuplicatePolicy;
use crate::utils::non_overlapping_directories;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const ENV_PREFIX: &str = "CATALOG_TRACKER";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RootConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
}

impl RootConfig {
    /// The configured name, or the root's last path component.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            Path::new(&self.path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.clone())
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub roots: Vec<RootConfig>,
    pub database_path: String,
    pub tick_delay_ms: u64,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub include_extensions: Vec<String>,
    pub exclude_attributes: Vec<String>,
    pub duplicate_policy: DuplicatePolicy,
}

impl AppConfig {
    pub fn tick_delay(&self) -> Duration {
        Duration::from_millis(self.tick_delay_ms)
    }

    /// Configured roots with nested roots folded into their ancestors.
    pub fn roots(&self) -> Vec<RootConfig> {
        let paths: Vec<String> = self
            .roots
            .iter()
            .map(|r| r.path.trim_end_matches(['/', '\\']).to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let kept = non_overlapping_directories(paths);
        self.roots
            .iter()
            .filter(|r| kept.iter().any(|k| k == r.path.trim_end_matches(['/', '\\'])))
            .cloned()
            .collect()
    }

    pub fn excluded_attributes(&self) -> FileAttributes {
        let mut mask = FileAttributes::NONE;
        for name in &self.exclude_attributes {
            match FileAttributes::from_name(name) {
                Some(attr) => mask |= attr,
                None => warn!("Unknown attribute '{}' in exclude_attributes", name),
            }
        }
        mask
    }

    pub fn file_filter(&self) -> PathFilter {
        PathFilter::new()
            .exclude_attributes(self.excluded_attributes())
            .allow_extensions(&self.include_extensions)
            .ignore(&self.ignore_patterns)
    }
}

fn defaults(builder: ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("database_path", "catalog_tracker.db")?
        .set_default("tick_delay_ms", 250)?
        .set_default("exclude_attributes", vec!["hidden", "system", "temporary"])?
        .set_default("duplicate_policy", "replace-lower-priority")
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("ignore_patterns")
        .with_list_parse_key("include_extensions")
        .with_list_parse_key("exclude_attributes")
}

/// Reads `Config.{toml,json,yaml,..}` from the working directory if present,
/// then `CATALOG_TRACKER_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = defaults(Config::builder())?
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(environment())
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Like [`load_configuration`] but reads the given file, which must exist.
pub fn load_configuration_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let builder = defaults(Config::builder())?
        .add_source(ConfigFile::from(path))
        .add_source(environment())
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

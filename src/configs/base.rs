use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{common::types::AnyResult, configs::*};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
  #[serde(default)]
  pub source: SourceConfig,
  pub logging: Option<LoggingConfig>,
}

impl Config {
  /// Loads `path`, falling back to `httpsrc.toml` in the working directory.
  /// A missing default file yields the built-in defaults.
  pub fn load(path: Option<&Path>) -> AnyResult<Self> {
    let config_path = match path {
      Some(p) => p,
      None if Path::new("httpsrc.toml").exists() => Path::new("httpsrc.toml"),
      None => return Ok(Self::default()),
    };

    debug!("Loading configuration from: {}", config_path.display());

    let config_str = std::fs::read_to_string(config_path)?;
    if config_str.trim().is_empty() {
      return Err(format!("{} is empty", config_path.display()).into());
    }

    Self::from_toml(&config_str)
  }

  pub fn from_toml(s: &str) -> AnyResult<Self> {
    let config: Config = toml::from_str(s)?;
    config.source.validate()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_sections() {
    let config = Config::from_toml(
      r#"
      [source]
      location = "http://example.com/stream"
      retries = -1
      keep-alive = true

      [logging]
      level = "debug"
      "#,
    )
    .unwrap();

    assert_eq!(
      config.source.location.as_deref(),
      Some("http://example.com/stream")
    );
    assert_eq!(config.source.retries, -1);
    assert!(config.source.keep_alive);
    assert_eq!(
      config.logging.and_then(|l| l.level).as_deref(),
      Some("debug")
    );
  }

  #[test]
  fn invalid_source_section_is_rejected() {
    let err = Config::from_toml(
      r#"
      [source]
      start-offset = 10
      end-offset = 5
      "#,
    );
    assert!(err.is_err());
  }
}

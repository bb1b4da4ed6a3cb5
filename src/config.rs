use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Orientation reported by public presentation displays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteRotation {
    #[default]
    Landscape,
    Portrait,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote_rotation: RemoteRotation,
}

impl Config {
    /// Load a JSON config file, or the defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.remote_rotation, RemoteRotation::Landscape);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.remote_rotation, RemoteRotation::Landscape);

        let config: Config = serde_json::from_str(r#"{ "remote_rotation": "portrait" }"#).unwrap();
        assert_eq!(config.remote_rotation, RemoteRotation::Portrait);
    }

    #[test]
    fn test_unknown_rotation_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{ "remote_rotation": "upside-down" }"#).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load(Path::new("/nonexistent/vdisplay.json")).unwrap();
        assert_eq!(config.remote_rotation, RemoteRotation::Landscape);
    }

    #[test]
    fn test_load_ignores_refresh_rate() {
        let path = std::env::temp_dir().join(format!("vdisplay-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "refresh_rate": 1e10, "remote_rotation": "portrait" }"#).unwrap();

        let config = Config::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.remote_rotation, RemoteRotation::Portrait);
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("refresh_rate").is_none());
    }
}

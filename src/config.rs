//! Persisted user configuration: $XDG_CONFIG_HOME/syoscrape/config.toml
//! (or ~/.config/syoscrape/config.toml).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Config file contents. All fields optional; only present keys apply.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Default output directory when -o is not set.
    pub output_dir: Option<PathBuf>,
}

/// Location of the config file, when a config directory exists at all.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("syoscrape").join("config.toml"))
}

/// Load the config. A missing file yields defaults; an unreadable or
/// unparseable one warns and yields defaults rather than aborting the run.
pub fn load_config() -> Config {
    let Some(path) = config_path() else {
        return Config::default();
    };
    if !path.exists() {
        return Config::default();
    }
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Warning: failed to read config {}: {}", path.display(), e);
            return Config::default();
        }
    };
    match toml::from_str(&raw) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: failed to parse config {}: {}", path.display(), e);
            Config::default()
        }
    }
}

/// Persist the config atomically (write a sibling temp file, then rename).
/// Returns the path written.
pub fn save_config(config: &Config) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "no config directory available".to_string())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
    }
    let body = toml::to_string_pretty(config)
        .map_err(|e| format!("failed to serialize config: {}", e))?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, body).map_err(|e| format!("failed to write {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, &path)
        .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let c: Config = toml::from_str("").unwrap();
        assert!(c.output_dir.is_none());
    }

    #[test]
    fn parse_output_dir() {
        let c: Config = toml::from_str("output_dir = \"books\"").unwrap();
        assert_eq!(c.output_dir.as_deref(), Some(std::path::Path::new("books")));
    }

    #[test]
    fn round_trips_through_toml() {
        let c = Config {
            output_dir: Some(PathBuf::from("/tmp/novels")),
        };
        let s = toml::to_string_pretty(&c).unwrap();
        let back: Config = toml::from_str(&s).unwrap();
        assert_eq!(back.output_dir, c.output_dir);
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(toml::from_str::<Config>("output_dir = [").is_err());
    }
}

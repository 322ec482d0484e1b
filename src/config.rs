//! Downcall Configuration
//!
//! `downcall.toml` selects the call path and adds library search
//! directories:
//!
//! ```toml
//! [linker]
//! no_spec = false
//!
//! [library]
//! search_paths = ["native/build"]
//! ```
//!
//! `DOWNCALL_NO_SPEC` overrides `linker.no_spec` at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name searched for by [`DowncallConfig::find_and_load`]
pub const CONFIG_FILE: &str = "downcall.toml";

/// Environment variable forcing the generic call path
pub const NO_SPEC_ENV: &str = "DOWNCALL_NO_SPEC";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching downcall.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DowncallConfig {
    /// Linker settings
    #[serde(default)]
    pub linker: LinkerConfig,

    /// Library lookup settings
    #[serde(default)]
    pub library: LibraryConfig,
}

impl DowncallConfig {
    /// Read a `downcall.toml`. A missing file is an error here; only the
    /// directory search falls back to defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(toml::from_str(&text)?)
    }

    /// [`find_and_load`](Self::find_and_load) from the working directory
    pub fn load_from_cwd() -> ConfigResult<Self> {
        Self::find_and_load(&std::env::current_dir()?)
    }

    /// Use the nearest `downcall.toml` in `start_dir` or its ancestors.
    /// With none found the linker runs specialized with default paths.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        match start_dir
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE))
            .find(|candidate| candidate.is_file())
        {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Write these settings as TOML
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_no_spec(std::env::var(NO_SPEC_ENV).ok().as_deref());
    }

    fn apply_no_spec(&mut self, value: Option<&str>) {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "1" || v == "true" => self.linker.no_spec = true,
            Some(v) if v == "0" || v == "false" => self.linker.no_spec = false,
            _ => {}
        }
    }

    /// Configured library search paths
    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.library.search_paths.iter().map(PathBuf::from).collect()
    }
}

/// Linker settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LinkerConfig {
    /// Bind every handle to the generic path
    #[serde(default)]
    pub no_spec: bool,
}

/// Library lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LibraryConfig {
    /// Extra directories searched for libraries given by name
    #[serde(default)]
    pub search_paths: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DowncallConfig::default();
        assert!(!config.linker.no_spec);
        assert!(config.library.search_paths.is_empty());
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[linker]
no_spec = true

[library]
search_paths = ["/opt/bench/lib", "native"]
"#;
        let config: DowncallConfig = toml::from_str(toml_str).unwrap();
        assert!(config.linker.no_spec);
        assert_eq!(
            config.search_paths(),
            vec![PathBuf::from("/opt/bench/lib"), PathBuf::from("native")]
        );
    }

    #[test]
    fn test_partial_config() {
        let config: DowncallConfig = toml::from_str("[library]\n").unwrap();
        assert!(!config.linker.no_spec);
    }

    #[test]
    fn test_no_spec_override() {
        let mut config = DowncallConfig::default();
        config.apply_no_spec(Some("TRUE"));
        assert!(config.linker.no_spec);
        config.apply_no_spec(Some("garbage"));
        assert!(config.linker.no_spec);
        config.apply_no_spec(Some("0"));
        assert!(!config.linker.no_spec);
        config.apply_no_spec(None);
        assert!(!config.linker.no_spec);
    }

    #[test]
    fn test_save_and_find() {
        let dir = std::env::temp_dir().join(format!("downcall-config-{}", std::process::id()));
        let nested = dir.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let mut config = DowncallConfig::default();
        config.linker.no_spec = true;
        config.library.search_paths.push("lib".to_string());
        config.save(&dir.join(CONFIG_FILE)).unwrap();

        let found = DowncallConfig::find_and_load(&nested).unwrap();
        assert_eq!(found, config);

        assert!(matches!(
            DowncallConfig::load(&nested.join(CONFIG_FILE)),
            Err(ConfigError::NotFound(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_malformed_config() {
        let dir = std::env::temp_dir().join(format!("downcall-bad-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);
        std::fs::write(&path, "[linker]\nno_spec = \"sometimes\"\n").unwrap();

        assert!(matches!(DowncallConfig::load(&path), Err(ConfigError::Parse(_))));
        assert!(matches!(DowncallConfig::find_and_load(&dir), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

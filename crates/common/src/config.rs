// JDB - JVM Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Debugger configuration.
//!
//! Settings are read from `~/.jdb/config.toml` (or an explicit path) and can be
//! overridden field by field from the command line.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::BreakpointSpec;

/// Default JDWP host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default JDWP port, as used by `-agentlib:jdwp=transport=dt_socket,address=5005`.
pub const DEFAULT_PORT: u16 = 5005;

/// Debugger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host of the target's debug endpoint
    pub host: String,
    /// Port of the target's debug endpoint
    pub port: u16,
    /// Connect timeout in seconds; `None` waits for the OS default
    pub connect_timeout_secs: Option<u64>,
    /// Directories searched for unit source files
    pub source_roots: Vec<PathBuf>,
    /// Source file extensions tried for every unit, in order
    pub source_extensions: Vec<String>,
    /// Breakpoints declared as `Unit:line`
    pub breakpoints: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_secs: Some(10),
            source_roots: vec![PathBuf::from(".")],
            source_extensions: vec!["java".to_string(), "kt".to_string()],
            breakpoints: Vec::new(),
        }
    }
}

impl Config {
    /// Get the default config file path (~/.jdb/config.toml)
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| eyre!("Unable to determine home directory"))?;
        Ok(home.join(".jdb").join("config.toml"))
    }

    /// Load configuration from the default location, falling back to defaults
    /// when the file does not exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {path:?}"))?;

        let config: Self =
            toml::from_str(&content).wrap_err("Failed to parse config file as TOML")?;

        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a file, creating parent directories as needed
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).wrap_err("Failed to serialize config to TOML")?;
        fs::write(path, content)
            .wrap_err_with(|| format!("Failed to write config file: {path:?}"))?;

        debug!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Set the target host
    pub fn with_host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    /// Set the target port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connect timeout in seconds
    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    /// Prepend source roots so they are searched before configured ones
    pub fn with_source_roots(mut self, roots: Vec<PathBuf>) -> Self {
        if !roots.is_empty() {
            let mut merged = roots;
            merged.extend(self.source_roots);
            merged.dedup();
            self.source_roots = merged;
        }
        self
    }

    /// Add breakpoint declarations
    pub fn with_breakpoints(mut self, breakpoints: Vec<String>) -> Self {
        self.breakpoints.extend(breakpoints);
        self
    }

    /// Connect timeout as a [`Duration`]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.filter(|secs| *secs > 0).map(Duration::from_secs)
    }

    /// Parse the declared breakpoints, failing on the first malformed entry
    pub fn breakpoint_specs(&self) -> Result<Vec<BreakpointSpec>> {
        let mut specs = Vec::with_capacity(self.breakpoints.len());
        for raw in &self.breakpoints {
            let spec: BreakpointSpec =
                raw.parse().wrap_err_with(|| format!("Invalid breakpoint `{raw}`"))?;
            if !specs.contains(&spec) {
                specs.push(spec);
            }
        }
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.source_extensions, vec!["java", "kt"]);
    }

    #[test]
    fn test_save_and_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::default()
            .with_port(8000)
            .with_breakpoints(vec!["com.example.Main:10".to_string()]);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "port = 9009\nbreakpoints = [\"a.B:3\"]\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.port, 9009);
        assert_eq!(loaded.host, DEFAULT_HOST);
        assert_eq!(loaded.breakpoint_specs().unwrap(), vec![BreakpointSpec::new("a.B", 3)]);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "port = \"not a number\"").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config::default()
            .with_host("10.0.0.2".to_string())
            .with_source_roots(vec![PathBuf::from("src/main/java")])
            .with_connect_timeout_secs(0);

        assert_eq!(config.host, "10.0.0.2");
        assert_eq!(config.source_roots, vec![PathBuf::from("src/main/java"), PathBuf::from(".")]);
        assert_eq!(config.connect_timeout(), None);
    }

    #[test]
    fn test_breakpoint_specs_deduplicate_and_validate() {
        let config = Config::default().with_breakpoints(vec![
            "a.B:3".to_string(),
            "a.B:3".to_string(),
            "a.C:9".to_string(),
        ]);
        assert_eq!(config.breakpoint_specs().unwrap().len(), 2);

        let config = config.with_breakpoints(vec!["broken".to_string()]);
        assert!(config.breakpoint_specs().is_err());
    }
}

//! Persistent engine settings

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const MIB: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct XisoConfig {
    /// Chunk size used when copying file data during a rebuild.
    pub copy_chunk_size: usize,
    /// Chunk size for the sequential whole-image surface scan.
    pub scan_chunk_size: usize,
    /// Chunk size for per-file content reads during verification.
    pub verify_chunk_size: usize,
    pub deep_scan: bool,
    pub verify_after_build: bool,
    pub skip_system_update: bool,
}

impl Default for XisoConfig {
    fn default() -> Self {
        Self {
            copy_chunk_size: MIB,
            scan_chunk_size: 8 * MIB,
            verify_chunk_size: 64 * 1024,
            deep_scan: false,
            verify_after_build: true,
            skip_system_update: false,
        }
    }
}

impl XisoConfig {
    /// Get the user config directory path
    pub fn user_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rusty-xiso"))
    }

    /// Get the user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        Self::user_config_dir().map(|dir| dir.join("config.json"))
    }

    /// Load configuration from config.json
    pub fn load() -> Self {
        if let Some(user_config) = Self::user_config_path() {
            if let Ok(config) = Self::load_from_path(&user_config) {
                return config;
            }
        }

        if let Ok(config) = Self::load_from_path("config.json") {
            return config;
        }

        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                if let Ok(config) = Self::load_from_path(exe_dir.join("config.json")) {
                    return config;
                }
            }
        }

        Self::default()
    }

    /// Save configuration to user config directory
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let Some(path) = Self::user_config_path() else {
            anyhow::bail!("could not determine user config directory");
        };
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: impl Into<PathBuf>) -> anyhow::Result<()> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        Ok(())
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.into())?;
        let mut config: XisoConfig = serde_json::from_str(&content)?;
        config.sanitize();
        Ok(config)
    }

    /// Zero-sized chunks would stall every copy loop; fall back to defaults.
    fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.copy_chunk_size == 0 {
            self.copy_chunk_size = defaults.copy_chunk_size;
        }
        if self.scan_chunk_size == 0 {
            self.scan_chunk_size = defaults.scan_chunk_size;
        }
        if self.verify_chunk_size == 0 {
            self.verify_chunk_size = defaults.verify_chunk_size;
        }
    }
}

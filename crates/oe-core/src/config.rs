//! Configuration management

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub cpu: CpuConfig,
    pub memory: MemoryConfig,
    pub debug: DebugConfig,
}

impl Config {
    /// Directory holding the configuration file
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxidized-espresso")
    }

    /// Default configuration file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// General settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Start with all cores paused in the debugger
    pub start_paused: bool,
}

/// CPU execution backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuBackend {
    /// Decode and interpret every instruction
    Interpreter,
    /// Compile basic blocks, interpret what cannot be compiled
    #[default]
    Jit,
    /// Run every instruction through both backends and compare
    JitVerify,
}

impl std::str::FromStr for CpuBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interpreter" => Ok(Self::Interpreter),
            "jit" => Ok(Self::Jit),
            "jit_verify" | "verify" => Ok(Self::JitVerify),
            other => Err(format!("unknown cpu backend '{}'", other)),
        }
    }
}

/// CPU settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub backend: CpuBackend,
    /// Number of virtual cores
    pub core_count: usize,
    /// Longest basic block the JIT will attempt before giving up
    pub jit_max_instructions: u32,
    /// Entries kept in each thread's trace ring buffer, 0 disables tracing
    pub trace_buffer_size: usize,
    /// Log every taken branch
    pub branch_trace: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            backend: CpuBackend::Jit,
            core_count: 3,
            jit_max_instructions: 3000,
            trace_buffer_size: 128,
            branch_trace: false,
        }
    }
}

/// Guest memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Size of the guest heap region
    pub heap_size: u32,
    /// Default stack size for new guest threads
    pub stack_size: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            heap_size: 0x0400_0000,
            stack_size: 0x0001_0000,
        }
    }
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Debugging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub log_to_file: bool,
    pub log_path: PathBuf,
    /// Pause when a guest thread starts executing
    pub break_on_entry: bool,
    /// Pause when a guest thread exits
    pub break_on_exit: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_to_file: false,
            log_path: PathBuf::from("oxidized-espresso.log"),
            break_on_entry: false,
            break_on_exit: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cpu.backend, CpuBackend::Jit);
        assert_eq!(config.cpu.core_count, 3);
        assert_eq!(config.debug.log_level, LogLevel::Info);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [cpu]
            backend = "jit_verify"
            core_count = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.cpu.backend, CpuBackend::JitVerify);
        assert_eq!(config.cpu.core_count, 1);
        assert_eq!(config.cpu.jit_max_instructions, 3000);
        assert_eq!(config.memory.stack_size, 0x0001_0000);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("oe-config-test-{}", std::process::id()))
            .join("config.toml");

        let mut config = Config::default();
        config.cpu.backend = CpuBackend::Interpreter;
        config.debug.log_level = LogLevel::Trace;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.cpu.backend, CpuBackend::Interpreter);
        assert_eq!(loaded.debug.log_level, LogLevel::Trace);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("jit".parse::<CpuBackend>(), Ok(CpuBackend::Jit));
        assert_eq!("verify".parse::<CpuBackend>(), Ok(CpuBackend::JitVerify));
        assert!("native".parse::<CpuBackend>().is_err());
    }
}

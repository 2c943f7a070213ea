//! Bridge configuration

use std::env;
use std::fmt;
use std::str::FromStr;

/// Engine initialization stages, in the order the engine runs them.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InitLevel {
    /// Core types only
    Core = 0,
    /// Engine servers are available
    Servers = 1,
    /// Scene classes are available
    Scene = 2,
    /// Editor classes are available
    Editor = 3,
}

impl InitLevel {
    /// Decode the engine's level number.
    pub fn from_i32(level: i32) -> Option<Self> {
        match level {
            0 => Some(InitLevel::Core),
            1 => Some(InitLevel::Servers),
            2 => Some(InitLevel::Scene),
            3 => Some(InitLevel::Editor),
            _ => None,
        }
    }

    /// The engine's level number.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for InitLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitLevel::Core => "core",
            InitLevel::Servers => "servers",
            InitLevel::Scene => "scene",
            InitLevel::Editor => "editor",
        };
        f.write_str(name)
    }
}

impl FromStr for InitLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "core" | "0" => Ok(InitLevel::Core),
            "servers" | "1" => Ok(InitLevel::Servers),
            "scene" | "2" => Ok(InitLevel::Scene),
            "editor" | "3" => Ok(InitLevel::Editor),
            _ => Err(()),
        }
    }
}

/// Invalid configuration input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable holds a value that cannot be parsed
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name
        var: &'static str,
        /// Rejected value
        value: String,
    },
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Level at which classes become usable (default: Scene)
    pub minimum_init_level: InitLevel,
    /// Warn about owned handles still alive at registry teardown (default: true)
    pub leak_check: bool,
    /// Maximum ancestor hops when resolving a virtual method (default: 32)
    pub max_fallback_depth: usize,
    /// `tracing` filter directive used by [`crate::logging::init`] (default: "gdbridge=warn")
    pub log_filter: String,
    /// Install a `tracing` subscriber when the bridge is installed (default: false)
    pub install_logger: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            minimum_init_level: InitLevel::Scene,
            leak_check: true,
            max_fallback_depth: 32,
            log_filter: "gdbridge=warn".to_string(),
            install_logger: false,
        }
    }
}

impl BridgeConfig {
    /// Defaults overlaid with `GDBRIDGE_*` environment variables.
    ///
    /// - `GDBRIDGE_LOG`: log filter; also turns on `install_logger`
    /// - `GDBRIDGE_LEAK_CHECK`: `1`/`0`/`true`/`false`
    /// - `GDBRIDGE_MAX_FALLBACK_DEPTH`: positive integer
    /// - `GDBRIDGE_MIN_INIT_LEVEL`: `core`, `servers`, `scene` or `editor`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = BridgeConfig::default();

        if let Some(filter) = lookup("GDBRIDGE_LOG") {
            config.log_filter = filter;
            config.install_logger = true;
        }

        if let Some(value) = lookup("GDBRIDGE_LEAK_CHECK") {
            config.leak_check = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "GDBRIDGE_LEAK_CHECK",
                        value,
                    })
                }
            };
        }

        if let Some(value) = lookup("GDBRIDGE_MAX_FALLBACK_DEPTH") {
            config.max_fallback_depth = match value.parse::<usize>() {
                Ok(depth) if depth > 0 => depth,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "GDBRIDGE_MAX_FALLBACK_DEPTH",
                        value,
                    })
                }
            };
        }

        if let Some(value) = lookup("GDBRIDGE_MIN_INIT_LEVEL") {
            config.minimum_init_level =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    var: "GDBRIDGE_MIN_INIT_LEVEL",
                    value: value.clone(),
                })?;
        }

        Ok(config)
    }
}

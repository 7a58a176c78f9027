//! Harness configuration with TOML, environment variable, and default
//! sources.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fmt, fs};

use serde::{Deserialize, Serialize};

use crate::compare::{ComparePolicy, ComparisonMode, Normalization};
use crate::error::{ParityError, Result};

// ── LogLevel ────────────────────────────────────────────────────────

/// Log verbosity for the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ParityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(ParityError::config(format!("invalid log level: {other}"))),
        }
    }
}

// ── SamplesLayout ───────────────────────────────────────────────────

/// Where the pre-built sample programs live, per language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplesLayout {
    /// Root of the Python samples (scripts are resolved relative to it)
    pub python_dir: PathBuf,
    /// Directory holding the compiled C++ samples
    pub cpp_dir: PathBuf,
    /// Directory holding the compiled C samples
    pub c_dir: PathBuf,
    /// Interpreter used to launch Python samples
    pub python: PathBuf,
}

impl Default for SamplesLayout {
    fn default() -> Self {
        Self {
            python_dir: PathBuf::from("samples/python"),
            cpp_dir: PathBuf::from("samples/cpp"),
            c_dir: PathBuf::from("samples/c"),
            python: PathBuf::from("python3"),
        }
    }
}

// ── TOML wrapper ────────────────────────────────────────────────────

/// Wrapper used for the `[harness]` table in TOML files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TomlWrapper {
    #[serde(default)]
    harness: HarnessConfig,
}

// ── HarnessConfig ───────────────────────────────────────────────────

/// Full configuration for an equivalence session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Per-variant wall-clock budget in seconds; 0 disables the timeout
    pub timeout_secs: u64,
    /// Budget for a single model conversion
    pub convert_timeout_secs: u64,
    pub normalization: Normalization,
    pub comparison: ComparisonMode,
    /// Run the variants of one case concurrently
    pub parallel: bool,
    /// Skip remaining variants of a case once one has failed
    pub fail_fast: bool,
    /// Run the first variant twice and require identical output
    pub check_determinism: bool,
    pub cache_dir: PathBuf,
    /// Delete `cache_dir` when the session is torn down
    pub cleanup_cache: bool,
    /// Forbid network downloads of artifacts
    pub offline: bool,
    /// Model conversion command; `{model_id}` and `{output}` are substituted
    pub converter: Vec<String>,
    pub log_level: LogLevel,
    pub samples: SamplesLayout,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            samples: SamplesLayout::default(),
            timeout_secs: 600,
            convert_timeout_secs: 3600,
            normalization: Normalization::Exact,
            comparison: ComparisonMode::Adjacent,
            parallel: false,
            fail_fast: true,
            check_determinism: false,
            cache_dir: env::temp_dir().join("sample-parity"),
            cleanup_cache: false,
            offline: false,
            converter: default_converter(),
            log_level: LogLevel::Info,
        }
    }
}

fn default_converter() -> Vec<String> {
    [
        "optimum-cli",
        "export",
        "openvino",
        "--model",
        "{model_id}",
        "--trust-remote-code",
        "{output}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl HarnessConfig {
    // ── Constructors ────────────────────────────────────────────

    /// Load configuration from a TOML file at `path`.
    ///
    /// The file is expected to contain a `[harness]` table. If the file
    /// does not exist, returns `Ok(Self::default())`.
    pub fn from_toml(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found: {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from TOML text containing a `[harness]` table.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let wrapper: TomlWrapper = toml::from_str(text)?;
        Ok(wrapper.harness)
    }

    /// Serialize to a TOML string (wrapped in `[harness]`).
    pub fn to_toml(&self) -> Result<String> {
        let wrapper = TomlWrapper { harness: self.clone() };
        Ok(toml::to_string_pretty(&wrapper)?)
    }

    /// Overlay `SAMPLES_*` and `PARITY_*` environment variables on top of
    /// `self`.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(v) = env::var("SAMPLES_PY_DIR") {
            self.samples.python_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("SAMPLES_CPP_DIR") {
            self.samples.cpp_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("SAMPLES_C_DIR") {
            self.samples.c_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("PARITY_PYTHON") {
            self.samples.python = PathBuf::from(v);
        }
        if let Ok(v) = env::var("PARITY_TIMEOUT_SECS") {
            self.timeout_secs = parse_env_u64("PARITY_TIMEOUT_SECS", &v)?;
        }
        if let Ok(v) = env::var("PARITY_CONVERT_TIMEOUT_SECS") {
            self.convert_timeout_secs = parse_env_u64("PARITY_CONVERT_TIMEOUT_SECS", &v)?;
        }
        if let Ok(v) = env::var("PARITY_NORMALIZE") {
            self.normalization = v.parse().map_err(|_| invalid_env("PARITY_NORMALIZE", &v))?;
        }
        if let Ok(v) = env::var("PARITY_COMPARE") {
            self.comparison = v.parse().map_err(|_| invalid_env("PARITY_COMPARE", &v))?;
        }
        if let Ok(v) = env::var("PARITY_PARALLEL") {
            self.parallel = parse_env_bool("PARITY_PARALLEL", &v)?;
        }
        if let Ok(v) = env::var("PARITY_FAIL_FAST") {
            self.fail_fast = parse_env_bool("PARITY_FAIL_FAST", &v)?;
        }
        if let Ok(v) = env::var("PARITY_CHECK_DETERMINISM") {
            self.check_determinism = parse_env_bool("PARITY_CHECK_DETERMINISM", &v)?;
        }
        if let Ok(v) = env::var("PARITY_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("PARITY_CLEANUP_CACHE") {
            self.cleanup_cache = parse_env_bool("PARITY_CLEANUP_CACHE", &v)?;
        }
        if let Ok(v) = env::var("PARITY_OFFLINE") {
            self.offline = parse_env_bool("PARITY_OFFLINE", &v)?;
        }
        if let Ok(v) = env::var("PARITY_LOG_LEVEL") {
            self.log_level = v.parse().map_err(|_| invalid_env("PARITY_LOG_LEVEL", &v))?;
        }
        Ok(self)
    }

    /// Defaults with the environment overlaid.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    /// Load from an optional TOML file, then overlay the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_toml(path)?,
            None => Self::default(),
        };
        let cfg = base.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    // ── Validation ──────────────────────────────────────────────

    pub fn validate(&self) -> Result<()> {
        if self.converter.is_empty() {
            return Err(ParityError::config("converter command must not be empty"));
        }
        if !self.converter.iter().any(|arg| arg.contains("{output}")) {
            return Err(ParityError::config("converter command must reference {output}"));
        }
        if self.convert_timeout_secs == 0 {
            return Err(ParityError::config("convert_timeout_secs must be >= 1"));
        }
        if self.samples.python.as_os_str().is_empty() {
            return Err(ParityError::config("python interpreter must not be empty"));
        }
        Ok(())
    }

    // ── Accessors ───────────────────────────────────────────────

    /// Per-variant timeout, `None` when unbounded.
    pub fn variant_timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn convert_timeout(&self) -> Duration {
        Duration::from_secs(self.convert_timeout_secs)
    }

    pub fn compare_policy(&self) -> ComparePolicy {
        ComparePolicy { mode: self.comparison, normalization: self.normalization }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn invalid_env(key: &str, val: &str) -> ParityError {
    ParityError::InvalidEnvVar { key: key.to_string(), value: val.to_string() }
}

fn parse_env_u64(key: &str, val: &str) -> Result<u64> {
    val.parse::<u64>().map_err(|_| invalid_env(key, val))
}

fn parse_env_bool(key: &str, val: &str) -> Result<bool> {
    match val.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid_env(key, val)),
    }
}

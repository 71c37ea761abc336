//! Configuration loading and root folder resolution

use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = locate_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return PathBuf::from(root_folder);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Get default configuration file path for the platform
fn locate_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/multiview/config.toml first, then /etc/multiview/config.toml
        if let Some(path) = dirs::config_dir().map(|d| d.join("multiview").join("config.toml")) {
            if path.exists() {
                return Ok(path);
            }
        }
        let system_config = PathBuf::from("/etc/multiview/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
        Err(Error::Config("No config file found".to_string()))
    } else {
        let path = dirs::config_dir()
            .map(|d| d.join("multiview").join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        if path.exists() {
            Ok(path)
        } else {
            Err(Error::Config(format!("Config file not found: {:?}", path)))
        }
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("multiview"))
        .unwrap_or_else(|| PathBuf::from("./multiview_data"))
}

/// Vision oracle connection settings
///
/// The oracle is an external, untrusted service; nothing here changes how its
/// replies are validated, only how it is reached.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// API key for the vision model endpoint
    pub api_key: String,
    /// Base URL of the chat-completions style endpoint
    pub base_url: String,
    /// Model used for full specimen grading
    pub grading_model: String,
    /// Cheaper model used for the yes/no classification check
    pub classifier_model: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl OracleConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";
    pub const DEFAULT_GRADING_MODEL: &'static str = "gpt-4o";
    pub const DEFAULT_CLASSIFIER_MODEL: &'static str = "gpt-4o-mini";

    /// Load oracle settings from the environment.
    ///
    /// `MVG_ORACLE_API_KEY` takes priority, falling back to `OPENAI_API_KEY`.
    /// A missing key is a configuration error: grading cannot run without the
    /// oracle, and there is no offline fallback.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("MVG_ORACLE_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                Error::Config(
                    "No oracle API key set (MVG_ORACLE_API_KEY or OPENAI_API_KEY)".to_string(),
                )
            })?;

        let base_url = std::env::var("MVG_ORACLE_BASE_URL")
            .unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string());

        Ok(Self {
            api_key,
            base_url,
            grading_model: Self::DEFAULT_GRADING_MODEL.to_string(),
            classifier_model: Self::DEFAULT_CLASSIFIER_MODEL.to_string(),
            timeout: Duration::from_secs(30),
        })
    }
}

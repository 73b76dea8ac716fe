//! Optional JSON configuration file for the CLI.

use std::path::Path;

use serde::{Deserialize, Serialize};
use shellbox::bootstrap::BootstrapConfig;
use shellbox::shell::ShellConfig;

pub const DEFAULT_ASSISTANT_URL: &str = "http://127.0.0.1:3000";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bootstrap: BootstrapConfig,
    pub shell: ShellConfig,
    /// Base URL of the assistant endpoint.
    pub assistant_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bootstrap: BootstrapConfig::default(),
            shell: ShellConfig::default(),
            assistant_url: DEFAULT_ASSISTANT_URL.to_string(),
        }
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
    serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_config_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"assistant_url": "http://example.test"}}"#).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.assistant_url, "http://example.test");
        assert_eq!(config.bootstrap.installer, "pnpm");
        assert_eq!(config.shell.program, "bash");
    }

    #[test]
    fn malformed_config_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}

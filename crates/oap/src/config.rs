//! Configuration loading

use std::path::Path;
use anyhow::Result;
use tracing::warn;
use oap_common::config::Config;

/// Load configuration from file
pub async fn load(path: &str) -> Result<Config> {
    let path = Path::new(path);

    if path.exists() {
        Config::load(path).await.map_err(|e| anyhow::anyhow!(e))
    } else {
        // Use default configuration
        warn!(path = %path.display(), "Config file not found, using defaults");
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let config = load("/nonexistent/oap.toml").await.unwrap();
        assert_eq!(config.analysis.flush_interval_ms, 25_000);
        assert_eq!(config.oal.scripts, vec!["oal/core.oal"]);
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "[analysis]\nremote_nodes = 0\n").unwrap();
        assert!(load(file.path().to_str().unwrap()).await.is_err());
    }
}

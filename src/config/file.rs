//! TOML configuration file loading
//!
//! Supports `~/.config/avatar/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct AvatarConfigFile {
    /// Backend reasoning endpoint
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Relay token service used to negotiate the media transport
    #[serde(default)]
    pub relay: RelayFileConfig,

    /// Avatar appearance and canned utterances
    #[serde(default)]
    pub avatar: AvatarFileConfig,

    /// Speech recognition
    #[serde(default)]
    pub recognition: RecognitionFileConfig,

    /// Session lifecycle tuning
    #[serde(default)]
    pub session: SessionFileConfig,

    /// HTTP control surface
    #[serde(default)]
    pub api: ApiFileConfig,
}

/// Backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Full URL of the `/ask` endpoint
    pub url: Option<String>,

    /// Request timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Relay token configuration
#[derive(Debug, Default, Deserialize)]
pub struct RelayFileConfig {
    /// Explicit token URL (overrides the region-derived one)
    pub token_url: Option<String>,

    /// Speech service region (e.g. "westus2")
    pub region: Option<String>,

    /// Speech service subscription key
    pub subscription_key: Option<String>,
}

/// Avatar configuration
#[derive(Debug, Default, Deserialize)]
pub struct AvatarFileConfig {
    pub character: Option<String>,
    pub style: Option<String>,
    pub voice: Option<String>,
    pub locale: Option<String>,
    pub greeting: Option<String>,
    pub apology: Option<String>,
}

/// Recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognitionFileConfig {
    /// Candidate languages for auto-detection
    pub languages: Option<Vec<String>>,

    /// Re-detect language continuously instead of only at the start
    pub continuous_language_id: Option<bool>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub reconnect_delay_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub negotiation_timeout_ms: Option<u64>,
    pub require_video: Option<bool>,
    pub auto_start_microphone: Option<bool>,
}

/// HTTP control surface configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    /// Port to listen on; the API is disabled when unset
    pub port: Option<u16>,
}

/// Load the TOML config file
///
/// With no explicit path the standard location is used, and a missing or
/// unparsable file falls back to defaults. An explicit path must exist and parse.
///
/// # Errors
///
/// Returns error if an explicitly requested file cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<AvatarConfigFile> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let parsed = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(parsed);
    }

    let Some(path) = config_file_path() else {
        return Ok(AvatarConfigFile::default());
    };

    if !path.exists() {
        return Ok(AvatarConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(AvatarConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(AvatarConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/avatar/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("avatar").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn explicit_file_is_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[backend]
url = "http://localhost:5000/ask"

[session]
reconnect_delay_ms = 1500
require_video = false

[recognition]
languages = ["en-US", "fr-FR"]
"#
        )
        .unwrap();

        let parsed = load_config_file(Some(file.path())).unwrap();
        assert_eq!(parsed.backend.url.as_deref(), Some("http://localhost:5000/ask"));
        assert_eq!(parsed.session.reconnect_delay_ms, Some(1500));
        assert_eq!(parsed.session.require_video, Some(false));
        assert_eq!(
            parsed.recognition.languages,
            Some(vec!["en-US".to_string(), "fr-FR".to_string()])
        );
        assert!(parsed.api.port.is_none());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config_file(Some(&missing)).is_err());
    }

    #[test]
    fn explicit_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session\nreconnect_delay_ms = ").unwrap();
        assert!(matches!(
            load_config_file(Some(file.path())),
            Err(Error::Toml(_))
        ));
    }
}

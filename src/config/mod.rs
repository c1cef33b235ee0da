//! Configuration management for the avatar gateway
//!
//! Values are layered: built-in defaults, then the TOML file, then environment
//! variables.

pub mod file;

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};
use file::AvatarConfigFile;

/// Default backend reasoning endpoint
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000/ask";

/// Spoken once when a session first becomes active
pub const DEFAULT_GREETING: &str = "Hello! I'm your AI consultant. I can help answer your questions and provide assistance. How can I help you today?";

/// Spoken in place of a reply when the backend call fails
pub const DEFAULT_APOLOGY: &str =
    "I apologize, but I'm having trouble processing your request. Please try again.";

/// Avatar gateway configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Backend reasoning endpoint
    pub backend: BackendConfig,

    /// Relay token service
    pub relay: RelayConfig,

    /// Avatar appearance and canned utterances
    pub avatar: AvatarConfig,

    /// Speech recognition
    pub recognition: RecognitionConfig,

    /// Session lifecycle tuning
    pub session: SessionConfig,

    /// HTTP control surface
    pub api: ApiServerConfig,
}

/// Backend reasoning endpoint configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Full URL of the `/ask` endpoint
    pub url: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BACKEND_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Relay token service configuration
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Explicit token URL
    pub token_url: Option<String>,

    /// Speech service region, used to derive the token URL
    pub region: Option<String>,

    /// Subscription key sent with token requests
    pub subscription_key: Option<SecretString>,
}

impl RelayConfig {
    /// Resolve the relay token URL
    ///
    /// An explicit URL wins; otherwise it is derived from the region.
    #[must_use]
    pub fn token_url(&self) -> Option<String> {
        self.token_url.clone().or_else(|| {
            self.region.as_ref().map(|region| {
                format!(
                    "https://{region}.tts.speech.microsoft.com/cognitiveservices/avatar/relay/token/v1"
                )
            })
        })
    }

    /// Whether a real relay token service is configured
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.subscription_key.is_some() && self.token_url().is_some()
    }
}

/// Avatar configuration
#[derive(Debug, Clone)]
pub struct AvatarConfig {
    /// Avatar character (e.g. "lisa")
    pub character: String,

    /// Avatar pose/style (e.g. "casual-sitting")
    pub style: String,

    /// Neural voice used for synthesis
    pub voice: String,

    /// SSML `xml:lang`
    pub locale: String,

    /// Greeting spoken on first activation
    pub greeting: String,

    /// Utterance spoken when the backend call fails
    pub apology: String,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            character: "lisa".to_string(),
            style: "casual-sitting".to_string(),
            voice: "en-US-JennyNeural".to_string(),
            locale: "en-US".to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            apology: DEFAULT_APOLOGY.to_string(),
        }
    }
}

/// Recognition configuration
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    /// Candidate languages for auto-detection
    pub languages: Vec<String>,

    /// Re-detect language throughout the stream rather than only at the start
    pub continuous_language_id: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            languages: ["en-US", "es-ES", "fr-FR", "de-DE", "it-IT"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            continuous_language_id: true,
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed back-off before each reconnection attempt
    pub reconnect_delay: Duration,

    /// Consecutive failed reconnection attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Upper bound on negotiation, from request to both tracks playing
    pub negotiation_timeout: Duration,

    /// Require a playing video track (not only audio) before going active
    pub require_video: bool,

    /// Start recognition automatically on first activation
    pub auto_start_microphone: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(3000),
            max_reconnect_attempts: 5,
            negotiation_timeout: Duration::from_secs(20),
            require_video: true,
            auto_start_microphone: true,
        }
    }
}

/// HTTP control surface configuration
#[derive(Debug, Clone, Default)]
pub struct ApiServerConfig {
    /// Port to listen on; disabled when `None`
    pub port: Option<u16>,
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unreadable or a value is invalid
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(config_path)?;
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value fails validation
    pub fn from_sources<F>(fc: AvatarConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = BackendConfig {
            url: env("AVATAR_BACKEND_URL")
                .or(fc.backend.url)
                .unwrap_or(defaults.backend.url),
            timeout: fc
                .backend
                .timeout_ms
                .map_or(defaults.backend.timeout, Duration::from_millis),
        };

        let relay = RelayConfig {
            token_url: env("AVATAR_RELAY_URL").or(fc.relay.token_url),
            region: env("AVATAR_SPEECH_REGION").or(fc.relay.region),
            subscription_key: env("AVATAR_SPEECH_KEY")
                .or(fc.relay.subscription_key)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
        };

        let avatar = AvatarConfig {
            character: env("AVATAR_CHARACTER")
                .or(fc.avatar.character)
                .unwrap_or(defaults.avatar.character),
            style: env("AVATAR_STYLE")
                .or(fc.avatar.style)
                .unwrap_or(defaults.avatar.style),
            voice: env("AVATAR_VOICE")
                .or(fc.avatar.voice)
                .unwrap_or(defaults.avatar.voice),
            locale: fc.avatar.locale.unwrap_or(defaults.avatar.locale),
            greeting: fc.avatar.greeting.unwrap_or(defaults.avatar.greeting),
            apology: fc.avatar.apology.unwrap_or(defaults.avatar.apology),
        };

        let recognition = RecognitionConfig {
            languages: fc
                .recognition
                .languages
                .unwrap_or(defaults.recognition.languages),
            continuous_language_id: fc
                .recognition
                .continuous_language_id
                .unwrap_or(defaults.recognition.continuous_language_id),
        };

        let session = SessionConfig {
            reconnect_delay: env("AVATAR_RECONNECT_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .or(fc.session.reconnect_delay_ms)
                .map_or(defaults.session.reconnect_delay, Duration::from_millis),
            max_reconnect_attempts: env("AVATAR_MAX_RECONNECTS")
                .and_then(|v| v.parse().ok())
                .or(fc.session.max_reconnect_attempts)
                .unwrap_or(defaults.session.max_reconnect_attempts),
            negotiation_timeout: fc
                .session
                .negotiation_timeout_ms
                .map_or(defaults.session.negotiation_timeout, Duration::from_millis),
            require_video: env("AVATAR_REQUIRE_VIDEO")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.session.require_video)
                .unwrap_or(defaults.session.require_video),
            auto_start_microphone: fc
                .session
                .auto_start_microphone
                .unwrap_or(defaults.session.auto_start_microphone),
        };

        let api = ApiServerConfig {
            port: env("AVATAR_API_PORT")
                .and_then(|v| v.parse().ok())
                .or(fc.api.port),
        };

        let config = Self {
            backend,
            relay,
            avatar,
            recognition,
            session,
            api,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise fail deep inside a session
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.backend.url)
            .map_err(|e| Error::Config(format!("invalid backend url {}: {e}", self.backend.url)))?;

        if let Some(token_url) = self.relay.token_url() {
            url::Url::parse(&token_url)
                .map_err(|e| Error::Config(format!("invalid relay token url {token_url}: {e}")))?;
        }

        if self.session.max_reconnect_attempts == 0 {
            return Err(Error::Config(
                "max_reconnect_attempts must be at least 1".to_string(),
            ));
        }

        if self.recognition.languages.is_empty() {
            return Err(Error::Config(
                "at least one recognition language is required".to_string(),
            ));
        }

        Ok(())
    }
}

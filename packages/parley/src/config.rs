use anyhow::{Context, Result};
use parley_presence::HubConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [server]
//                    port = 5001
//
//   env var:         PARLEY_SERVER__PORT=5001   (double underscore = nesting)
//
//   (single underscore stays within field names: PARLEY_AUTH__SESSION_TTL_SECS)

/// Named configuration presets.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// host=127.0.0.1, plain cookies
    Local,
    /// host=0.0.0.0, Secure cookies
    Server,
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub presence: PresenceFileConfig,
}

/// Auth-related tunables (lives under `[auth]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_allow_registration")]
    pub allow_registration: bool,
    #[serde(default)]
    pub secure_cookies: bool,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl(),
            allow_registration: default_allow_registration(),
            secure_cookies: false,
        }
    }
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Single allowed browser origin. Permissive CORS when unset.
    #[serde(default)]
    pub cors_origin: Option<String>,
}

/// Presence hub and connection queue sizes (lives under `[presence]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PresenceFileConfig {
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_hub_queue_capacity")]
    pub hub_queue_capacity: usize,
}

impl Default for PresenceFileConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: default_outbox_capacity(),
            broadcast_capacity: default_broadcast_capacity(),
            hub_queue_capacity: default_hub_queue_capacity(),
        }
    }
}

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5001;

fn default_session_ttl() -> u64 {
    604800
}
fn default_allow_registration() -> bool {
    true
}
fn default_outbox_capacity() -> usize {
    64
}
fn default_broadcast_capacity() -> usize {
    256
}
fn default_hub_queue_capacity() -> usize {
    1024
}

/// Build a figment that layers: defaults → profile defaults → config.toml → PARLEY_* env vars.
///
/// The CLI profile takes priority over the config file profile.
pub fn load_config(data_dir: &Path, cli_profile: Option<&Profile>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    // Pass 1: peek at profile from config.toml/env (CLI overrides file)
    let base = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("PARLEY_").split("__"));

    let profile: Option<Profile> = cli_profile
        .cloned()
        .or_else(|| base.extract_inner("profile").ok());

    // Pass 2: profile defaults sit between struct defaults and config.toml
    let profile_layer = profile_to_file_config(profile.as_ref());

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Serialized::defaults(profile_layer))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("PARLEY_").split("__"))
}

fn profile_to_file_config(profile: Option<&Profile>) -> FileConfig {
    match profile {
        Some(Profile::Local) => FileConfig {
            profile: Some(Profile::Local),
            auth: AuthFileConfig {
                secure_cookies: false,
                ..Default::default()
            },
            server: ServerFileConfig {
                host: Some("127.0.0.1".to_string()),
                ..Default::default()
            },
            presence: Default::default(),
        },
        Some(Profile::Server) => FileConfig {
            profile: Some(Profile::Server),
            auth: AuthFileConfig {
                secure_cookies: true,
                ..Default::default()
            },
            server: ServerFileConfig {
                host: Some("0.0.0.0".to_string()),
                ..Default::default()
            },
            presence: Default::default(),
        },
        None => FileConfig::default(),
    }
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Authentication configuration (runtime view).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub session_ttl: Duration,
    pub allow_registration: bool,
    /// Whether to set the Secure flag on the session cookie
    pub secure_cookies: bool,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Self {
        Self {
            session_ttl: Duration::from_secs(fc.session_ttl_secs),
            allow_registration: fc.allow_registration,
            secure_cookies: fc.secure_cookies,
        }
    }
}

/// Presence configuration (runtime view).
#[derive(Clone, Debug)]
pub struct PresenceConfig {
    /// Per-connection queue of pushed events
    pub outbox_capacity: usize,
    pub hub: HubConfig,
}

impl PresenceConfig {
    pub fn from_file(fc: &PresenceFileConfig) -> Self {
        Self {
            outbox_capacity: fc.outbox_capacity.max(1),
            hub: HubConfig {
                queue_capacity: fc.hub_queue_capacity.max(1),
                broadcast_capacity: fc.broadcast_capacity.max(1),
            },
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self::from_file(&PresenceFileConfig::default())
    }
}

// =============================================================================
// Directory layout config (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ParleyConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl ParleyConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".parley"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("parley.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

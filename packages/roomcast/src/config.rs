use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::ws::DEFAULT_HISTORY_LIMIT;

// =============================================================================
// Unified config (figment-deserialized from defaults / roomcast.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   roomcast.toml:   [chat]
//                    history_limit = 100
//
//   env var:         ROOMCAST_CHAT__HISTORY_LIMIT=100   (double underscore = nesting)

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
}

/// Listener settings (lives under `[server]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Token settings (lives under `[auth]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthFileConfig {
    /// HS256 signing secret shared with the token issuer.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Clock skew tolerated on `exp`, in seconds.
    #[serde(default)]
    pub leeway_secs: u64,
}

/// Chat tunables (lives under `[chat]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatFileConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    /// Close connections that send nothing for this long. 0 disables.
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            outbound_capacity: default_outbound_capacity(),
            idle_timeout_secs: 0,
        }
    }
}

fn default_history_limit() -> u32 {
    DEFAULT_HISTORY_LIMIT
}

fn default_outbound_capacity() -> usize {
    100
}

/// Build a figment that layers: defaults → roomcast.toml → ROOMCAST_* env vars.
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("roomcast.toml")))
        .merge(Env::prefixed("ROOMCAST_").split("__"))
}

/// Values given on the command line; they win over every file/env layer.
#[derive(Clone, Debug, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig, overrides: &RuntimeOverrides) -> Self {
        Self {
            host: overrides
                .host
                .clone()
                .or_else(|| fc.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: overrides.port.or(fc.port).unwrap_or(DEFAULT_PORT),
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

/// Token validation settings (runtime view).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub leeway_secs: u64,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Result<Self> {
        let jwt_secret = fc
            .jwt_secret
            .clone()
            .filter(|s| !s.is_empty())
            .context("auth.jwt_secret is not set (ROOMCAST_AUTH__JWT_SECRET)")?;
        Ok(Self {
            jwt_secret,
            leeway_secs: fc.leeway_secs,
        })
    }
}

/// Chat behavior shared by every room session.
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Messages sent in the `connected` snapshot.
    pub history_limit: u32,
    /// Per-connection outbound queue length. A peer that falls this far behind
    /// is dropped from broadcasts.
    pub outbound_capacity: usize,
    pub idle_timeout: Option<Duration>,
}

impl ChatConfig {
    pub fn from_file(fc: &ChatFileConfig) -> Self {
        Self {
            history_limit: fc.history_limit,
            outbound_capacity: fc.outbound_capacity.max(1),
            idle_timeout: if fc.idle_timeout_secs > 0 {
                Some(Duration::from_secs(fc.idle_timeout_secs))
            } else {
                None
            },
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::from_file(&ChatFileConfig::default())
    }
}

// =============================================================================
// Directory layout config (not tunable via figment; derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct RoomcastConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl RoomcastConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".roomcast"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("roomcast.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn reset_database(&self) -> Result<()> {
        if self.db_path.exists() {
            std::fs::remove_file(&self.db_path)
                .with_context(|| format!("Failed to delete database: {:?}", self.db_path))?;
            info!("Database reset: {:?}", self.db_path);

            for ext in ["db-wal", "db-shm"] {
                let path = self.db_path.with_extension(ext);
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("roomcast.toml")
    }
}

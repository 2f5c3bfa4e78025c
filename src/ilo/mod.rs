//! BMC REST Session Client
//!
//! Client for the iLO-style management-processor REST interface, used to
//! query server component status alongside the GPU inventory. Supports Basic
//! and Session authentication; session tokens persist across runs in a token
//! file and are refreshed once when the server rejects them.
//!
//! This is a boundary collaborator: it exposes configuration, session
//! establishment, and authenticated GET, nothing more. It is not a fact
//! source, because the management processor reports slot-level component
//! status rather than bus-addressed device facts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

const API_VERSION_HEADER: &str = "X-API-Version";
const AUTH_TOKEN_HEADER: &str = "x-auth-token";
const SESSIONS_PATH: &str = "/rest/v1/Sessions";

const DEFAULT_PORT: u16 = 443;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Stored tokens older than this are discarded up front instead of burning a
/// request on a guaranteed rejection.
const SESSION_MAX_AGE_HOURS: i64 = 24;

// =============================================================================
// Configuration
// =============================================================================

/// Client configuration, loaded from a TOML file.
///
/// ```toml
/// [server]
/// name = "ilo-gpu-node-07.mgmt.example.com"
/// port = 443
///
/// [access]
/// protocol = "https"
/// username = "Administrator"
/// password = "secret"
/// auth = "session"
///
/// [client]
/// session_file = "/var/run/gpuscan/bmc-session"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct IloConfig {
    pub server: ServerProperties,
    pub access: AccessProperties,
    #[serde(default)]
    pub client: ClientProperties,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerProperties {
    /// Hostname or address of the management processor.
    pub name: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessProperties {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub auth: AuthMode,
}

/// Authentication mode for the REST interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Credentials on every request.
    #[default]
    Basic,
    /// One created session, addressed by token.
    Session,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientProperties {
    /// Where to persist the session token between runs.
    pub session_file: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            session_file: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_protocol() -> String {
    "https".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl IloConfig {
    /// Load the configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))
    }

    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.access.protocol, self.server.name, self.server.port
        )
    }
}

// =============================================================================
// Session
// =============================================================================

/// An authenticated connection to the management processor.
pub struct IloSession {
    config: IloConfig,
    client: Client,
    token: RwLock<Option<String>>,
}

impl IloSession {
    /// Build a session without authenticating yet.
    pub fn new(config: IloConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.client.timeout_secs))
            // Management processors ship self-signed certificates.
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| Error::Config(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
        })
    }

    /// Build a session and establish authentication.
    ///
    /// In session mode a stored token is reused when fresh; otherwise a new
    /// session is created. Basic mode needs no round trip.
    pub async fn connect(config: IloConfig) -> Result<Self> {
        let session = Self::new(config)?;

        if session.config.access.auth == AuthMode::Session {
            match session.restore_token() {
                Some(token) => {
                    debug!("reusing saved session token");
                    *session.token.write() = Some(token);
                }
                None => session.login().await?,
            }
        }

        Ok(session)
    }

    /// GET a REST resource and parse its JSON payload.
    ///
    /// A rejected session token triggers exactly one re-authentication and
    /// retry; a second rejection propagates.
    pub async fn get(&self, path: &str) -> Result<Value> {
        let response = self.request(path).await?;

        if response.status() == StatusCode::UNAUTHORIZED
            && self.config.access.auth == AuthMode::Session
        {
            debug!("session token rejected; re-authenticating");
            self.login().await?;
            let response = self.request(path).await?;
            return Self::parse_json(response).await;
        }

        Self::parse_json(response).await
    }

    async fn request(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.config.base_url(), path);
        info!(%url, "HTTP GET");

        let mut request = self.client.get(&url).header(API_VERSION_HEADER, "1");
        request = match self.config.access.auth {
            AuthMode::Basic => request.basic_auth(
                &self.config.access.username,
                Some(&self.config.access.password),
            ),
            AuthMode::Session => {
                let token = self.token.read().clone();
                match token {
                    Some(token) => request.header(AUTH_TOKEN_HEADER, token),
                    None => request,
                }
            }
        };

        request.send().await.map_err(Error::RestConnection)
    }

    async fn parse_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::RestRequest(format!("status {status}")));
        }
        response
            .json()
            .await
            .map_err(|err| Error::RestRequest(format!("invalid JSON payload: {err}")))
    }

    async fn login(&self) -> Result<()> {
        let url = format!("{}{}", self.config.base_url(), SESSIONS_PATH);
        info!(%url, "creating BMC session");

        let response = self
            .client
            .post(&url)
            .header(API_VERSION_HEADER, "1")
            .json(&json!({
                "UserName": self.config.access.username,
                "Password": self.config.access.password,
            }))
            .send()
            .await
            .map_err(Error::RestConnection)?;

        if response.status() != StatusCode::CREATED {
            return Err(Error::RestAuth(format!(
                "session creation returned {}",
                response.status()
            )));
        }

        let token = response
            .headers()
            .get(AUTH_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::RestAuth("no auth token in session response".to_string()))?;

        debug!("session created");
        self.store_token(&token);
        *self.token.write() = Some(token);
        Ok(())
    }

    fn restore_token(&self) -> Option<String> {
        let file = self.config.client.session_file.as_ref()?;
        if session_file_expired(file) {
            debug!(file = %file.display(), "stored session token missing or stale");
            return None;
        }

        let text = std::fs::read_to_string(file).ok()?;
        let token = text.lines().next()?.trim().to_string();
        (!token.is_empty()).then_some(token)
    }

    fn store_token(&self, token: &str) {
        if let Some(file) = &self.config.client.session_file {
            if let Err(err) = std::fs::write(file, token) {
                warn!(file = %file.display(), error = %err, "could not persist session token");
            }
        }
    }
}

fn session_file_expired(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return true;
    };
    let Ok(modified) = meta.modified() else {
        return true;
    };

    let modified: DateTime<Utc> = modified.into();
    Utc::now() - modified > ChronoDuration::hours(SESSION_MAX_AGE_HOURS)
}

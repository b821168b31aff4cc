//! Configuration loading for the mirror engine
//!
//! OAuth credentials are loaded from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (Google Cloud Console format)
//! 3. Runtime environment variables (fallback)
//!
//! Engine and server settings come from `settings.json` in the config
//! directory, overridden by `MIRROR_*` environment variables.

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Credentials filename in the config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Settings filename in the config directory
const SETTINGS_FILE: &str = "settings.json";

/// Database filename in the data directory
const DATABASE_FILE: &str = "mirror.db";

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<ClientCredentials>,
    web: Option<ClientCredentials>,
}

#[derive(Deserialize)]
struct ClientCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials
    /// 2. JSON file (~/.config/mailmirror/google-credentials.json)
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Credentials embedded at build time via GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // A server deployment normally uses a "web" client; desktop ones work too
        let client = creds
            .web
            .or(creds.installed)
            .context("Credentials file missing 'web' or 'installed' section")?;

        Ok(Self {
            client_id: client.client_id,
            client_secret: client.client_secret,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

/// Engine and server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the server listens on
    pub bind_addr: String,
    /// OAuth redirect URI registered with Google
    pub redirect_uri: String,
    /// Always show the consent screen so Google re-issues a refresh token
    pub force_consent: bool,
    /// HS256 secret for session tokens; generated per process when empty
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub poll_interval_secs: u64,
    /// Messages fetched per folder on a full sync
    pub inbox_max: usize,
    pub sent_max: usize,
    /// Store a failed send locally as an undelivered sent email
    pub keep_failed_sends: bool,
    /// Database path; defaults to the platform data directory
    pub db_path: Option<PathBuf>,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8001".to_string(),
            redirect_uri: "http://localhost:8001/api/auth/callback".to_string(),
            force_consent: true,
            jwt_secret: String::new(),
            token_ttl_hours: 24,
            poll_interval_secs: 30,
            inbox_max: 50,
            sent_max: 50,
            keep_failed_sends: false,
            db_path: None,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl Settings {
    /// Load `settings.json` (or defaults) and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut settings: Settings = config::load_json_or_default(SETTINGS_FILE)?;
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.ensure_secret();
        Ok(settings)
    }

    /// Apply `MIRROR_*` overrides from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(secret) = lookup("MIRROR_JWT_SECRET") {
            self.jwt_secret = secret;
        }
        if let Some(bind) = lookup("MIRROR_BIND") {
            self.bind_addr = bind;
        }
        if let Some(redirect) = lookup("MIRROR_REDIRECT_URI") {
            self.redirect_uri = redirect;
        }
        if let Some(path) = lookup("MIRROR_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = lookup("MIRROR_POLL_SECS") {
            self.poll_interval_secs = secs
                .parse()
                .with_context(|| format!("Invalid MIRROR_POLL_SECS: {}", secs))?;
        }
        if let Some(origins) = lookup("MIRROR_CORS_ORIGINS") {
            self.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        url::Url::parse(&self.redirect_uri)
            .with_context(|| format!("Invalid redirect URI: {}", self.redirect_uri))?;
        Ok(())
    }

    /// Generate a process-local secret when none is configured
    fn ensure_secret(&mut self) {
        if self.jwt_secret.is_empty() {
            warn!("No session token secret configured; sessions will not survive a restart");
            self.jwt_secret = format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple());
        }
    }

    /// Resolved database path
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => config::data_path(DATABASE_FILE).context("Could not determine data directory"),
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

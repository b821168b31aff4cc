//! Gmail OAuth2 authentication
//!
//! Implements the server side of the OAuth2 authorization code flow: building
//! the consent URL, exchanging the callback code and refreshing access tokens.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use std::sync::Arc;

use log::{debug, warn};
use serde::Deserialize;

use super::remote::{MailboxProvider, RemoteMailbox, TokenGrant};
use super::GmailClient;
use crate::config::GmailCredentials;
use crate::error::RemoteError;

/// OAuth2 client for Gmail
#[derive(Clone)]
pub struct GmailAuth {
    client_id: String,
    client_secret: String,
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Error body from the token endpoint
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

impl From<TokenResponse> for TokenGrant {
    fn from(t: TokenResponse) -> Self {
        TokenGrant {
            access_token: t.access_token,
            refresh_token: t.refresh_token.filter(|r| !r.is_empty()),
            expires_in: t.expires_in,
        }
    }
}

impl GmailAuth {
    /// Gmail API OAuth2 endpoints
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Read, send and label changes, plus the account address
    const SCOPES: &'static [&'static str] = &[
        "https://www.googleapis.com/auth/gmail.readonly",
        "https://www.googleapis.com/auth/gmail.send",
        "https://www.googleapis.com/auth/gmail.modify",
        "https://www.googleapis.com/auth/userinfo.email",
    ];

    /// Create a new GmailAuth instance
    ///
    /// # Arguments
    /// * `client_id` - OAuth2 client ID from Google Cloud Console
    /// * `client_secret` - OAuth2 client secret from Google Cloud Console
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn from_credentials(credentials: &GmailCredentials) -> Self {
        Self::new(&credentials.client_id, &credentials.client_secret)
    }

    /// Consent URL for the authorization code flow
    pub fn authorization_url(&self, redirect_uri: &str, force_consent: bool) -> String {
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline",
            Self::AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&Self::SCOPES.join(" ")),
        );
        if force_consent {
            url.push_str("&prompt=consent");
        }
        url
    }

    /// Exchange an authorization code for tokens
    pub fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, RemoteError> {
        let grant = self.token_request(
            &[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
            ],
            false,
        )?;
        debug!(
            "Exchanged authorization code (refresh token present: {})",
            grant.refresh_token.is_some()
        );
        Ok(grant)
    }

    /// Refresh an access token using a refresh token
    ///
    /// Fails with [`RemoteError::GrantRevoked`] when Google rejects the grant.
    pub fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, RemoteError> {
        let mut grant = self.token_request(
            &[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ],
            true,
        )?;

        // Preserve the refresh token if not returned
        if grant.refresh_token.is_none() {
            grant.refresh_token = Some(refresh_token.to_string());
        }

        Ok(grant)
    }

    fn token_request(&self, form: &[(&str, &str)], refreshing: bool) -> Result<TokenGrant, RemoteError> {
        let mut response = ureq::post(Self::TOKEN_URL)
            .config()
            .http_status_as_error(false)
            .build()
            .send_form(form.iter().copied())?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body: Option<TokenErrorResponse> = response.body_mut().read_json().ok();
            let (error, description) = body
                .map(|b| (b.error, b.error_description.unwrap_or_default()))
                .unwrap_or_else(|| (format!("HTTP {}", status), String::new()));

            if refreshing && error == "invalid_grant" {
                warn!("Refresh token rejected: {}", description);
                return Err(RemoteError::GrantRevoked);
            }
            return Err(RemoteError::Unavailable(format!(
                "token endpoint returned {}: {} {}",
                status, error, description
            )));
        }

        let token: TokenResponse = response.body_mut().read_json()?;
        Ok(token.into())
    }
}

impl MailboxProvider for GmailAuth {
    fn authorization_url(&self, redirect_uri: &str, force_consent: bool) -> String {
        GmailAuth::authorization_url(self, redirect_uri, force_consent)
    }

    fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, RemoteError> {
        GmailAuth::exchange_code(self, code, redirect_uri)
    }

    fn connect(&self, refresh_token: &str, grant: Option<&TokenGrant>) -> Arc<dyn RemoteMailbox> {
        Arc::new(GmailClient::new(self.clone(), refresh_token, grant))
    }
}

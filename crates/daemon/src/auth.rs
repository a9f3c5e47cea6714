//! Sessions authenticated with a bearer token
//!
//! Acquiring and refreshing the token is left to external tooling; the
//! daemon only reads it from the configuration.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;

use common::drive::v2::DriveV2Listing;
use common::http::ReqwestTransport;
use common::session::{Session, SessionError, SessionProvider};

/// Builds a fresh client pair for every session it is asked for.
#[derive(Clone)]
pub struct TokenSessionProvider {
    token: String,
    timeout: Duration,
    listing_base: Option<String>,
}

impl TokenSessionProvider {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            token: token.into(),
            timeout,
            listing_base: None,
        }
    }

    /// Point the listing client at another files endpoint.
    pub fn with_listing_base(mut self, base: impl Into<String>) -> Self {
        self.listing_base = Some(base.into());
        self
    }

    fn client(&self) -> Result<Client, SessionError> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|_| SessionError::Credentials("token is not a valid header value".into()))?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);

        Client::builder()
            .default_headers(headers)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| SessionError::Client(e.to_string()))
    }
}

impl std::fmt::Debug for TokenSessionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSessionProvider")
            .field("timeout", &self.timeout)
            .field("listing_base", &self.listing_base)
            .finish_non_exhaustive()
    }
}

impl SessionProvider for TokenSessionProvider {
    fn build_session(&self) -> Result<Session, SessionError> {
        let client = self.client()?;
        let listing = match &self.listing_base {
            Some(base) => DriveV2Listing::with_base(client.clone(), base.clone(), self.timeout),
            None => DriveV2Listing::new(client.clone(), self.timeout),
        };
        Ok(Session::new(
            Arc::new(listing),
            Arc::new(ReqwestTransport::new(client, self.timeout)),
        ))
    }
}

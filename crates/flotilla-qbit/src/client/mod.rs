//! Client construction, session management, and request plumbing.

mod app;
mod creator;
mod rss;
mod sync;
mod torrents;

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use reqwest::{Client as HttpClient, Request, Response, StatusCode};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::error::{QbitError, QbitResult, classify, classify_transport};

pub use torrents::{AddTorrentOptions, AddTorrentPayload, BulkVerb};

const READ_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Connection settings for one upstream endpoint.
#[derive(Debug, Clone)]
pub struct QbitClientConfig {
    /// Base URL of the WebUI, e.g. `http://seedbox:8080`.
    pub base_url: String,
    /// WebUI username.
    pub username: String,
    /// WebUI password (already decrypted by the pool).
    pub password: String,
    /// Optional HTTP basic-auth credentials for a fronting proxy.
    pub basic_auth: Option<(String, String)>,
    /// Skip TLS certificate verification.
    pub tls_skip_verify: bool,
    /// Upper bound for any single upstream request.
    pub timeout: Duration,
}

impl QbitClientConfig {
    /// Settings with the default 60 s request bound.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            basic_auth: None,
            tls_skip_verify: false,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Cookie-authenticated client for a single qBittorrent endpoint.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. The session
/// cookie lives in the underlying cookie store and is re-established
/// transparently once per request when the upstream rejects it.
#[derive(Debug)]
pub struct QbitClient {
    http: HttpClient,
    base_url: Url,
    config: QbitClientConfig,
    version: RwLock<Option<String>>,
}

impl QbitClient {
    /// Build a client and verify the endpoint by logging in and recording
    /// the upstream version string.
    ///
    /// # Errors
    ///
    /// Returns an error when the base URL is invalid, the transport cannot
    /// be constructed, or the login is rejected.
    pub async fn connect(config: QbitClientConfig) -> QbitResult<Self> {
        let client = Self::build(config)?;
        client.login().await?;
        let version = client.fetch_version().await?;
        *client.version.write().await = Some(version);
        Ok(client)
    }

    fn build(config: QbitClientConfig) -> QbitResult<Self> {
        let base_url = Url::parse(&config.base_url)?;

        let mut default_headers = HeaderMap::new();
        if let Ok(referer) = HeaderValue::from_str(base_url.as_str()) {
            default_headers.insert(REFERER, referer);
        }

        let mut builder = HttpClient::builder()
            .cookie_store(true)
            .timeout(config.timeout)
            .default_headers(default_headers);
        if config.tls_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder.build().map_err(|err| classify_transport(&err))?;

        Ok(Self {
            http,
            base_url,
            config,
            version: RwLock::new(None),
        })
    }

    /// The upstream version string recorded at login, e.g. `v5.0.2`.
    pub async fn version(&self) -> Option<String> {
        self.version.read().await.clone()
    }

    /// Authenticate against `auth/login`, replacing any existing session
    /// cookie.
    ///
    /// # Errors
    ///
    /// Returns [`QbitError::Unauthorized`] when the credentials are
    /// rejected.
    pub async fn login(&self) -> QbitResult<()> {
        let url = self.endpoint("auth/login")?;
        let mut request = self.http.post(url).form(&[
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ]);
        if let Some((user, pass)) = &self.config.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request
            .send()
            .await
            .map_err(|err| classify_transport(&err))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::OK && body.trim() != "Fails." {
            debug!(base_url = %self.base_url, "upstream session established");
            return Ok(());
        }
        if status == StatusCode::OK {
            return Err(QbitError::Unauthorized);
        }
        Err(classify(status.as_u16(), &body))
    }

    fn endpoint(&self, path: &str) -> QbitResult<Url> {
        Ok(self.base_url.join(&format!("api/v2/{path}"))?)
    }

    fn apply_basic_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.basic_auth {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    /// Execute a request, re-establishing the session once when the
    /// upstream rejects the cookie. A second rejection surfaces as
    /// [`QbitError::Unauthorized`].
    async fn execute_authed(&self, request: Request) -> QbitResult<Response> {
        let retry = request.try_clone();
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|err| classify_transport(&err))?;

        if !matches!(
            response.status(),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED
        ) {
            return Self::check_status(response).await;
        }

        let Some(retry) = retry else {
            return Err(QbitError::Unauthorized);
        };
        debug!(base_url = %self.base_url, "session rejected, re-authenticating");
        self.login().await?;
        let response = self
            .http
            .execute(retry)
            .await
            .map_err(|err| classify_transport(&err))?;
        if matches!(
            response.status(),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED
        ) {
            return Err(QbitError::Unauthorized);
        }
        Self::check_status(response).await
    }

    async fn check_status(response: Response) -> QbitResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status.as_u16(), &body))
    }

    /// Idempotent GET with exponential backoff on transient failures.
    async fn get_raw(&self, path: &str, query: &[(&str, String)]) -> QbitResult<Response> {
        let url = self.endpoint(path)?;
        let mut attempt: u32 = 0;
        loop {
            let mut builder = self.http.get(url.clone());
            if !query.is_empty() {
                builder = builder.query(query);
            }
            let request = self
                .apply_basic_auth(builder)
                .build()
                .map_err(|err| classify_transport(&err))?;

            match self.execute_authed(request).await {
                Err(err) if err.is_transient() && attempt + 1 < READ_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    warn!(path, attempt, ?delay, "transient upstream failure, backing off");
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Idempotent GET decoded as JSON.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> QbitResult<T> {
        let body = self.get_raw(path, query).await?.text().await.map_err(|err| classify_transport(&err))?;
        serde_json::from_str(&body).map_err(QbitError::Decode)
    }

    /// Idempotent GET returning the raw body text.
    async fn get_text(&self, path: &str, query: &[(&str, String)]) -> QbitResult<String> {
        self.get_raw(path, query)
            .await?
            .text()
            .await
            .map_err(|err| classify_transport(&err))
    }

    /// Idempotent GET returning the raw body bytes.
    async fn get_bytes(&self, path: &str, query: &[(&str, String)]) -> QbitResult<Vec<u8>> {
        let bytes = self
            .get_raw(path, query)
            .await?
            .bytes()
            .await
            .map_err(|err| classify_transport(&err))?;
        Ok(bytes.to_vec())
    }

    /// Form-encoded mutation. Never retried beyond the single silent
    /// re-login.
    async fn post_form(&self, path: &str, form: &[(&str, String)]) -> QbitResult<()> {
        let url = self.endpoint(path)?;
        let request = self
            .apply_basic_auth(self.http.post(url).form(form))
            .build()
            .map_err(|err| classify_transport(&err))?;
        self.execute_authed(request).await?;
        Ok(())
    }

    /// Form-encoded mutation returning the response body.
    async fn post_form_text(&self, path: &str, form: &[(&str, String)]) -> QbitResult<String> {
        let url = self.endpoint(path)?;
        let request = self
            .apply_basic_auth(self.http.post(url).form(form))
            .build()
            .map_err(|err| classify_transport(&err))?;
        self.execute_authed(request)
            .await?
            .text()
            .await
            .map_err(|err| classify_transport(&err))
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let doubled = BACKOFF_BASE.saturating_mul(1u32 << attempt.min(6));
    doubled.min(BACKOFF_CAP)
}

/// Join hashes into the `|`-separated form the api/v2 surface expects.
fn join_hashes(hashes: &[String]) -> String {
    hashes.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(250));
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn hashes_join_with_pipe() {
        let hashes = vec!["aa".to_string(), "bb".to_string()];
        assert_eq!(join_hashes(&hashes), "aa|bb");
    }
}

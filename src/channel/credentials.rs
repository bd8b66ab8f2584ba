//! App credentials: client-credentials token exchange with a per-scope
//! cache.
//!
//! The host identifies itself with its app id/password and asks for a
//! token scoped to the skill's app id. Without a token endpoint no token
//! is fetched and the stream is opened unauthenticated (local dev).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::ChannelError;

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct AppCredentials {
    app_id: String,
    password: String,
    token_endpoint: Option<String>,
    client: Client,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl AppCredentials {
    pub fn new(app_id: &str, password: &str, token_endpoint: Option<&str>) -> Self {
        Self {
            app_id: app_id.to_string(),
            password: password.to_string(),
            token_endpoint: token_endpoint
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from),
            client: Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Bearer token for calls to `audience` (the skill's app id).
    pub async fn token(&self, audience: &str) -> Result<Option<String>, ChannelError> {
        let Some(endpoint) = &self.token_endpoint else {
            return Ok(None);
        };
        let scope = format!("{audience}/.default");

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(&scope) {
            if cached.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
                debug!("Reusing token for {scope}");
                return Ok(Some(cached.token.clone()));
            }
        }

        let fetched = self.fetch(endpoint, &scope).await?;
        info!(
            "Token for {scope} acquired, expires {}",
            fetched.expires_at.format("%H:%M:%S")
        );
        let token = fetched.token.clone();
        cache.insert(scope, fetched);
        Ok(Some(token))
    }

    async fn fetch(&self, endpoint: &str, scope: &str) -> Result<CachedToken, ChannelError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.app_id.as_str()),
            ("client_secret", self.password.as_str()),
            ("scope", scope),
        ];
        let response = self
            .client
            .post(endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| ChannelError::Transient(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Auth(format!("token request refused ({status}): {body}")));
        }
        if !status.is_success() {
            return Err(ChannelError::Transient(format!(
                "token endpoint returned {status}"
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Protocol(format!("bad token response: {e}")))?;
        Ok(CachedToken {
            token: parsed.access_token,
            expires_at: Utc::now() + Duration::seconds(parsed.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    /// Minimal HTTP server answering every request with `status`/`body`
    /// and recording the form bodies it received.
    async fn token_server(
        status: u16,
        body: &'static str,
    ) -> (String, Arc<AtomicUsize>, Arc<std::sync::Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let forms = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (hits_srv, forms_srv) = (hits.clone(), forms.clone());

        tokio::spawn(async move {
            loop {
                let Ok((tcp, _)) = listener.accept().await else {
                    break;
                };
                hits_srv.fetch_add(1, Ordering::SeqCst);
                let mut reader = BufReader::new(tcp);
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        break;
                    }
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap_or(0);
                        }
                    }
                }
                let mut form = vec![0u8; content_length];
                let _ = reader.read_exact(&mut form).await;
                forms_srv
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&form).into_owned());

                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let mut tcp = reader.into_inner();
                let _ = tcp.write_all(response.as_bytes()).await;
                let _ = tcp.shutdown().await;
            }
        });

        (format!("http://{addr}/token"), hits, forms)
    }

    #[tokio::test]
    async fn test_no_endpoint_means_no_token() {
        let credentials = AppCredentials::new("host-app", "secret", None);
        assert_eq!(credentials.token("skill-app").await.unwrap(), None);
        let credentials = AppCredentials::new("host-app", "secret", Some("  "));
        assert_eq!(credentials.token("skill-app").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_token_is_scoped_and_cached() {
        let (endpoint, hits, forms) =
            token_server(200, r#"{"access_token": "abc", "expires_in": 3600}"#).await;
        let credentials = AppCredentials::new("host-app", "secret", Some(&endpoint));

        assert_eq!(credentials.token("skill-app").await.unwrap().as_deref(), Some("abc"));
        assert_eq!(credentials.token("skill-app").await.unwrap().as_deref(), Some("abc"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let form = forms.lock().unwrap()[0].clone();
        assert!(form.contains("grant_type=client_credentials"), "{form}");
        assert!(form.contains("client_id=host-app"), "{form}");
        assert!(form.contains("scope=skill-app%2F.default"), "{form}");

        // Another skill gets its own token.
        credentials.token("other-skill").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_short_lived_token_is_refetched() {
        let (endpoint, hits, _) =
            token_server(200, r#"{"access_token": "abc", "expires_in": 60}"#).await;
        let credentials = AppCredentials::new("host-app", "secret", Some(&endpoint));
        credentials.token("skill-app").await.unwrap();
        credentials.token("skill-app").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refused_credentials_are_auth_errors() {
        let (endpoint, _, _) = token_server(401, r#"{"error": "invalid_client"}"#).await;
        let credentials = AppCredentials::new("host-app", "wrong", Some(&endpoint));
        let err = credentials.token("skill-app").await.unwrap_err();
        assert!(matches!(err, ChannelError::Auth(_)), "{err:?}");
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let (endpoint, _, _) = token_server(503, "{}").await;
        let credentials = AppCredentials::new("host-app", "secret", Some(&endpoint));
        assert!(credentials.token("skill-app").await.unwrap_err().is_retriable());
    }
}

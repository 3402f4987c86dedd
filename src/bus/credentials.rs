use crate::error::BusError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const TOKEN_ENV: &str = "REDIS_BEARER_TOKEN";

/// Supplies the bus password at connect time.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn password(&self) -> Result<String, BusError>;
}

/// A password taken straight from the config.
pub struct StaticPassword(pub String);

#[async_trait]
impl CredentialSource for StaticPassword {
    async fn password(&self) -> Result<String, BusError> {
        Ok(self.0.clone())
    }
}

/// Trade a bearer token for the bus password over HTTP.
pub struct TokenExchange {
    url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    password: Option<String>,
    error: Option<String>,
}

impl TokenExchange {
    /// `token` of `None` falls back to `REDIS_BEARER_TOKEN` on every attempt.
    pub fn new(url: String, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { url, token, client }
    }

    /// Default exchange endpoint for a bus host.
    pub fn default_url(host: &str) -> String {
        format!("http://{host}/api/status/redis-info")
    }

    fn token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()))
    }
}

#[async_trait]
impl CredentialSource for TokenExchange {
    async fn password(&self) -> Result<String, BusError> {
        let token = self.token().ok_or(BusError::MissingCredentials)?;

        debug!("requesting bus password from {}", self.url);
        let resp = self
            .client
            .get(&self.url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await?;

        let status = resp.status();
        let body: ExchangeResponse = resp.json().await?;
        extract_password(body, status)
    }
}

fn extract_password(
    body: ExchangeResponse,
    status: reqwest::StatusCode,
) -> Result<String, BusError> {
    match body {
        ExchangeResponse {
            password: Some(p), ..
        } if !p.is_empty() => Ok(p),
        ExchangeResponse {
            error: Some(e), ..
        } => Err(BusError::Credentials(e)),
        _ => Err(BusError::Credentials(format!(
            "HTTP {status}: response has no password"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ExchangeResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn password_is_extracted() {
        let p = extract_password(parse(r#"{"password":"hunter2"}"#), reqwest::StatusCode::OK);
        assert_eq!(p.unwrap(), "hunter2");
    }

    #[test]
    fn error_body_is_reported() {
        let e = extract_password(
            parse(r#"{"error":"invalid token"}"#),
            reqwest::StatusCode::UNAUTHORIZED,
        )
        .unwrap_err();
        assert!(e.to_string().contains("invalid token"));
    }

    #[test]
    fn empty_body_is_an_error() {
        let e = extract_password(parse("{}"), reqwest::StatusCode::OK).unwrap_err();
        assert!(matches!(e, BusError::Credentials(_)));
    }

    #[test]
    fn default_url_uses_host() {
        assert_eq!(
            TokenExchange::default_url("bus.example"),
            "http://bus.example/api/status/redis-info"
        );
    }

    #[tokio::test]
    async fn static_password_is_returned() {
        let source = StaticPassword("secret".into());
        assert_eq!(source.password().await.unwrap(), "secret");
    }
}

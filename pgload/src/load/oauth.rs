//! OAuth token resolution.
//!
//! A token is either known at startup or fetched from an OAuth2 token
//! endpoint with the client-credentials grant.

use std::time::Duration;

use serde::Deserialize;

use crate::config::{OAuthConfig, TokenProvider, TokenSource};
use crate::error::{LoadError, LoadResult};

/// Attempts against the token endpoint before giving up
const MAX_ATTEMPTS: u32 = 3;

/// Delay between attempts in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Token endpoint response, success or error body
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Get the bearer token for this run.
pub async fn resolve_token(config: &OAuthConfig) -> LoadResult<String> {
    match &config.source {
        TokenSource::Static(token) => Ok(token.clone()),
        TokenSource::ClientCredentials(provider) => fetch_token(provider).await,
    }
}

async fn fetch_token(provider: &TokenProvider) -> LoadResult<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| LoadError::Token(e.to_string()))?;

    let mut form = vec![
        ("grant_type", "client_credentials"),
        ("client_id", provider.client_id.as_str()),
        ("client_secret", provider.client_secret.as_str()),
    ];
    if let Some(scope) = &provider.scope {
        form.push(("scope", scope.as_str()));
    }

    let mut attempt = 1;
    loop {
        tracing::debug!("Requesting token from {} (attempt {})", provider.token_url, attempt);
        let result = client.post(&provider.token_url).form(&form).send().await;

        let retryable = match result {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| LoadError::Token(format!("cannot read token response: {}", e)))?;
                if !status.is_server_error() || attempt >= MAX_ATTEMPTS {
                    return parse_token_response(status.as_u16(), &body);
                }
                format!("HTTP {}", status)
            }
            Err(e) if attempt >= MAX_ATTEMPTS => {
                return Err(LoadError::Token(format!("request to {} failed: {}", provider.token_url, e)))
            }
            Err(e) => e.to_string(),
        };

        tracing::warn!("Token request failed ({}), retrying", retryable);
        tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
        attempt += 1;
    }
}

/// Extract the access token from a token endpoint response.
pub fn parse_token_response(status: u16, body: &str) -> LoadResult<String> {
    let parsed: Option<TokenResponse> = serde_json::from_str(body).ok();

    if !(200..300).contains(&status) {
        let detail = match parsed {
            Some(TokenResponse { error: Some(error), error_description, .. }) => match error_description {
                Some(description) => format!("{}: {}", error, description),
                None => error,
            },
            _ => body.chars().take(200).collect(),
        };
        return Err(LoadError::Token(format!("token endpoint returned HTTP {}: {}", status, detail)));
    }

    let response = parsed.ok_or_else(|| LoadError::Token("token response is not valid JSON".to_string()))?;
    match response.access_token {
        Some(token) if !token.is_empty() => {
            if let Some(kind) = &response.token_type {
                if !kind.eq_ignore_ascii_case("bearer") {
                    tracing::warn!("Unexpected token type '{}'", kind);
                }
            }
            if let Some(secs) = response.expires_in {
                tracing::debug!("Token expires in {}s", secs);
            }
            Ok(token)
        }
        _ => Err(LoadError::Token("token response has no access_token".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenUsage;

    #[test]
    fn test_parse_success() {
        let token = parse_token_response(
            200,
            r#"{"access_token":"eyJabc","token_type":"Bearer","expires_in":3599}"#,
        )
        .unwrap();
        assert_eq!(token, "eyJabc");
    }

    #[test]
    fn test_parse_error_body() {
        let err = parse_token_response(
            401,
            r#"{"error":"invalid_client","error_description":"bad secret"}"#,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("HTTP 401"));
        assert!(msg.contains("invalid_client: bad secret"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_parse_missing_token() {
        assert!(parse_token_response(200, r#"{"token_type":"Bearer"}"#).is_err());
        assert!(parse_token_response(200, "not json").is_err());
        let err = parse_token_response(502, "<html>Bad Gateway</html>").unwrap_err();
        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[tokio::test]
    async fn test_static_token() {
        let config = OAuthConfig {
            source: TokenSource::Static("abc".to_string()),
            usage: TokenUsage::Password,
            session_setting: "app.oauth_token".to_string(),
        };
        assert_eq!(resolve_token(&config).await.unwrap(), "abc");
    }
}

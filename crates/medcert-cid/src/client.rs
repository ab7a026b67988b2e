//! HTTP client for the WHO ICD API.
//!
//! Two calls: an OAuth2 client-credentials grant and a term search against
//! the configured release and linearization. The client holds no state
//! besides its connection pool; caching lives in [`CidService`](crate::CidService).

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, instrument};

use crate::config::{ENV_API_BASE, ENV_TOKEN_URL, OmsConfig};
use crate::error::{CidError, CidResult};
use crate::retry::RetryPolicy;
use crate::types::{CidEntry, Token};

const API_VERSION_HEADER: &str = "API-Version";
const API_VERSION: &str = "v2";

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("Invalid html tag regex"));

/// Removes markup such as `<em class='found'>` from upstream titles.
pub fn strip_html(text: &str) -> String {
    HTML_TAG.replace_all(text, "").into_owned()
}

/// Operations the lookup service needs from the classification API.
#[async_trait]
pub trait OmsApi: Send + Sync {
    /// Obtains a bearer token with the client-credentials grant.
    async fn fetch_token(&self, client_id: &str, client_secret: &str) -> CidResult<Token>;

    /// Searches the classification for `term`, results in upstream order.
    async fn search(&self, term: &str, token: &str, locale: &str) -> CidResult<Vec<CidEntry>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    destination_entities: Option<Vec<DestinationEntity>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DestinationEntity {
    #[serde(default)]
    the_code: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl From<DestinationEntity> for CidEntry {
    fn from(entity: DestinationEntity) -> Self {
        let title = strip_html(entity.title.as_deref().unwrap_or_default());
        CidEntry {
            code: entity.the_code.unwrap_or_default(),
            description: title.clone(),
            title,
        }
    }
}

/// reqwest-backed [`OmsApi`] implementation.
#[derive(Debug, Clone)]
pub struct OmsClient {
    http: reqwest::Client,
    config: OmsConfig,
    retry: RetryPolicy,
}

impl OmsClient {
    pub fn new(config: OmsConfig) -> CidResult<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| CidError::configuration(format!("Failed to build HTTP client: {e}")))?;
        let retry = config.retry.policy();
        Ok(Self {
            http,
            config,
            retry,
        })
    }

    /// Overrides the retry policy taken from the configuration.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &OmsConfig {
        &self.config
    }

    fn search_url(&self) -> CidResult<String> {
        let base = self
            .config
            .api_base
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CidError::configuration(format!("{ENV_API_BASE} is not configured")))?;
        Ok(format!(
            "{}/release/11/{}/{}/search",
            base.trim_end_matches('/'),
            self.config.release_id,
            self.config.linearization
        ))
    }
}

/// Validates a token endpoint body: a string `access_token` and a numeric
/// `expires_in` are required, everything else is optional.
fn parse_token(body: &Value) -> CidResult<Token> {
    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CidError::auth_response("missing access_token"))?;

    let expires_in = body
        .get("expires_in")
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        })
        .ok_or_else(|| CidError::auth_response("missing or non-numeric expires_in"))?;

    let token_type = body
        .get("token_type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let scope = body.get("scope").and_then(Value::as_str).map(str::to_string);

    Ok(Token::issued_now(access_token, expires_in)
        .with_token_type(token_type)
        .with_scope(scope))
}

#[async_trait]
impl OmsApi for OmsClient {
    #[instrument(skip_all)]
    async fn fetch_token(&self, client_id: &str, client_secret: &str) -> CidResult<Token> {
        if client_id.trim().is_empty() || client_secret.trim().is_empty() {
            return Err(CidError::configuration("client id or client secret is empty"));
        }
        let token_url = self
            .config
            .token_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| CidError::configuration(format!("{ENV_TOKEN_URL} is not configured")))?;

        debug!("Requesting OMS access token");
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", self.config.scope.as_str()),
        ];

        // The grant is a POST and is never retried.
        let response = self
            .http
            .post(token_url)
            .form(&form)
            .timeout(self.config.token_timeout())
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Token request failed");
                CidError::upstream_auth(e.status().map(|s| s.as_u16()), e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Token endpoint returned an error");
            return Err(CidError::upstream_auth(
                Some(status.as_u16()),
                format!("token endpoint returned {status}: {body}"),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CidError::auth_response(format!("token body is not JSON: {e}")))?;
        let token = parse_token(&body)?;
        debug!(expires_in = token.expires_in, "OMS access token issued");
        Ok(token)
    }

    #[instrument(skip(self, token))]
    async fn search(&self, term: &str, token: &str, locale: &str) -> CidResult<Vec<CidEntry>> {
        let url = self.search_url()?;
        debug!(url = %url, "Searching ICD");

        let response = self
            .retry
            .execute("icd_search", || {
                self.http
                    .get(&url)
                    .query(&[("q", term), ("flatResults", "false")])
                    .bearer_auth(token)
                    .header(ACCEPT, "application/json")
                    .header(API_VERSION_HEADER, API_VERSION)
                    .header(ACCEPT_LANGUAGE, locale)
                    .timeout(self.config.search_timeout())
                    .send()
            })
            .await
            .map_err(|e| {
                error!(error = %e, "ICD search request failed");
                CidError::upstream(e.status().map(|s| s.as_u16()), e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "ICD search returned an error");
            return Err(CidError::upstream(
                Some(status.as_u16()),
                format!("search endpoint returned {status}: {body}"),
            ));
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| {
            CidError::upstream(Some(status.as_u16()), format!("invalid search body: {e}"))
        })?;

        let entries: Vec<CidEntry> = parsed
            .destination_entities
            .unwrap_or_default()
            .into_iter()
            .map(CidEntry::from)
            .collect();
        debug!(count = entries.len(), "ICD search returned entities");
        Ok(entries)
    }
}

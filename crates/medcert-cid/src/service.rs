//! Cached, failure-tolerant ICD lookups.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::cache::CacheStore;
use crate::client::OmsApi;
use crate::config::{LookupConfig, OmsConfig};
use crate::error::{CidError, CidResult};
use crate::read_through::{Fallback, read_through};
use crate::types::{CidEntry, Token, normalize_code, normalize_locale};

/// Cache key of the upstream bearer token.
pub const TOKEN_CACHE_KEY: &str = "oms:token";

/// Characters `encodeURIComponent` leaves alone but `urlencoding` escapes.
const URI_COMPONENT_UNRESERVED: [(&str, &str); 5] = [
    ("%21", "!"),
    ("%27", "'"),
    ("%28", "("),
    ("%29", ")"),
    ("%2A", "*"),
];

/// `cid:search:{locale}:{term}` with the term lowercased, trimmed and
/// percent-encoded the way browsers encode a URI component, so keys stay
/// compatible with caches written by other clients.
pub fn search_cache_key(term: &str, locale: &str) -> String {
    // Every `%` in the encoded form starts an escape, so these never match
    // inside an escaped literal `%`.
    let normalized = URI_COMPONENT_UNRESERVED.iter().fold(
        urlencoding::encode(&term.trim().to_lowercase()).into_owned(),
        |key, (escaped, raw)| key.replace(escaped, raw),
    );
    format!("cid:search:{locale}:{normalized}")
}

/// `cid:code:{CODE}`. Locale is not part of the key.
pub fn code_cache_key(code: &str) -> String {
    format!("cid:code:{}", normalize_code(code))
}

/// Lookup service combining the upstream client with a cache.
///
/// Cheap to clone; all handles are shared.
#[derive(Clone)]
pub struct CidService {
    client: Arc<dyn OmsApi>,
    cache: Arc<dyn CacheStore>,
    oms: Arc<OmsConfig>,
    lookup: LookupConfig,
}

impl CidService {
    pub fn new(
        client: Arc<dyn OmsApi>,
        cache: Arc<dyn CacheStore>,
        oms: OmsConfig,
        lookup: LookupConfig,
    ) -> Self {
        Self {
            client,
            cache,
            oms: Arc::new(oms),
            lookup,
        }
    }

    pub fn lookup_config(&self) -> &LookupConfig {
        &self.lookup
    }

    /// Free-text search. Results are cached for the search TTL unless empty.
    #[instrument(skip(self))]
    pub async fn search_by_term(
        &self,
        term: &str,
        locale: Option<&str>,
    ) -> CidResult<Vec<CidEntry>> {
        if term.trim().is_empty() {
            return Err(CidError::invalid_input("term must not be empty"));
        }
        let locale = normalize_locale(locale);
        let key = search_cache_key(term, &locale);
        let ttl = self.lookup.search_ttl();

        let results = read_through(
            self.cache.as_ref(),
            &key,
            Fallback::Stale,
            |results: &Vec<CidEntry>| (!results.is_empty()).then_some(ttl),
            || async {
                let token = self.token().await?;
                self.client.search(term, &token.value, &locale).await
            },
        )
        .await?;

        debug!(count = results.len(), "search by term finished");
        Ok(results)
    }

    /// Exact-code lookup. Searches upstream with the code as the term and
    /// keeps the entry whose code matches case-insensitively.
    #[instrument(skip(self))]
    pub async fn search_by_code(
        &self,
        code: &str,
        locale: Option<&str>,
    ) -> CidResult<Option<CidEntry>> {
        let normalized = normalize_code(code);
        if normalized.is_empty() {
            return Err(CidError::invalid_input("code must not be empty"));
        }
        let locale = normalize_locale(locale);
        let key = code_cache_key(&normalized);
        let ttl = self.lookup.code_ttl();

        read_through(
            self.cache.as_ref(),
            &key,
            Fallback::Stale,
            |entry: &Option<CidEntry>| entry.as_ref().map(|_| ttl),
            || async {
                let token = self.token().await?;
                let results = self.client.search(&normalized, &token.value, &locale).await?;
                let found = results.into_iter().find(|e| e.matches_code(&normalized));
                if found.is_none() {
                    debug!(code = %normalized, "no exact match for code");
                }
                Ok(found)
            },
        )
        .await
    }

    /// Cached bearer token, refreshed through the client on a miss.
    async fn token(&self) -> CidResult<Token> {
        let lookup = &self.lookup;
        read_through(
            self.cache.as_ref(),
            TOKEN_CACHE_KEY,
            Fallback::Never,
            |token: &Token| Some(lookup.token_ttl(token.expires_in)),
            || async {
                let (client_id, client_secret) = self.oms.credentials()?;
                info!("Fetching new OMS access token");
                self.client.fetch_token(client_id, client_secret).await
            },
        )
        .await
    }
}

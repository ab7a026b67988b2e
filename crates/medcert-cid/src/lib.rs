//! WHO ICD (CID) lookups for medical certificates.
//!
//! [`CidService`] answers free-text and exact-code lookups through a
//! [`CacheStore`], fetching from the ICD API via [`OmsApi`] on a miss and
//! serving stale entries when the upstream is unavailable.
//!
//! ```no_run
//! use std::sync::Arc;
//! use medcert_cid::{CidService, LookupConfig, MemoryCache, OmsClient, OmsConfig};
//!
//! # async fn run() -> medcert_cid::CidResult<()> {
//! let oms = OmsConfig::from_env();
//! let client = Arc::new(OmsClient::new(oms.clone())?);
//! let service = CidService::new(client, Arc::new(MemoryCache::default()), oms, LookupConfig::default());
//!
//! let entries = service.search_by_term("ansiedade", Some("pt")).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod read_through;
pub mod retry;
pub mod service;
pub mod types;

pub use cache::{CacheStats, CacheStore, MemoryCache};
pub use client::{OmsApi, OmsClient, strip_html};
pub use config::{CacheConfig, LookupConfig, OmsConfig, RetrySettings};
pub use error::{CacheError, CidError, CidResult};
pub use read_through::{Fallback, read_through};
pub use retry::RetryPolicy;
pub use service::{CidService, TOKEN_CACHE_KEY, code_cache_key, search_cache_key};
pub use types::{CidEntry, DEFAULT_LOCALE, Token, normalize_code, normalize_locale};

use axum::Json;
use axum::extract::{Path, Query, State};
use medcert_cid::CidEntry;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LocaleParams {
    #[serde(default)]
    pub locale: Option<String>,
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /cid/search?term=ansiedade&locale=pt`
pub async fn search_cid(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<CidEntry>>, ApiError> {
    let term = params
        .term
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("Query parameter 'term' is required"))?;

    let results = state
        .cid
        .search_by_term(term, params.locale.as_deref())
        .await?;
    Ok(Json(results))
}

/// `GET /cid/code/{code}?locale=pt`
pub async fn cid_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(params): Query<LocaleParams>,
) -> Result<Json<CidEntry>, ApiError> {
    state
        .cid
        .search_by_code(&code, params.locale.as_deref())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("CID {} not found", code.trim())))
}

//! HTTP front end. Maps methods and headers onto the file operations:
//!
//! - `INFO /` service metadata
//! - `FIND /<prefix>` metadata search
//! - `GET`, `PUT`, `DELETE /<name>` file access
//! - `GET /` redirect to the command-line client

use crate::config::Config;
use crate::error::{FileError, STATUS_NO_MATCHES};
use crate::files::conditional::Preconditions;
use crate::files::ops::{self, ReadOutcome};
use crate::files::schema::{format_timestamp, Candidate, File, MetaField, ETAG_HEADER, MODIFIED_HEADER};
use crate::files::{FindParams, Finder, Store};
use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const DEFAULT_MIME: &str = "application/octet-stream";

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub rogu_url: Arc<str>,
}

impl AppState {
    pub fn new(store: Store, rogu_url: &str) -> Self {
        Self { store: Arc::new(store), rogu_url: Arc::from(rogu_url) }
    }
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", any(root))
        .route("/{*name}", any(file))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the store and serve until ctrl-c.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    let db = config.database_path();
    let store = Store::open(&db)?;
    let app = router(AppState::new(store, &config.rogu_url), config.max_body_bytes);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, database = %db.display(), "ugor listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {e}");
            }
            info!("shutting down");
        })
        .await
        .context("Server error")
}

impl IntoResponse for FileError {
    fn into_response(self) -> Response {
        match &self {
            FileError::Storage(e) => error!("storage failure: {e}"),
            FileError::Internal(msg) => error!("internal failure: {msg}"),
            _ => {}
        }
        let status = StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.public_message()).into_response()
    }
}

/// Run store work on the blocking pool. Sessions opened inside `work` are
/// released when it returns.
async fn blocking<T, F>(store: &Arc<Store>, work: F) -> Result<T, FileError>
where
    T: Send + 'static,
    F: FnOnce(&Store) -> Result<T, FileError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || work(&store))
        .await
        .map_err(|e| FileError::Internal(format!("worker failed: {e}")))?
}

async fn root(State(state): State<AppState>, method: Method, body: Bytes) -> Response {
    match method.as_str() {
        "GET" => (StatusCode::FOUND, [(header::LOCATION, state.rogu_url.to_string())]).into_response(),
        "INFO" => match blocking(&state.store, |store| store.schema_version()).await {
            Ok(schema) => Json(serde_json::json!({
                "version": crate::VERSION,
                "schema": schema,
            }))
            .into_response(),
            Err(e) => e.into_response(),
        },
        "FIND" => find(&state, "", &body).await,
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn file(
    State(state): State<AppState>,
    method: Method,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = match method.as_str() {
        "GET" => read(&state, name, &headers).await,
        "PUT" => write(&state, name, &headers, body).await,
        "DELETE" => delete(&state, name, &headers).await,
        "FIND" => Ok(find(&state, &name, &body).await),
        _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

async fn find(state: &AppState, prefix: &str, body: &[u8]) -> Response {
    let finder = match parse_find(prefix, body) {
        Ok(finder) => finder,
        Err(e) => return e.into_response(),
    };
    match blocking(&state.store, move |store| ops::search(&mut store.session(), &finder)).await {
        Ok(names) => Json(names).into_response(),
        Err(FileError::NoMatches) => {
            let status = StatusCode::from_u16(STATUS_NO_MATCHES).unwrap_or(StatusCode::NOT_FOUND);
            (status, Json(Vec::<String>::new())).into_response()
        }
        Err(e) => e.into_response(),
    }
}

fn parse_find(prefix: &str, body: &[u8]) -> Result<Finder, FileError> {
    let params = if body.iter().all(u8::is_ascii_whitespace) {
        FindParams::default()
    } else {
        let value = serde_json::from_slice(body)
            .map_err(|e| FileError::validation(format!("Invalid find parameters: {e}")))?;
        FindParams::from_json(value)?
    };
    Finder::new(prefix, params)
}

async fn read(state: &AppState, name: String, headers: &HeaderMap) -> Result<Response, FileError> {
    let pre = preconditions(headers)?;
    let outcome = blocking(&state.store, move |store| ops::read(&mut store.session(), &name, &pre)).await?;
    Ok(match outcome {
        ReadOutcome::Full(file) => {
            let headers = file_headers(&file);
            (StatusCode::OK, headers, file.content).into_response()
        }
        ReadOutcome::NotModified(file) => (StatusCode::NOT_MODIFIED, cache_headers(&file)).into_response(),
    })
}

async fn write(state: &AppState, name: String, headers: &HeaderMap, body: Bytes) -> Result<Response, FileError> {
    let pre = preconditions(headers)?;
    let raw = MetaField::ALL
        .into_iter()
        .map(|f| header_str(headers, f.header()).map(|v| (f, v)))
        .collect::<Result<Vec<_>, _>>()?;
    let candidate = Candidate::from_raw(name, body.to_vec(), |field| {
        raw.iter().find(|(f, _)| *f == field).and_then(|(_, v)| v.as_deref())
    })?;

    let outcome = blocking(&state.store, move |store| ops::write(&mut store.session(), candidate, &pre)).await?;

    let mut out = HeaderMap::new();
    insert_header(&mut out, ETAG_HEADER, &outcome.etag);
    insert_header(&mut out, MODIFIED_HEADER, &format_timestamp(&outcome.modified));
    let status = StatusCode::from_u16(outcome.decision.status()).unwrap_or(StatusCode::NO_CONTENT);
    Ok((status, out).into_response())
}

async fn delete(state: &AppState, name: String, headers: &HeaderMap) -> Result<Response, FileError> {
    let pre = preconditions(headers)?;
    blocking(&state.store, move |store| ops::delete(&mut store.session(), &name, &pre)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn preconditions(headers: &HeaderMap) -> Result<Preconditions, FileError> {
    let mut failed = None;
    let pre = Preconditions::from_headers(|name| match joined_header(headers, name) {
        Ok(v) => v,
        Err(e) => {
            failed.get_or_insert(e);
            None
        }
    })?;
    match failed {
        Some(e) => Err(e),
        None => Ok(pre),
    }
}

/// All values of a header, comma-joined. `None` when the header is absent.
fn joined_header(headers: &HeaderMap, name: &str) -> Result<Option<String>, FileError> {
    let values = headers
        .get_all(name)
        .iter()
        .map(|v| v.to_str().map_err(|_| invalid_header(name)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((!values.is_empty()).then(|| values.join(", ")))
}

fn header_str(headers: &HeaderMap, name: &str) -> Result<Option<String>, FileError> {
    headers
        .get(name)
        .map(|v| v.to_str().map(str::to_owned).map_err(|_| invalid_header(name)))
        .transpose()
}

fn invalid_header(name: &str) -> FileError {
    FileError::validation(format!("Invalid header value: {name}"))
}

/// Validators only, for 304 responses.
fn cache_headers(file: &File) -> HeaderMap {
    let mut out = HeaderMap::new();
    insert_header(&mut out, ETAG_HEADER, &file.etag);
    insert_header(&mut out, MODIFIED_HEADER, &file.modified_string());
    out
}

fn file_headers(file: &File) -> HeaderMap {
    let mut out = cache_headers(file);
    insert_header(&mut out, MetaField::Mime.header(), file.get(MetaField::Mime).unwrap_or(DEFAULT_MIME));
    for (field, value) in file.meta.iter().filter(|(f, _)| *f != MetaField::Mime) {
        if let Some(value) = value {
            insert_header(&mut out, field.header(), value);
        }
    }
    out
}

fn insert_header(out: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => {
            out.insert(name, value);
        }
        _ => warn!(header = name, "skipping unrepresentable header"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::schema::{version_tag, Metadata};

    #[test]
    fn find_body_parsing() {
        assert!(parse_find("", b"").is_ok());
        assert!(parse_find("", b"  \n").is_ok());
        assert!(parse_find("", b"null").is_ok());
        assert!(parse_find("x", br#"{"tag": "a"}"#).is_ok());
        assert!(matches!(parse_find("", b"{nope"), Err(FileError::Validation(_))));
        assert!(matches!(
            parse_find("", br#"{"size": 1, "sizeLt": 3}"#),
            Err(FileError::Validation(_))
        ));
    }

    #[test]
    fn repeated_precondition_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("If-None-Match", HeaderValue::from_static(r#""a""#));
        headers.append("If-None-Match", HeaderValue::from_static(r#""b""#));
        let pre = preconditions(&headers).unwrap();
        assert!(pre.if_none_match.unwrap().contains(r#""b""#));
    }

    #[test]
    fn read_headers_omit_empty_fields() {
        let mut meta = Metadata::default();
        meta.set(MetaField::Tag2, Some("Dad".into()));
        let file = File {
            name: "a".into(),
            content: vec![],
            etag: version_tag(b""),
            modified: chrono::Utc::now(),
            meta,
        };
        let headers = file_headers(&file);
        assert_eq!(headers.get("etag").unwrap(), file.etag.as_str());
        assert_eq!(headers.get("content-type").unwrap(), DEFAULT_MIME);
        assert_eq!(headers.get("file-tag2").unwrap(), "Dad");
        assert!(headers.get("file-tag").is_none());
        assert!(headers.get("content-encoding").is_none());

        let cache = cache_headers(&file);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("last-modified").is_some());
        assert!(cache.get("file-tag2").is_none());
        assert!(cache.get("content-type").is_none());
    }
}

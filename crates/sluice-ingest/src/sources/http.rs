//! HTTP record source
//!
//! Issues GET requests against `base_url + path` and turns JSON responses
//! into records. Any non-2xx response fails the resource.

use super::{ExtractContext, RecordStream};
use crate::error::{IngestError, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_common::Record;
use std::sync::Arc;
use tracing::{debug, warn};

/// Keys probed, in order, when a response object wraps its records
const DATA_KEYS: [&str; 4] = ["results", "data", "items", "records"];

/// Field holding the next page URL when the paginator is auto-detected
const NEXT_LINK_KEY: &str = "next";

/// How further pages are discovered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Paginator {
    /// Follow a top-level `next` link when the response has one
    #[default]
    Auto,
    /// Fetch one page only
    Single,
    /// Follow the URL found at a dotted path in the response
    JsonLink { next_url_path: String },
}

/// A REST endpoint
#[derive(Debug, Clone)]
pub struct HttpSource {
    pub base_url: String,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub bearer_token: Option<String>,
    /// Dotted path to the records inside the response body
    pub data_selector: Option<String>,
    pub paginator: Paginator,
}

impl HttpSource {
    /// Source for a full URL
    pub fn new(url: impl Into<String>) -> Self {
        Self::endpoint(url, "")
    }

    /// Source for a path below a base URL
    pub fn endpoint(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: path.into(),
            params: Vec::new(),
            bearer_token: None,
            data_selector: None,
            paginator: Paginator::default(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn data_selector(mut self, path: impl Into<String>) -> Self {
        self.data_selector = Some(path.into());
        self
    }

    pub fn paginator(mut self, paginator: Paginator) -> Self {
        self.paginator = paginator;
        self
    }

    /// URL of the first page, without query parameters
    pub fn url(&self) -> String {
        let path = self.path.trim_start_matches('/');
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), path)
        }
    }

    pub(crate) fn open(&self, ctx: &ExtractContext) -> Result<RecordStream> {
        let state = PageState {
            source: Arc::new(self.clone()),
            client: ctx.client.clone(),
            next: Some(self.url()),
            pages: 0,
            max_pages: ctx.max_pages,
        };

        Ok(stream::try_unfold(state, fetch_page).boxed())
    }
}

struct PageState {
    source: Arc<HttpSource>,
    client: reqwest::Client,
    next: Option<String>,
    pages: usize,
    max_pages: usize,
}

async fn fetch_page(mut state: PageState) -> Result<Option<(Vec<Record>, PageState)>> {
    let Some(url) = state.next.take() else {
        return Ok(None);
    };

    if state.pages >= state.max_pages {
        warn!(url = %url, max_pages = state.max_pages, "Page limit reached, stopping pagination");
        return Ok(None);
    }

    let source = Arc::clone(&state.source);
    let mut request = state.client.get(&url);
    // Next links already carry their query string
    if state.pages == 0 && !source.params.is_empty() {
        request = request.query(&source.params);
    }
    if let Some(token) = &source.bearer_token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(IngestError::http_status(url, status));
    }

    let body: Value = response.json().await?;
    state.pages += 1;

    state.next = next_page_url(&body, &source.paginator, &url)?;
    let records = select_records(body, source.data_selector.as_deref())?;

    debug!(
        url = %url,
        page = state.pages,
        records = records.len(),
        "Fetched page"
    );

    Ok(Some((records, state)))
}

fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, part| current.as_object()?.get(part))
}

fn next_page_url(body: &Value, paginator: &Paginator, current: &str) -> Result<Option<String>> {
    let link = match paginator {
        Paginator::Single => None,
        Paginator::Auto => body.get(NEXT_LINK_KEY),
        Paginator::JsonLink { next_url_path } => value_at(body, next_url_path),
    };

    let Some(link) = link.and_then(Value::as_str).filter(|l| !l.is_empty()) else {
        return Ok(None);
    };

    let next = reqwest::Url::parse(current)
        .and_then(|base| base.join(link))
        .map_err(|e| IngestError::config(format!("Invalid next page link '{}': {}", link, e)))?
        .to_string();

    if next == current {
        return Ok(None);
    }
    Ok(Some(next))
}

/// Extract the records of one response body.
///
/// An explicit selector must resolve. Without one, a top-level array is
/// used as is and an object is unwrapped through the first of
/// `results`, `data`, `items` or `records` that holds an array; any other
/// object is a single record.
pub fn select_records(body: Value, selector: Option<&str>) -> Result<Vec<Record>> {
    let data = match selector {
        Some(path) => value_at(&body, path).cloned().ok_or_else(|| {
            IngestError::config(format!("Data selector '{}' not found in response", path))
        })?,
        None => {
            let wrapped = body.as_object().and_then(|map| {
                DATA_KEYS
                    .iter()
                    .find_map(|key| map.get(*key).filter(|v| v.is_array()).cloned())
            });
            wrapped.unwrap_or(body)
        },
    };

    Ok(match data {
        Value::Array(items) => items.into_iter().map(into_record).collect(),
        Value::Null => Vec::new(),
        other => vec![into_record(other)],
    })
}

fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        scalar => {
            let mut record = Record::new();
            record.insert("value".to_string(), scalar);
            record
        },
    }
}

//! Cursor pagination over `next_offset`.
//!
//! List endpoints return one page as an object holding the records under an
//! endpoint-specific key plus a `next_offset` cursor:
//!
//! ```json
//! {"next_offset": "MTAw", "users": [{"id": 1}, {"id": 2}]}
//! ```
//!
//! The cursor is sent back as the `offset` query parameter until it comes
//! back empty or missing.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use zscaler_sdk_client::{Context, Error, ErrorKind, PostDecode, QueryParams, RequestMethod, Result};

use crate::client::ZdxClient;

/// Query parameter carrying the page cursor.
pub const OFFSET_PARAM: &str = "offset";

/// Response field holding the next page cursor.
pub const NEXT_OFFSET_FIELD: &str = "next_offset";

/// Read the cursor from a page. Numbers are accepted as well as strings.
fn next_offset(page: &Value) -> Option<String> {
    match page.get(NEXT_OFFSET_FIELD)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl ZdxClient {
    /// GET every page of `path` and collect the records found under
    /// `items_key`.
    ///
    /// A page without `items_key` contributes no records. A cursor seen
    /// earlier in the walk (including cycles such as A, B, A) stops it.
    pub async fn get_all_pages<T, Q>(
        &self,
        ctx: &Context,
        path: &str,
        query: &Q,
        items_key: &str,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + PostDecode,
        Q: QueryParams + ?Sized,
    {
        let base_query: Vec<(String, String)> = query
            .to_query_params()?
            .into_iter()
            .filter(|(name, _)| name != OFFSET_PARAM)
            .collect();

        let mut items = Vec::new();
        let mut offset: Option<String> = None;
        let mut seen: HashSet<String> = HashSet::new();
        let mut pages = 0usize;

        loop {
            ctx.check()?;

            let mut page_query = base_query.clone();
            if let Some(offset) = &offset {
                page_query.push((OFFSET_PARAM.to_string(), offset.clone()));
            }

            let response = self
                .new_request_raw::<_, ()>(ctx, RequestMethod::Get, path, &page_query, None)
                .await?;
            let page: Value = response.json()?;
            pages += 1;

            match page.get(items_key) {
                Some(Value::Array(records)) => {
                    for record in records {
                        let mut item: T = serde_json::from_value(record.clone()).map_err(|e| {
                            Error::with_source(ErrorKind::Decode(e.to_string()), e)
                                .with_response(response.meta())
                        })?;
                        item.post_decode();
                        items.push(item);
                    }
                }
                Some(Value::Null) | None => {}
                Some(other) => {
                    return Err(Error::new(ErrorKind::Decode(format!(
                        "expected an array under \"{items_key}\", found {}",
                        json_type(other)
                    )))
                    .with_response(response.meta()));
                }
            }

            match next_offset(&page) {
                Some(next) if !seen.insert(next.clone()) => {
                    warn!(path, offset = %next, "Pagination cursor repeated, stopping");
                    break;
                }
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        debug!(path, pages, items = items.len(), "Fetched all pages");
        Ok(items)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

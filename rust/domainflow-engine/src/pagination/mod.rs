//! Cursor-keyed pagination
//!
//! Opaque cursors replace offset/limit for large result sets. A cursor is
//! `base64(table "|" id "|" epoch_seconds)`; the keyset predicate compares
//! `(sort_field, id)` tuples so pages stay stable under concurrent inserts.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign::{CampaignId, GeneratedDomain};
use crate::error::{DomainFlowError, EngineResult};
use crate::storage::StateStore;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Asc
    }
}

/// Decoded cursor position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Row identifier
    pub id: String,
    /// Row timestamp, second precision
    pub timestamp: DateTime<Utc>,
}

/// Encode a cursor for `table`
pub fn encode_cursor(table: &str, id: &str, timestamp: DateTime<Utc>) -> String {
    BASE64.encode(format!("{}|{}|{}", table, id, timestamp.timestamp()))
}

/// Decode a cursor, validating the table prefix
pub fn decode_cursor(table: &str, cursor: &str) -> EngineResult<Cursor> {
    let bytes = BASE64
        .decode(cursor)
        .map_err(|_| DomainFlowError::InvalidCursor("not valid base64".into()))?;
    let text = String::from_utf8(bytes).map_err(|_| DomainFlowError::InvalidCursor("not valid utf-8".into()))?;
    let mut parts = text.splitn(3, '|');
    let found_table = parts.next().unwrap_or_default();
    let id = parts.next().ok_or_else(|| DomainFlowError::InvalidCursor("missing id".into()))?;
    let epoch = parts.next().ok_or_else(|| DomainFlowError::InvalidCursor("missing timestamp".into()))?;
    if found_table != table {
        return Err(DomainFlowError::InvalidCursor(format!(
            "cursor is for table {}, expected {}",
            found_table, table
        )));
    }
    let secs: i64 = epoch.parse().map_err(|_| DomainFlowError::InvalidCursor("bad timestamp".into()))?;
    let timestamp = Utc
        .timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| DomainFlowError::InvalidCursor("timestamp out of range".into()))?;
    Ok(Cursor { id: id.to_string(), timestamp })
}

/// Page request parameters
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageRequest {
    /// Forward page size
    pub first: Option<usize>,
    /// Backward page size
    pub last: Option<usize>,
    /// Resume after this cursor
    pub after: Option<String>,
    /// Resume before this cursor
    pub before: Option<String>,
    /// Sort field name
    pub sort_by: Option<String>,
    /// Sort direction
    pub sort_order: SortOrder,
}

/// Page metadata in the response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Whether a following page exists
    pub has_next_page: bool,
    /// Whether a preceding page exists
    pub has_previous_page: bool,
    /// Cursor of the first row in the page
    pub start_cursor: Option<String>,
    /// Cursor of the last row in the page
    pub end_cursor: Option<String>,
    /// Total rows, only when cheaply known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    /// Page rows
    pub data: Vec<T>,
    /// Page metadata
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
}

/// Key of one row in the keyset order: `(sort value, id)`
pub type KeysetKey = (DateTime<Utc>, String);

/// Paginate a fully ordered row set
///
/// `key_fn` extracts the keyset key. Rows are sorted by `(key, id)` in the
/// requested direction, the cursor predicate is applied strictly, and the
/// page is cut to `first`/`last`.
pub fn paginate<T, F>(
    mut rows: Vec<T>,
    request: &PageRequest,
    table: &str,
    total_count: Option<u64>,
    key_fn: F,
) -> EngineResult<Page<T>>
where
    F: Fn(&T) -> KeysetKey,
{
    let ascending = request.sort_order == SortOrder::Asc;
    rows.sort_by(|a, b| {
        let (ka, kb) = (key_fn(a), key_fn(b));
        if ascending {
            ka.cmp(&kb)
        } else {
            kb.cmp(&ka)
        }
    });

    let after = request.after.as_deref().map(|c| decode_cursor(table, c)).transpose()?;
    let before = request.before.as_deref().map(|c| decode_cursor(table, c)).transpose()?;

    // Keyset predicate: strictly beyond the cursor in sort direction
    let beyond = |key: &KeysetKey, cursor: &Cursor| {
        let cursor_key = (cursor.timestamp, cursor.id.clone());
        if ascending {
            *key > cursor_key
        } else {
            *key < cursor_key
        }
    };

    let mut has_previous_page = false;
    let mut has_next_page = false;
    if let Some(cursor) = &after {
        let before_len = rows.len();
        rows.retain(|row| beyond(&key_fn(row), cursor));
        has_previous_page = rows.len() < before_len;
    }
    if let Some(cursor) = &before {
        let before_len = rows.len();
        rows.retain(|row| !beyond(&key_fn(row), cursor) && key_fn(row) != (cursor.timestamp, cursor.id.clone()));
        has_next_page = rows.len() < before_len;
    }

    if let Some(first) = request.first {
        if rows.len() > first {
            has_next_page = true;
            rows.truncate(first);
        }
    } else if let Some(last) = request.last {
        if rows.len() > last {
            has_previous_page = true;
            rows.drain(0..rows.len() - last);
        }
    }

    let start_cursor = rows.first().map(|row| {
        let (ts, id) = key_fn(row);
        encode_cursor(table, &id, ts)
    });
    let end_cursor = rows.last().map(|row| {
        let (ts, id) = key_fn(row);
        encode_cursor(table, &id, ts)
    });

    Ok(Page {
        data: rows,
        page_info: PageInfo { has_next_page, has_previous_page, start_cursor, end_cursor, total_count },
    })
}

/// Table tag used in generated-domain cursors
pub const GENERATED_DOMAINS_TABLE: &str = "generated_domains";

/// Fields a generated-domain listing can sort by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainSortField {
    /// Row creation time, offset-tie-broken; the default
    CreatedAt,
    /// Pure enumeration order
    OffsetIndex,
}

impl DomainSortField {
    /// Resolve a request's `sort_by`, rejecting unknown fields
    pub fn parse(request: &PageRequest) -> EngineResult<Self> {
        match request.sort_by.as_deref() {
            None | Some("created_at") | Some("createdAt") => Ok(Self::CreatedAt),
            Some("offset_index") | Some("offsetIndex") => Ok(Self::OffsetIndex),
            Some(other) => {
                Err(DomainFlowError::Validation(format!("unsupported sort field: {}", other)))
            }
        }
    }

    /// Keyset key of one row under this sort field
    ///
    /// Cursor timestamps carry second precision, so the key truncates to
    /// match; ties fall to the id segment.
    fn key(&self, row: &GeneratedDomain) -> KeysetKey {
        let id = format!("{:020}", row.offset_index);
        match self {
            Self::CreatedAt => (truncate_to_seconds(row.created_at), id),
            Self::OffsetIndex => (epoch_start(), id),
        }
    }
}

fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(ts.timestamp(), 0).single().unwrap_or(ts)
}

/// Fixed timestamp for offset-only sorting; ordering falls to the id segment
fn epoch_start() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)
}

/// Decode a cursor's numeric row offset
fn seek_offset(table: &str, cursor: Option<&str>) -> EngineResult<Option<u64>> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };
    let decoded = decode_cursor(table, cursor)?;
    decoded
        .id
        .parse::<u64>()
        .map(Some)
        .map_err(|_| DomainFlowError::InvalidCursor(format!("non-numeric row id {}", decoded.id)))
}

/// Page through a campaign's generated domains
///
/// Rows are written in offset order, so both sort fields agree with the key
/// layout and the windowed read can seek toward the anchoring cursor in
/// either direction instead of scanning from offset zero.
pub fn paginate_domains(
    store: &StateStore,
    campaign_id: CampaignId,
    request: &PageRequest,
) -> EngineResult<Page<GeneratedDomain>> {
    let sort_field = DomainSortField::parse(request)?;
    let total = store.load_campaign(campaign_id)?.map(|c| c.total_items);
    // Bounded read: one page worth plus the cursor neighbourhood
    let window = request.first.or(request.last).unwrap_or(50).saturating_mul(4).max(256);
    let ascending = request.sort_order == SortOrder::Asc;

    let after = seek_offset(GENERATED_DOMAINS_TABLE, request.after.as_deref())?;
    let before = seek_offset(GENERATED_DOMAINS_TABLE, request.before.as_deref())?;

    // Each cursor read spans one extra row so the anchor stays in view and
    // the page flags come out right
    let rows = match (after, before, ascending) {
        (Some(anchor), _, true) => store.domains_from(campaign_id, anchor, window + 1)?,
        (Some(anchor), _, false) => store.domains_up_to(campaign_id, anchor, window + 1)?,
        (None, Some(anchor), true) => store.domains_up_to(campaign_id, anchor, window + 1)?,
        (None, Some(anchor), false) => store.domains_from(campaign_id, anchor, window + 1)?,
        (None, None, true) => store.domains_from(campaign_id, 0, window)?,
        (None, None, false) => store.domains_tail(campaign_id, window)?,
    };
    paginate(rows, request, GENERATED_DOMAINS_TABLE, total, |row| sort_field.key(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: String,
        at: DateTime<Utc>,
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row {
                id: format!("{:04}", i),
                at: Utc.timestamp_opt(1_700_000_000 + i as i64, 0).single().unwrap(),
            })
            .collect()
    }

    fn key(row: &Row) -> KeysetKey {
        (row.at, row.id.clone())
    }

    #[test]
    fn cursor_round_trips() {
        let ts = Utc.timestamp_opt(1_700_000_123, 0).single().unwrap();
        let encoded = encode_cursor("campaigns", "abc", ts);
        let decoded = decode_cursor("campaigns", &encoded).unwrap();
        assert_eq!(decoded.id, "abc");
        assert_eq!(decoded.timestamp, ts);
    }

    #[test]
    fn malformed_cursors_are_rejected() {
        assert!(decode_cursor("campaigns", "!!!not-base64!!!").is_err());
        let wrong_table = encode_cursor("other", "abc", Utc::now());
        assert!(decode_cursor("campaigns", &wrong_table).is_err());
        let bad_ts = BASE64.encode("campaigns|abc|soon");
        assert!(decode_cursor("campaigns", &bad_ts).is_err());
        let truncated = BASE64.encode("campaigns");
        assert!(decode_cursor("campaigns", &truncated).is_err());
    }

    #[test]
    fn forward_pages_chain_without_overlap() {
        let all = rows(10);
        let request = PageRequest { first: Some(4), ..Default::default() };
        let page1 = paginate(all.clone(), &request, "t", Some(10), key).unwrap();
        assert_eq!(page1.data.len(), 4);
        assert!(page1.page_info.has_next_page);
        assert!(!page1.page_info.has_previous_page);
        assert_eq!(page1.page_info.total_count, Some(10));

        let request2 = PageRequest {
            first: Some(4),
            after: page1.page_info.end_cursor.clone(),
            ..Default::default()
        };
        let page2 = paginate(all.clone(), &request2, "t", Some(10), key).unwrap();
        assert_eq!(page2.data.first().unwrap().id, "0004");
        assert!(page2.page_info.has_previous_page);

        let request3 = PageRequest {
            first: Some(4),
            after: page2.page_info.end_cursor.clone(),
            ..Default::default()
        };
        let page3 = paginate(all, &request3, "t", Some(10), key).unwrap();
        assert_eq!(page3.data.len(), 2);
        assert!(!page3.page_info.has_next_page);
    }

    #[test]
    fn backward_pagination_mirrors_forward() {
        let all = rows(10);
        let anchor = encode_cursor("t", "0008", all[8].at);
        let request = PageRequest {
            last: Some(3),
            before: Some(anchor),
            ..Default::default()
        };
        let page = paginate(all, &request, "t", None, key).unwrap();
        let ids: Vec<&str> = page.data.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["0005", "0006", "0007"]);
        assert!(page.page_info.has_previous_page);
        assert!(page.page_info.has_next_page);
    }

    #[test]
    fn sort_field_parsing() {
        let mut request = PageRequest::default();
        assert_eq!(DomainSortField::parse(&request).unwrap(), DomainSortField::CreatedAt);
        request.sort_by = Some("created_at".into());
        assert_eq!(DomainSortField::parse(&request).unwrap(), DomainSortField::CreatedAt);
        request.sort_by = Some("offsetIndex".into());
        assert_eq!(DomainSortField::parse(&request).unwrap(), DomainSortField::OffsetIndex);
        request.sort_by = Some("domain".into());
        assert!(DomainSortField::parse(&request).is_err());
    }

    #[test]
    fn descending_order_reverses_pages() {
        let all = rows(5);
        let request = PageRequest { first: Some(2), sort_order: SortOrder::Desc, ..Default::default() };
        let page = paginate(all, &request, "t", None, key).unwrap();
        let ids: Vec<&str> = page.data.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["0004", "0003"]);
    }

    proptest! {
        #[test]
        fn round_trip_holds_for_all_inputs(id in "[a-z0-9-]{1,32}", secs in 0i64..4_000_000_000i64) {
            let ts = Utc.timestamp_opt(secs, 0).single().unwrap();
            let decoded = decode_cursor("tbl", &encode_cursor("tbl", &id, ts)).unwrap();
            prop_assert_eq!(decoded.id, id);
            prop_assert_eq!(decoded.timestamp, ts);
        }
    }
}

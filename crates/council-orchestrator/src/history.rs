//! In-process request history with pagination and filters.
//!
//! Stands in for the durable store consumed by the kernel; the interface
//! mirrors what a database-backed implementation would offer. Deleting a
//! request drops its subtask and response data with it, since both live
//! inside the record.

use crate::types::{ExecutionMode, FinalResponse, Request};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Hard cap on history page size.
pub const MAX_PAGE_SIZE: usize = 20;

/// A stored request with its terminal outcome, when reached.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// The request itself.
    pub request: Request,
    /// The final response, for succeeded requests.
    pub result: Option<FinalResponse>,
    /// Stable error code and user message, for failed requests.
    pub error: Option<(String, String)>,
}

/// Filters applied to a history listing.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Only requests in this mode.
    pub mode: Option<ExecutionMode>,
    /// Only requests whose prompt contains this substring
    /// (case-insensitive).
    pub content_substring: Option<String>,
    /// Only requests created within this inclusive range.
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// One page of history results.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Matching records, created-at descending.
    pub items: Vec<RequestRecord>,
    /// Zero-based page index.
    pub page: usize,
    /// Effective page size.
    pub page_size: usize,
    /// Total matching records across all pages.
    pub total: usize,
}

/// Thread-safe in-memory request store.
pub struct HistoryStore {
    records: RwLock<HashMap<Uuid, RequestRecord>>,
}

impl HistoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { records: RwLock::new(HashMap::new()) }
    }

    /// Inserts or replaces a request record without an outcome.
    pub async fn upsert(&self, request: Request) {
        let mut records = self.records.write().await;
        let entry = records
            .entry(request.id)
            .or_insert_with(|| RequestRecord { request: request.clone(), result: None, error: None });
        entry.request = request;
    }

    /// Stores the successful outcome of a request.
    pub async fn complete(&self, request: Request, result: FinalResponse) {
        let mut records = self.records.write().await;
        records.insert(
            request.id,
            RequestRecord { request, result: Some(result), error: None },
        );
    }

    /// Stores the failed (or cancelled) outcome of a request.
    pub async fn fail(&self, request: Request, code: String, message: String) {
        let mut records = self.records.write().await;
        records.insert(
            request.id,
            RequestRecord { request, result: None, error: Some((code, message)) },
        );
    }

    /// Fetches one record.
    pub async fn get(&self, request_id: Uuid) -> Option<RequestRecord> {
        let records = self.records.read().await;
        records.get(&request_id).cloned()
    }

    /// Deletes a record, cascading to its embedded subtask and response
    /// data.
    pub async fn delete(&self, request_id: Uuid) -> bool {
        let mut records = self.records.write().await;
        records.remove(&request_id).is_some()
    }

    /// Lists a principal's requests, newest first, filtered and paginated.
    ///
    /// `page` is zero-based; `page_size` is clamped to [`MAX_PAGE_SIZE`].
    pub async fn history(
        &self,
        principal: &str,
        page: usize,
        page_size: usize,
        filter: &HistoryFilter,
    ) -> HistoryPage {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let records = self.records.read().await;

        let mut matching: Vec<&RequestRecord> = records
            .values()
            .filter(|record| record.request.principal == principal)
            .filter(|record| filter.mode.map_or(true, |m| record.request.mode == m))
            .filter(|record| {
                filter.content_substring.as_ref().map_or(true, |needle| {
                    record
                        .request
                        .prompt
                        .to_lowercase()
                        .contains(&needle.to_lowercase())
                })
            })
            .filter(|record| {
                filter.date_range.map_or(true, |(from, to)| {
                    record.request.created_at >= from && record.request.created_at <= to
                })
            })
            .collect();
        matching.sort_by(|a, b| b.request.created_at.cmp(&a.request.created_at));

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(page * page_size)
            .take(page_size)
            .cloned()
            .collect();

        HistoryPage { items, page, page_size, total }
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

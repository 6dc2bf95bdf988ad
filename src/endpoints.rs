use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};
use urlencoding::encode;

use crate::client::Client;
use crate::error::Result;

/// Result of a user search.
#[derive(Debug, Clone, Deserialize)]
pub struct UserSearch {
    #[serde(default)]
    pub matches: Vec<UserMatch>,
    /// Which identifier matched, e.g. `match_user_or_device_id`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserMatch {
    pub amplitude_id: u64,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub last_seen: Option<String>,
}

/// Users whose data should be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionRequest {
    pub amplitude_ids: Vec<u64>,
    pub user_ids: Vec<String>,
    /// Email of the person requesting the deletion.
    pub requester: String,
    /// Skip ids that do not exist in the project instead of failing.
    pub ignore_invalid_id: bool,
    /// Delete across the whole portfolio org; only valid with user ids.
    pub delete_from_org: bool,
}

impl DeletionRequest {
    pub fn new(requester: impl Into<String>) -> Self {
        Self {
            amplitude_ids: Vec::new(),
            user_ids: Vec::new(),
            requester: requester.into(),
            ignore_invalid_id: true,
            delete_from_org: false,
        }
    }

    pub fn amplitude_ids(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.amplitude_ids.extend(ids);
        self
    }

    pub fn user_ids<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.user_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn ignore_invalid_id(mut self, ignore: bool) -> Self {
        self.ignore_invalid_id = ignore;
        self
    }

    pub fn delete_from_org(mut self, delete: bool) -> Self {
        self.delete_from_org = delete;
        self
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut q: Vec<(&'static str, String)> = self
            .amplitude_ids
            .iter()
            .map(|id| ("amplitude_ids", id.to_string()))
            .collect();
        q.extend(self.user_ids.iter().map(|id| ("user_ids", id.clone())));
        q.push(("requester", self.requester.clone()));
        q.push(("ignore_invalid_id", bool_param(self.ignore_invalid_id)));
        q.push(("delete_from_org", bool_param(self.delete_from_org)));
        q
    }
}

/// Event segmentation query (`/api/2/events/segmentation`).
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationQuery {
    /// Event definition with optional filters, sent JSON-encoded as `e`.
    pub event: Value,
    pub start: String,
    pub end: String,
    /// Metric such as `uniques`, `totals` or `average`.
    pub metrics: String,
    /// `-300000` realtime, `-3600000` hourly, `1` daily, `7` weekly, `30` monthly.
    pub interval: i64,
    pub segment: Option<Value>,
    pub group_by: Option<String>,
    /// Rows to return, at most 1000.
    pub limit: u32,
}

impl SegmentationQuery {
    pub fn new(event: Value, start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            event,
            start: start.into(),
            end: end.into(),
            metrics: "uniques".to_string(),
            interval: 1,
            segment: None,
            group_by: None,
            limit: 100,
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut q = vec![
            ("e", self.event.to_string()),
            ("m", self.metrics.clone()),
            ("start", self.start.clone()),
            ("end", self.end.clone()),
            ("i", self.interval.to_string()),
        ];
        if let Some(segment) = &self.segment {
            q.push(("s", segment.to_string()));
        }
        if let Some(group_by) = &self.group_by {
            q.push(("g", group_by.clone()));
        }
        q.push(("limit", self.limit.min(1000).to_string()));
        q
    }
}

fn bool_param(v: bool) -> String {
    let s = if v { "True" } else { "False" };
    s.to_string()
}

impl Client {
    /// Results of an existing chart.
    #[instrument(skip(self))]
    pub fn chart(&self, chart_id: &str) -> Result<Value> {
        let path = format!("/api/3/chart/{}/query", encode(chart_id));
        self.transport.json(Method::GET, &path, &[], &self.operation_token())
    }

    /// Looks up a user by user id, device id or Amplitude id.
    #[instrument(skip(self))]
    pub fn find_user(&self, user: &str) -> Result<UserSearch> {
        let query = [("user", user.to_string())];
        self.transport
            .json(Method::GET, "/api/2/usersearch", &query, &self.operation_token())
    }

    /// Schedules deletion of user data. Never retried.
    #[instrument(skip_all, fields(requester = %request.requester))]
    pub fn delete_users(&self, request: &DeletionRequest) -> Result<Value> {
        let value = self.transport.json(
            Method::POST,
            "/api/2/deletions/users",
            &request.query(),
            &self.operation_token(),
        )?;
        info!(
            amplitude_ids = request.amplitude_ids.len(),
            user_ids = request.user_ids.len(),
            "user deletion requested"
        );
        Ok(value)
    }

    /// Deletion jobs scheduled between two days (`YYYY-MM-DD`).
    #[instrument(skip(self))]
    pub fn deletion_jobs(&self, start_day: &str, end_day: &str) -> Result<Value> {
        let query = [
            ("start_day", start_day.to_string()),
            ("end_day", end_day.to_string()),
        ];
        self.transport
            .json(Method::GET, "/api/2/deletions/users", &query, &self.operation_token())
    }

    /// All event types in the project's taxonomy.
    #[instrument(skip(self))]
    pub fn event_types(&self) -> Result<Value> {
        self.transport
            .json(Method::GET, "/api/2/taxonomy/event", &[], &self.operation_token())
    }

    #[instrument(skip(self))]
    pub fn event_type(&self, event_type: &str) -> Result<Value> {
        let path = format!("/api/2/taxonomy/event/{}", encode(event_type));
        self.transport.json(Method::GET, &path, &[], &self.operation_token())
    }

    /// Removes an event type from the taxonomy. Never retried.
    #[instrument(skip(self))]
    pub fn delete_event_type(&self, event_type: &str) -> Result<Value> {
        let path = format!("/api/2/taxonomy/event/{}", encode(event_type));
        self.transport.json(Method::DELETE, &path, &[], &self.operation_token())
    }

    #[instrument(skip_all, fields(start = %query.start, end = %query.end))]
    pub fn event_segmentation(&self, query: &SegmentationQuery) -> Result<Value> {
        self.transport.json(
            Method::GET,
            "/api/2/events/segmentation",
            &query.query(),
            &self.operation_token(),
        )
    }
}

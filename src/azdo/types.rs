// src/azdo/types.rs
//
// Raw Azure DevOps payload shapes. Everything here is partially typed on
// purpose: upstream omits fields freely, and work-item `fields` is an
// arbitrary bag keyed by reference names like `System.ChangedDate`.

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub display_name: Option<String>,
    pub unique_name: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub pull_request_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
    pub creation_date: Option<String>,
    pub last_update_time: Option<String>,
    pub created_by: Option<Identity>,
    pub repository: Option<Repository>,
}

impl PullRequest {
    /// Event timestamp preference: last update, falling back to creation.
    pub fn event_time_raw(&self) -> Option<&str> {
        self.last_update_time
            .as_deref()
            .or(self.creation_date.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub rev: Option<i64>,
    pub fields: Option<Map<String, Value>>,
}

impl WorkItem {
    pub fn fields(&self) -> WorkItemFields<'_> {
        WorkItemFields(self.fields.as_ref())
    }
}

/// Tagged access to the loosely-typed work-item field bag. Every getter
/// checks presence and type and falls back to a documented default instead
/// of trusting upstream shape.
#[derive(Debug, Clone, Copy)]
pub struct WorkItemFields<'a>(Option<&'a Map<String, Value>>);

impl<'a> WorkItemFields<'a> {
    pub fn str_field(&self, name: &str) -> Option<&'a str> {
        self.0.and_then(|m| m.get(name)).and_then(Value::as_str)
    }

    pub fn i64_field(&self, name: &str) -> Option<i64> {
        self.0.and_then(|m| m.get(name)).and_then(Value::as_i64)
    }

    /// `System.ChangedBy` style identity records arrive as nested objects;
    /// anything that is not an object yields no identity at all.
    pub fn identity_field(&self, name: &str) -> Option<Identity> {
        let obj = self.0.and_then(|m| m.get(name)).and_then(Value::as_object)?;
        let get = |key: &str| obj.get(key).and_then(Value::as_str).map(String::from);
        Some(Identity {
            display_name: get("displayName"),
            unique_name: get("uniqueName"),
            image_url: get("imageUrl"),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkItemRef {
    pub id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WiqlResult {
    #[serde(default)]
    pub work_items: Vec<WorkItemRef>,
}

/// Azure DevOps list responses wrap their payload in `{ "value": [...] }`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

// src/sync/normalize.rs
//
// Maps raw upstream records into canonical feed posts. Ids are built from
// the raw upstream timestamp strings, not the re-parsed values, so the
// same upstream record always normalizes to the same id.

use chrono::{DateTime, Utc};
use urlencoding::encode;

use crate::azdo::types::{PullRequest, WorkItem};
use crate::sync::types::{
    Actor, FeedPost, FeedPostKind, PullRequestDetail, WorkItemDetail,
};

fn pr_verb(status: &str) -> &'static str {
    match status {
        "completed" => "completed",
        "abandoned" => "abandoned",
        _ => "updated",
    }
}

fn parse_event_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Normalize a pull request. Returns `None` when the event timestamp is
/// missing or unparseable; window filtering happens in the orchestrator.
pub fn pull_request_post(org: &str, project: &str, pr: &PullRequest) -> Option<FeedPost> {
    let raw_time = pr.event_time_raw()?;
    let created_at = parse_event_time(raw_time)?;

    let repo = pr.repository.as_ref().map(|r| r.name.clone());
    let pr_id = pr.pull_request_id;

    let url = match &repo {
        Some(name) => format!(
            "https://dev.azure.com/{}/{}/_git/{}/pullrequest/{}",
            encode(org),
            encode(project),
            encode(name),
            pr_id
        ),
        None => format!("https://dev.azure.com/{}/{}", encode(org), encode(project)),
    };

    let created_by = pr.created_by.as_ref();
    let actor = Actor {
        display_name: created_by
            .and_then(|c| c.display_name.clone())
            .unwrap_or_else(|| "Someone".to_string()),
        unique_name: created_by
            .and_then(|c| c.unique_name.clone())
            .unwrap_or_default(),
        avatar_url: created_by.and_then(|c| c.image_url.clone()),
    };

    Some(FeedPost {
        id: format!(
            "pr:{}:{}:{}:{}",
            project,
            repo.as_deref().unwrap_or(""),
            pr_id,
            raw_time
        ),
        kind: FeedPostKind::PullRequest,
        org: org.to_string(),
        project: project.to_string(),
        repo,
        actor,
        created_at,
        summary: format!("{} PR #{}: {}", pr_verb(&pr.status), pr_id, pr.title),
        url,
        pull_request: Some(PullRequestDetail {
            id: pr_id,
            title: pr.title.clone(),
            status: pr.status.clone(),
        }),
        work_item: None,
    })
}

/// Normalize a work item from its field bag. Returns `None` when
/// `System.ChangedDate` is absent or unparseable.
pub fn work_item_post(org: &str, project: &str, wi: &WorkItem) -> Option<FeedPost> {
    let fields = wi.fields();

    let changed_raw = fields.str_field("System.ChangedDate")?;
    let created_at = parse_event_time(changed_raw)?;

    let id = fields.i64_field("System.Id").unwrap_or(wi.id);
    let title = fields.str_field("System.Title").unwrap_or("Work item");
    let state = fields.str_field("System.State").unwrap_or("");
    let kind = fields
        .str_field("System.WorkItemType")
        .unwrap_or("Work Item");

    let changed_by = fields.identity_field("System.ChangedBy");
    let display_name = changed_by
        .as_ref()
        .and_then(|c| c.display_name.clone())
        .or_else(|| changed_by.as_ref().and_then(|c| c.unique_name.clone()))
        .unwrap_or_else(|| "Someone".to_string());
    let unique_name = changed_by
        .as_ref()
        .and_then(|c| c.unique_name.clone())
        .unwrap_or_default();
    let avatar_url = changed_by.as_ref().and_then(|c| c.image_url.clone());

    let summary = if state.is_empty() {
        format!("updated {kind} {id}: {title}")
    } else {
        format!("updated {kind} {id} \u{2192} {state}: {title}")
    };

    Some(FeedPost {
        id: format!(
            "wi:{}:{}:{}:{}",
            project,
            id,
            wi.rev.map(|r| r.to_string()).unwrap_or_default(),
            changed_raw
        ),
        kind: FeedPostKind::WorkItem,
        org: org.to_string(),
        project: project.to_string(),
        repo: None,
        actor: Actor {
            display_name,
            unique_name,
            avatar_url,
        },
        created_at,
        summary,
        url: format!(
            "https://dev.azure.com/{}/{}/_workitems/edit/{}",
            encode(org),
            encode(project),
            id
        ),
        pull_request: None,
        work_item: Some(WorkItemDetail {
            id,
            title: title.to_string(),
            state: state.to_string(),
            kind: kind.to_string(),
        }),
    })
}

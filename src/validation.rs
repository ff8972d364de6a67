//! # Request validation and error sanitization
//! Every boundary request is validated before any upstream call, and every
//! error string that leaves the service is scrubbed: credential-looking
//! substrings are redacted, length is bounded, and well-known
//! infrastructure failures are replaced with fixed user-facing sentences.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub const MAX_PROJECTS: usize = 100;
pub const MAX_LOOKBACK_HOURS: u32 = 8760;
pub const MAX_PR_TOP: u32 = 200;
pub const MAX_WI_TOP: u32 = 500;

const MAX_ERROR_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Organization name is required")]
    OrgRequired,
    #[error("Organization name too long")]
    OrgTooLong,
    #[error("Organization name can only contain letters, numbers, hyphens, and underscores")]
    OrgInvalidChars,
    #[error("PAT appears invalid (too short)")]
    PatTooShort,
    #[error("PAT too long")]
    PatTooLong,
    #[error("PAT contains invalid characters")]
    PatInvalidChars,
    #[error("Project name contains invalid characters")]
    ProjectNameInvalid,
    #[error("Too many projects requested")]
    TooManyProjects,
    #[error("Lookback hours out of range")]
    HoursOutOfRange,
    #[error("prTop out of range")]
    PrTopOutOfRange,
    #[error("wiTop out of range")]
    WiTopOutOfRange,
}

static ORG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9-_]+$").expect("org regex"));
static PAT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9+/=_-]+$").expect("pat regex"));
static PROJECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[^<>:"/\\|?*\x00-\x1F]+$"#).expect("project regex"));

pub fn validate_org(org: &str) -> Result<(), ValidationError> {
    if org.is_empty() {
        return Err(ValidationError::OrgRequired);
    }
    if org.len() > 255 {
        return Err(ValidationError::OrgTooLong);
    }
    if !ORG_RE.is_match(org) {
        return Err(ValidationError::OrgInvalidChars);
    }
    Ok(())
}

pub fn validate_pat(pat: &str) -> Result<(), ValidationError> {
    if pat.len() < 20 {
        return Err(ValidationError::PatTooShort);
    }
    if pat.len() > 1024 {
        return Err(ValidationError::PatTooLong);
    }
    if !PAT_RE.is_match(pat) {
        return Err(ValidationError::PatInvalidChars);
    }
    Ok(())
}

pub fn validate_project_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > 255 || !PROJECT_RE.is_match(name) {
        return Err(ValidationError::ProjectNameInvalid);
    }
    Ok(())
}

pub fn validate_projects(projects: &[String]) -> Result<(), ValidationError> {
    if projects.len() > MAX_PROJECTS {
        return Err(ValidationError::TooManyProjects);
    }
    for name in projects {
        validate_project_name(name)?;
    }
    Ok(())
}

pub fn validate_lookback_hours(hours: u32) -> Result<(), ValidationError> {
    if (1..=MAX_LOOKBACK_HOURS).contains(&hours) {
        Ok(())
    } else {
        Err(ValidationError::HoursOutOfRange)
    }
}

pub fn validate_pr_top(top: u32) -> Result<(), ValidationError> {
    if (1..=MAX_PR_TOP).contains(&top) {
        Ok(())
    } else {
        Err(ValidationError::PrTopOutOfRange)
    }
}

pub fn validate_wi_top(top: u32) -> Result<(), ValidationError> {
    if (1..=MAX_WI_TOP).contains(&top) {
        Ok(())
    } else {
        Err(ValidationError::WiTopOutOfRange)
    }
}

static RE_BEARER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Bearer [a-zA-Z0-9+/=_-]+").expect("bearer regex"));
static RE_BASIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Basic [a-zA-Z0-9+/=_-]+").expect("basic regex"));
static RE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[a-z0-9]{52}").expect("token regex"));
static RE_AUTH_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)authorization:[^\n]*").expect("auth-line regex"));

/// Scrub an error message for client consumption. Known infrastructure
/// failures collapse to fixed sentences; anything else is redacted and
/// length-capped.
pub fn sanitize_error_message(message: &str) -> String {
    if message.contains("dns error")
        || message.contains("Connection refused")
        || message.contains("error trying to connect")
    {
        return "Unable to connect to Azure DevOps. Please check your organization name.".into();
    }
    if message.contains("401") || message.contains("Unauthorized") {
        return "Authentication failed. Please check your Personal Access Token.".into();
    }
    if message.contains("403") || message.contains("Forbidden") {
        return "Access denied. Your PAT may not have sufficient permissions.".into();
    }
    if message.contains("404") || message.contains("Not Found") {
        return "Resource not found. Please check your organization and project names.".into();
    }

    let redacted = RE_BEARER.replace_all(message, "Bearer [REDACTED]");
    let redacted = RE_BASIC.replace_all(&redacted, "Basic [REDACTED]");
    let redacted = RE_TOKEN.replace_all(&redacted, "[REDACTED_TOKEN]");
    let redacted = RE_AUTH_LINE.replace_all(&redacted, "authorization: [REDACTED]");

    let capped: String = redacted.chars().take(MAX_ERROR_LEN).collect();
    if capped.is_empty() {
        "An error occurred".into()
    } else {
        capped
    }
}

//! API Routes

pub mod assessments;
pub mod billing;
pub mod chat;
pub mod companies;
pub mod documents;
pub mod health;
pub mod submissions;
pub mod team;
pub mod user;

use crate::error::{ApiError, ApiResult};

/// Trimmed, non-empty, bounded text field
pub(crate) fn required_text(field: &str, value: &str, max_len: usize) -> ApiResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    if value.chars().count() > max_len {
        return Err(ApiError::bad_request(format!("{field} must be at most {max_len} characters")));
    }
    Ok(value.to_string())
}

/// Optional text field; blank becomes `None`
pub(crate) fn optional_text(field: &str, value: Option<String>, max_len: usize) -> ApiResult<Option<String>> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => required_text(field, v, max_len).map(Some),
    }
}

/// PATCH semantics for nullable text: absent keeps, blank clears
pub(crate) fn patch_text(
    target: &mut Option<String>,
    field: &str,
    value: Option<String>,
    max_len: usize,
) -> ApiResult<()> {
    if value.is_some() {
        *target = optional_text(field, value, max_len)?;
    }
    Ok(())
}

/// Loose shape check; deliverability is the mail provider's problem
pub(crate) fn normalize_email(value: &str) -> ApiResult<String> {
    let email = value.trim().to_lowercase();
    let valid = email.len() <= 254
        && !email.contains(char::is_whitespace)
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'));
    if valid {
        Ok(email)
    } else {
        Err(ApiError::bad_request("A valid email address is required"))
    }
}

/// `http(s)://` URL or nothing
pub(crate) fn optional_url(field: &str, value: Option<String>) -> ApiResult<Option<String>> {
    let value = optional_text(field, value, 2048)?;
    match &value {
        Some(v) if !(v.starts_with("https://") || v.starts_with("http://")) => {
            Err(ApiError::bad_request(format!("{field} must be an http(s) URL")))
        }
        _ => Ok(value),
    }
}

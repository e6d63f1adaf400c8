//! Free-text field validation shared by the domain crates.

use crate::error::{DomainError, DomainResult};

/// Trimmed, non-empty, at most `max` characters.
pub fn required(field: &str, value: &str, max: usize) -> DomainResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(DomainError::validation(format!("{field} is required")));
    }
    if v.chars().count() > max {
        return Err(DomainError::validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(v.to_string())
}

/// Like [`required`], but blank input collapses to `None`.
pub fn optional(field: &str, value: Option<String>, max: usize) -> DomainResult<Option<String>> {
    match value {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => required(field, &v, max).map(Some),
    }
}

/// Minimal shape check; delivery is what really validates an address.
pub fn email(field: &str, value: &str) -> DomainResult<String> {
    let v = required(field, value, 320)?;
    match v.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.') => {
            Ok(v)
        }
        _ => Err(DomainError::validation(format!("{field} must be a valid e-mail address"))),
    }
}

pub fn optional_email(field: &str, value: Option<String>) -> DomainResult<Option<String>> {
    match value {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => email(field, &v).map(Some),
    }
}

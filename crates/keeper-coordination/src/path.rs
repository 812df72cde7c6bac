//! ZooKeeper-style path helpers
//!
//! Paths are absolute, `/`-separated, with no empty, `.` or `..` segments and
//! no trailing separator (except the root `/` itself).

use crate::error::{CoordinationError, Result};

pub const ROOT: &str = "/";

/// Validate an absolute node path.
pub fn validate(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(CoordinationError::invalid_path(
            path,
            "path must start with '/'",
        ));
    }
    if path == ROOT {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(CoordinationError::invalid_path(
            path,
            "path must not end with '/'",
        ));
    }
    for segment in path[1..].split('/') {
        validate_segment(path, segment)?;
    }
    Ok(())
}

fn validate_segment(path: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(CoordinationError::invalid_path(path, "empty segment"));
    }
    if segment == "." || segment == ".." {
        return Err(CoordinationError::invalid_path(
            path,
            "relative segments are not allowed",
        ));
    }
    if segment.contains('\0') {
        return Err(CoordinationError::invalid_path(path, "null character"));
    }
    Ok(())
}

/// Join a base path and a relative suffix with exactly one separator.
///
/// Leading and trailing separators on `suffix` are ignored; an empty suffix is
/// rejected.
pub fn join(base: &str, suffix: &str) -> Result<String> {
    validate(base)?;
    let trimmed = suffix.trim_matches('/');
    if trimmed.is_empty() {
        return Err(CoordinationError::invalid_path(suffix, "empty suffix"));
    }
    let joined = if base == ROOT {
        format!("/{}", trimmed)
    } else {
        format!("{}/{}", base, trimmed)
    };
    validate(&joined)?;
    Ok(joined)
}

/// Parent of a path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a path; empty for the root.
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Every non-root prefix of `path`, shallowest first, including `path` itself.
pub fn lineage(path: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut end = 0;
    for segment in path.split('/').skip(1) {
        if segment.is_empty() {
            continue;
        }
        end += segment.len() + 1;
        result.push(path[..end].to_string());
    }
    result
}

// CLASSIFICATION: COMMUNITY
// Filename: path.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-06-21

//! Path guard for user-supplied virtual paths.
//!
//! Every path that arrives over the API is normalized against a virtual
//! root before it is composed with the mount point. Upward traversal is
//! rejected outright rather than resolved.

use std::path::{Path, PathBuf};

use crate::error::{ApiResult, ErrorKind};

/// Longest accepted virtual path, in bytes.
pub const MAX_PATH_LEN: usize = 256;
/// Longest accepted single file or directory name, in bytes.
pub const MAX_NAME_LEN: usize = 96;

/// Normalize a user path to an absolute virtual path rooted at `/`.
///
/// Empty input and `/` both normalize to `/`. Empty and `.` segments are
/// dropped, `..` anywhere is a `BAD_PATH`, and segments may not carry
/// control bytes or backslashes. The result always begins with `/` and
/// normalizing it again returns it unchanged.
pub fn normalize(input: &str) -> ApiResult<String> {
    if input.is_empty() || input == "/" {
        return Ok(String::from("/"));
    }
    let mut out = String::with_capacity(input.len() + 1);
    for seg in input.split('/') {
        if seg.is_empty() || seg == "." {
            continue;
        }
        if seg == ".." {
            return Err(ErrorKind::BadPath);
        }
        if seg.bytes().any(|b| b < 0x20 || b == b'\\') {
            return Err(ErrorKind::BadPath);
        }
        out.push('/');
        out.push_str(seg);
    }
    if out.is_empty() {
        out.push('/');
    }
    if out.len() > MAX_PATH_LEN {
        return Err(ErrorKind::PathTooLong);
    }
    Ok(out)
}

/// Validate a single file or directory name.
///
/// Names may not be empty, may not contain control bytes or path
/// separators, and may not be the literal `.` or `..`.
pub fn sanitize_name(input: &str) -> ApiResult<String> {
    if input.is_empty() {
        return Err(ErrorKind::BadName);
    }
    if input.len() > MAX_NAME_LEN {
        return Err(ErrorKind::BadName);
    }
    if input == "." || input == ".." {
        return Err(ErrorKind::BadName);
    }
    if input.bytes().any(|b| b < 0x20 || b == b'/' || b == b'\\') {
        return Err(ErrorKind::BadName);
    }
    Ok(input.to_string())
}

/// Join a sanitized name onto a normalized directory path.
pub fn child(base: &str, name: &str) -> ApiResult<String> {
    let joined = if base == "/" {
        format!("/{name}")
    } else {
        format!("{base}/{name}")
    };
    if joined.len() > MAX_PATH_LEN {
        return Err(ErrorKind::PathTooLong);
    }
    Ok(joined)
}

/// Parent directory of a normalized path; the parent of `/x` is `/`.
pub fn parent(rel: &str) -> &str {
    match rel.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &rel[..i],
    }
}

/// Final component of a normalized path.
pub fn file_name(rel: &str) -> &str {
    match rel.rfind('/') {
        Some(i) => &rel[i + 1..],
        None => rel,
    }
}

/// Compose the filesystem-absolute path for a normalized virtual path.
pub fn to_fs_path(mount: &Path, rel: &str) -> PathBuf {
    if rel == "/" {
        return mount.to_path_buf();
    }
    mount.join(rel.trim_start_matches('/'))
}

// CLASSIFICATION: COMMUNITY
// Filename: error.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-06-19

//! Tagged error kinds for the HTTP API.
//!
//! Errors never cross the HTTP boundary except as one of these kinds;
//! the wire body is always `{"error":"<KIND>"}` with the token spelled
//! exactly as `token()` returns it.

use std::fmt;

/// Every failure the API can report, one token per row of the error table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// SD card is exposed over USB; file access refused.
    Busy,
    /// Another mutating file operation holds the lock.
    FileopInProgress,
    /// Filesystem overlay is not mounted.
    NotMounted,
    BadPath,
    BadName,
    PathTooLong,
    NameRequired,
    PathRequired,
    NewNameRequired,
    NoBody,
    NoName,
    NoFilename,
    NoContentType,
    NoBoundary,
    BoundaryTooLong,
    HeaderTooLarge,
    BadMultipart,
    BadBody,
    NotFound,
    FileExists,
    IsDirectory,
    OpenFail,
    DeleteFail,
    RenameFail,
    MkdirFail,
    WriteFail,
    RecvFail,
    PathFail,
    NoMem,
    DetachFail,
    AttachFail,
}

impl ErrorKind {
    /// Wire token, emitted verbatim in the JSON error body.
    pub fn token(self) -> &'static str {
        match self {
            ErrorKind::Busy => "BUSY",
            ErrorKind::FileopInProgress => "FILEOP_IN_PROGRESS",
            ErrorKind::NotMounted => "NOT_MOUNTED",
            ErrorKind::BadPath => "BAD_PATH",
            ErrorKind::BadName => "BAD_NAME",
            ErrorKind::PathTooLong => "PATH_TOO_LONG",
            ErrorKind::NameRequired => "NAME_REQUIRED",
            ErrorKind::PathRequired => "PATH_REQUIRED",
            ErrorKind::NewNameRequired => "NEW_NAME_REQUIRED",
            ErrorKind::NoBody => "NO_BODY",
            ErrorKind::NoName => "NO_NAME",
            ErrorKind::NoFilename => "NO_FILENAME",
            ErrorKind::NoContentType => "NO_CONTENT_TYPE",
            ErrorKind::NoBoundary => "NO_BOUNDARY",
            ErrorKind::BoundaryTooLong => "BOUNDARY_TOO_LONG",
            ErrorKind::HeaderTooLarge => "HEADER_TOO_LARGE",
            ErrorKind::BadMultipart => "BAD_MULTIPART",
            ErrorKind::BadBody => "BAD_BODY",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::FileExists => "FILE_EXISTS",
            ErrorKind::IsDirectory => "IS_DIRECTORY",
            ErrorKind::OpenFail => "OPEN_FAIL",
            ErrorKind::DeleteFail => "DELETE_FAIL",
            ErrorKind::RenameFail => "RENAME_FAIL",
            ErrorKind::MkdirFail => "MKDIR_FAIL",
            ErrorKind::WriteFail => "WRITE_FAIL",
            ErrorKind::RecvFail => "RECV_FAIL",
            ErrorKind::PathFail => "PATH_FAIL",
            ErrorKind::NoMem => "NO_MEM",
            ErrorKind::DetachFail => "DETACH_FAIL",
            ErrorKind::AttachFail => "ATTACH_FAIL",
        }
    }

    /// HTTP status the kind is surfaced with.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::Busy | ErrorKind::FileopInProgress => 423,
            ErrorKind::NotMounted | ErrorKind::FileExists | ErrorKind::IsDirectory => 409,
            ErrorKind::NotFound => 404,
            ErrorKind::BadPath
            | ErrorKind::BadName
            | ErrorKind::PathTooLong
            | ErrorKind::NameRequired
            | ErrorKind::PathRequired
            | ErrorKind::NewNameRequired
            | ErrorKind::NoBody
            | ErrorKind::NoName
            | ErrorKind::NoFilename
            | ErrorKind::NoContentType
            | ErrorKind::NoBoundary
            | ErrorKind::BoundaryTooLong
            | ErrorKind::HeaderTooLarge
            | ErrorKind::BadMultipart
            | ErrorKind::BadBody
            | ErrorKind::RecvFail => 400,
            ErrorKind::OpenFail
            | ErrorKind::DeleteFail
            | ErrorKind::RenameFail
            | ErrorKind::MkdirFail
            | ErrorKind::WriteFail
            | ErrorKind::PathFail
            | ErrorKind::NoMem
            | ErrorKind::DetachFail
            | ErrorKind::AttachFail => 500,
        }
    }

    /// JSON body for the error response.
    pub fn body(self) -> String {
        format!("{{\"error\":\"{}\"}}", self.token())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl std::error::Error for ErrorKind {}

/// Shorthand used throughout the web layer.
pub type ApiResult<T> = Result<T, ErrorKind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_and_status_match_table() {
        assert_eq!(ErrorKind::FileopInProgress.token(), "FILEOP_IN_PROGRESS");
        assert_eq!(ErrorKind::FileopInProgress.status(), 423);
        assert_eq!(ErrorKind::NotMounted.status(), 409);
        assert_eq!(ErrorKind::IsDirectory.status(), 409);
        assert_eq!(ErrorKind::NotFound.status(), 404);
        assert_eq!(ErrorKind::BadPath.status(), 400);
        assert_eq!(ErrorKind::RenameFail.status(), 500);
        assert_eq!(ErrorKind::Busy.body(), "{\"error\":\"BUSY\"}");
    }
}

// CLASSIFICATION: COMMUNITY
// Filename: handlers.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-07-03

//! HTTP endpoint handlers over the arbiter.
//!
//! Every handler runs the same gauntlet: arbiter gate, file-operation
//! lock for mutations, path guard, then the filesystem call, with OS
//! errors translated to tagged kinds. The lock is released on every
//! exit path by guard drop.

use std::io::Cursor;

use log::debug;
use tiny_http::{Header, Request, Response, StatusCode};

use crate::arbiter::{ArbiterError, Mode};
use crate::core::Core;
use crate::error::{ApiResult, ErrorKind};
use crate::fs::path;
use crate::web::request::{
    boundary_from_content_type, json_escape, json_field, query_flag, query_of, query_path,
    query_value, read_body,
};
use crate::web::upload;

const OK_BODY: &str = "{\"ok\":true}";

fn json_header() -> Header {
    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap()
}

fn respond_json(req: Request, status: u16, body: &str) {
    let response = Response::from_string(body)
        .with_status_code(StatusCode(status))
        .with_header(json_header());
    let _ = req.respond(response);
}

pub fn respond_error(req: Request, kind: ErrorKind) {
    debug!("{} {} -> {}", req.method(), req.url(), kind.token());
    respond_json(req, kind.status(), &kind.body());
}

/// Receive and discard whatever body is left, so an early error reply
/// does not leave unread bytes on the connection.
fn drain(req: &mut Request) {
    let mut sink = [0u8; 4096];
    let reader = req.as_reader();
    while matches!(reader.read(&mut sink), Ok(n) if n > 0) {}
}

fn header_value(req: &Request, name: &'static str) -> Option<String> {
    req.headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_string())
}

/// GET /api/fs/list
pub fn fs_list(core: &Core, req: Request) {
    let fsg = match core.arbiter.app_fs() {
        Ok(g) => g,
        Err(kind) => return respond_error(req, kind),
    };
    let url = req.url().to_string();
    let result: ApiResult<String> = (|| {
        let rel = query_path(query_of(&url))?;
        let full = path::to_fs_path(fsg.overlay().mount_point(), &rel);
        let entries = fsg.overlay().list_dir(&full).map_err(|_| ErrorKind::NotFound)?;
        let mut body = format!("{{\"path\":\"{}\",\"items\":[", json_escape(&rel));
        for (i, item) in entries.iter().enumerate() {
            if i > 0 {
                body.push(',');
            }
            let name = json_escape(&item.name);
            if item.is_dir {
                body.push_str(&format!("{{\"name\":\"{name}\",\"type\":\"dir\"}}"));
            } else {
                body.push_str(&format!(
                    "{{\"name\":\"{name}\",\"type\":\"file\",\"size\":{}}}",
                    item.size
                ));
            }
        }
        body.push_str("]}");
        Ok(body)
    })();
    match result {
        Ok(body) => {
            // Streamed chunked, as directory listings can run long.
            let response = Response::new(
                StatusCode(200),
                vec![json_header()],
                Cursor::new(body.into_bytes()),
                None,
                None,
            );
            let _ = req.respond(response);
        }
        Err(kind) => respond_error(req, kind),
    }
}

/// GET /api/fs/download
pub fn fs_download(core: &Core, req: Request) {
    let fsg = match core.arbiter.app_fs() {
        Ok(g) => g,
        Err(kind) => return respond_error(req, kind),
    };
    let url = req.url().to_string();
    let result: ApiResult<(std::fs::File, String)> = (|| {
        let rel = query_path(query_of(&url))?;
        if rel == "/" {
            return Err(ErrorKind::BadPath);
        }
        let full = path::to_fs_path(fsg.overlay().mount_point(), &rel);
        let info = fsg.overlay().stat(&full).map_err(|_| ErrorKind::NotFound)?;
        if info.is_dir {
            return Err(ErrorKind::IsDirectory);
        }
        let file = fsg.overlay().open_read(&full).map_err(|_| ErrorKind::OpenFail)?;
        Ok((file, path::file_name(&rel).to_string()))
    })();
    match result {
        Ok((file, name)) => {
            let octet =
                Header::from_bytes(&b"Content-Type"[..], &b"application/octet-stream"[..]).unwrap();
            let disp = Header::from_bytes(
                &b"Content-Disposition"[..],
                format!("attachment; filename=\"{}\"", json_escape(&name)).as_bytes(),
            )
            .unwrap();
            // The guard stays held while the body streams out.
            let response = Response::new(StatusCode(200), vec![octet, disp], file, None, None);
            let _ = req.respond(response);
        }
        Err(kind) => respond_error(req, kind),
    }
}

/// POST /api/fs/mkdir
pub fn fs_mkdir(core: &Core, mut req: Request) {
    let result = mutate_with_body(core, &mut req, |overlay, body| {
        let dir = match json_field(body, "path") {
            Some(p) => path::normalize(&p)?,
            None => String::from("/"),
        };
        let name = json_field(body, "name").ok_or(ErrorKind::NameRequired)?;
        let name = path::sanitize_name(&name)?;
        let rel = path::child(&dir, &name)?;
        let full = path::to_fs_path(overlay.mount_point(), &rel);
        overlay.mkdir(&full).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                ErrorKind::FileExists
            } else {
                ErrorKind::MkdirFail
            }
        })
    });
    finish_mutation(req, result);
}

/// POST /api/fs/delete — files only; directory deletion stays refused.
pub fn fs_delete(core: &Core, mut req: Request) {
    let result = mutate_with_body(core, &mut req, |overlay, body| {
        let rel_raw = json_field(body, "path").ok_or(ErrorKind::PathRequired)?;
        let rel = path::normalize(&rel_raw)?;
        if rel == "/" {
            return Err(ErrorKind::BadPath);
        }
        let full = path::to_fs_path(overlay.mount_point(), &rel);
        let info = overlay.stat(&full).map_err(|_| ErrorKind::NotFound)?;
        if info.is_dir {
            return Err(ErrorKind::IsDirectory);
        }
        overlay.unlink(&full).map_err(|_| ErrorKind::DeleteFail)
    });
    finish_mutation(req, result);
}

/// POST /api/fs/rename — within the same parent directory.
pub fn fs_rename(core: &Core, mut req: Request) {
    let result = mutate_with_body(core, &mut req, |overlay, body| {
        let rel_raw = json_field(body, "path").ok_or(ErrorKind::PathRequired)?;
        let new_raw = json_field(body, "new_name").ok_or(ErrorKind::NewNameRequired)?;
        let rel_old = path::normalize(&rel_raw)?;
        if rel_old == "/" {
            return Err(ErrorKind::BadPath);
        }
        let new_name = path::sanitize_name(&new_raw)?;
        let rel_new = path::child(path::parent(&rel_old), &new_name)?;
        let full_old = path::to_fs_path(overlay.mount_point(), &rel_old);
        let full_new = path::to_fs_path(overlay.mount_point(), &rel_new);
        overlay.stat(&full_old).map_err(|_| ErrorKind::NotFound)?;
        if overlay.stat(&full_new).is_ok() {
            return Err(ErrorKind::FileExists);
        }
        overlay
            .rename(&full_old, &full_new)
            .map_err(|_| ErrorKind::RenameFail)
    });
    finish_mutation(req, result);
}

/// Common shell of the small JSON mutations: gate, lock, body, op.
fn mutate_with_body(
    core: &Core,
    req: &mut Request,
    op: impl FnOnce(&dyn crate::fs::overlay::FilesystemOverlay, &str) -> ApiResult<()>,
) -> ApiResult<()> {
    let fsg = core.arbiter.app_fs()?;
    let _lock = core.arbiter.try_fileop()?;
    let len = req.body_length();
    let body = read_body(req.as_reader(), len)?;
    op(fsg.overlay(), &body)
}

fn finish_mutation(mut req: Request, result: ApiResult<()>) {
    match result {
        Ok(()) => respond_json(req, 200, OK_BODY),
        Err(kind) => {
            drain(&mut req);
            respond_error(req, kind);
        }
    }
}

/// POST /api/fs/upload — multipart/form-data.
pub fn fs_upload(core: &Core, mut req: Request) {
    let url = req.url().to_string();
    let result: ApiResult<()> = (|| {
        let fsg = core.arbiter.app_fs()?;
        let _lock = core.arbiter.try_fileop()?;
        let query = query_of(&url);
        let rel_dir = query_path(query)?;
        let overwrite = query_flag(query, "overwrite");
        let content_type = header_value(&req, "Content-Type").ok_or(ErrorKind::NoContentType)?;
        let boundary = boundary_from_content_type(&content_type)?;
        let len = req.body_length().unwrap_or(0);
        upload::run_multipart(fsg.overlay(), req.as_reader(), len, &rel_dir, overwrite, &boundary)
    })();
    finish_mutation(req, result);
}

/// POST /api/fs/upload_raw — body is the file content.
pub fn fs_upload_raw(core: &Core, mut req: Request) {
    let url = req.url().to_string();
    let result: ApiResult<()> = (|| {
        let fsg = core.arbiter.app_fs()?;
        let _lock = core.arbiter.try_fileop()?;
        let query = query_of(&url);
        let rel_dir = query_path(query)?;
        let name = query_value(query, "name").ok_or(ErrorKind::NoName)?;
        let name = path::sanitize_name(&name)?;
        let overwrite = query_flag(query, "overwrite");
        let len = req.body_length().unwrap_or(0);
        upload::run_raw(fsg.overlay(), req.as_reader(), len, &rel_dir, &name, overwrite)
    })();
    finish_mutation(req, result);
}

/// POST /api/usb/attach
pub fn usb_attach(core: &Core, req: Request) {
    if core.arbiter.fileop_busy() {
        return respond_error(req, ErrorKind::FileopInProgress);
    }
    match core.arbiter.try_request(Mode::UsbExposed) {
        Ok(_) | Err(ArbiterError::AlreadyThere) => {
            respond_json(req, 200, "{\"ok\":true,\"mode\":\"ATTACHED\"}")
        }
        Err(ArbiterError::Busy) => respond_error(req, ErrorKind::FileopInProgress),
        Err(ArbiterError::Fatal(_)) => respond_error(req, ErrorKind::AttachFail),
    }
}

/// POST /api/usb/detach
pub fn usb_detach(core: &Core, req: Request) {
    if core.arbiter.fileop_busy() {
        return respond_error(req, ErrorKind::FileopInProgress);
    }
    match core.arbiter.try_request(Mode::AppMounted) {
        Ok(_) | Err(ArbiterError::AlreadyThere) => {
            respond_json(req, 200, "{\"ok\":true,\"mode\":\"DETACHED\"}")
        }
        Err(ArbiterError::Busy) => respond_error(req, ErrorKind::FileopInProgress),
        Err(ArbiterError::Fatal(_)) => respond_error(req, ErrorKind::DetachFail),
    }
}

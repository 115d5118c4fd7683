// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-03

//! HTTP front-end for the bridge.
//!
//! A small pool of worker threads pulls requests off the listener and
//! dispatches them by method and path. Request bodies arrive through
//! the transport in chunks of at most 32 KiB.

pub mod handlers;
pub mod request;
pub mod ring;
pub mod upload;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use log::{error, info};
use tiny_http::{Method, Request, Server};

use crate::core::Core;
use crate::error::ErrorKind;

/// Worker threads serving requests concurrently.
const WORKERS: usize = 4;
const RECV_POLL: Duration = Duration::from_millis(200);

pub struct WebServer {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    port: u16,
}

impl WebServer {
    /// Bind the listener and start the worker pool. Port `0` picks an
    /// ephemeral port, which the tests use.
    pub fn bind(core: Arc<Core>, port: u16) -> anyhow::Result<WebServer> {
        let server = Server::http(("0.0.0.0", port))
            .map_err(|e| anyhow::anyhow!("bind port {port}: {e}"))?;
        let server = Arc::new(server);
        let port = server
            .server_addr()
            .to_ip()
            .context("listener has no ip address")?
            .port();
        info!("http listening on port {port}");

        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(WORKERS);
        for i in 0..WORKERS {
            let server = Arc::clone(&server);
            let core = Arc::clone(&core);
            let stop = Arc::clone(&stop);
            let handle = std::thread::Builder::new()
                .name(format!("http-{i}"))
                .spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        match server.recv_timeout(RECV_POLL) {
                            Ok(Some(req)) => route(&core, req),
                            Ok(None) => {}
                            Err(e) => {
                                error!("http accept failed: {e}");
                                break;
                            }
                        }
                    }
                })?;
            workers.push(handle);
        }
        Ok(WebServer {
            stop,
            workers,
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Block the calling thread on the worker pool.
    pub fn join(mut self) {
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Ask the workers to wind down after their current request.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for WebServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Dispatch one request to its endpoint handler.
pub fn route(core: &Core, req: Request) {
    let path = request::path_of(req.url()).to_string();
    match (req.method().clone(), path.as_str()) {
        (Method::Get, "/api/fs/list") => handlers::fs_list(core, req),
        (Method::Get, "/api/fs/download") => handlers::fs_download(core, req),
        (Method::Post, "/api/fs/mkdir") => handlers::fs_mkdir(core, req),
        (Method::Post, "/api/fs/delete") => handlers::fs_delete(core, req),
        (Method::Post, "/api/fs/rename") => handlers::fs_rename(core, req),
        (Method::Post, "/api/fs/upload") => handlers::fs_upload(core, req),
        (Method::Post, "/api/fs/upload_raw") => handlers::fs_upload_raw(core, req),
        (Method::Post, "/api/usb/attach") => handlers::usb_attach(core, req),
        (Method::Post, "/api/usb/detach") => handlers::usb_detach(core, req),
        _ => handlers::respond_error(req, ErrorKind::NotFound),
    }
}

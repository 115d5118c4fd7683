// CLASSIFICATION: COMMUNITY
// Filename: upload.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-07-02

//! Streaming upload pipeline.
//!
//! Network receive and card writes are decoupled through the bounded
//! byte ring: the request handler is the producer, a dedicated writer
//! thread is the consumer. Bytes land in a `.part` staging file that is
//! renamed over the target only after the writer has flushed, fsynced
//! and exited; every failure path unlinks the staging file instead.
//!
//! The first error wins. A producer-side failure closes the ring and the
//! writer drains what is already buffered without failing further; a
//! writer-side failure keeps draining (discarding) so the producer can
//! never deadlock against a full ring.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::error::{ApiResult, ErrorKind};
use crate::fs::overlay::FilesystemOverlay;
use crate::fs::path;
use crate::web::request::{extract_filename, find_header_end, find_subsequence};
use crate::web::ring::{ByteRing, Pop};

/// Receive scratch size; the transport delivers at most this per read.
pub const RECV_BUF_SIZE: usize = 32 * 1024;
/// Cap on the accumulated multipart part header.
pub const HEADER_MAX: usize = 16 * 1024;
/// Tail carry buffer; the boundary marker must fit with room to spare.
pub const TAIL_MAX: usize = 128;
/// Preferred ring capacity.
pub const RING_SIZE: usize = 512 * 1024;
/// Fallback ring capacity when the preferred allocation fails.
pub const RING_SIZE_FALLBACK: usize = 256 * 1024;
/// Writer-side buffering; card writes go out in chunks at least this big.
const WRITE_CHUNK: usize = 32 * 1024;
/// Bounded wait of the consumer pop.
const POP_WAIT: Duration = Duration::from_millis(200);
/// Minimum spacing of progress log lines.
const LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Shared transfer counters for one upload.
pub struct UploadStats {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    chunks: AtomicU64,
    max_recv: AtomicU64,
    max_write: AtomicU64,
    started: Instant,
    last_log: Mutex<Instant>,
}

impl UploadStats {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
            max_recv: AtomicU64::new(0),
            max_write: AtomicU64::new(0),
            started: now,
            last_log: Mutex::new(now),
        }
    }

    fn add_recv(&self, n: usize) {
        self.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
        self.max_recv.fetch_max(n as u64, Ordering::Relaxed);
    }

    fn add_write(&self, n: usize) {
        self.bytes_out.fetch_add(n as u64, Ordering::Relaxed);
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.max_write.fetch_max(n as u64, Ordering::Relaxed);
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    fn log(&self, done: bool) {
        if !done {
            let mut last = self.last_log.lock().unwrap();
            if last.elapsed() < LOG_INTERVAL {
                return;
            }
            *last = Instant::now();
        }
        let written = self.bytes_out();
        let elapsed = self.started.elapsed().as_secs_f64();
        let avg_kbps = if elapsed > 0.0 {
            written as f64 / 1024.0 / elapsed
        } else {
            0.0
        };
        info!(
            "upload{} recv={} write={} avg={:.1} KB/s max_recv={} max_write={} chunks={}",
            if done { " done" } else { "" },
            self.bytes_in(),
            written,
            avg_kbps,
            self.max_recv.load(Ordering::Relaxed),
            self.max_write.load(Ordering::Relaxed),
            self.chunks.load(Ordering::Relaxed),
        );
    }
}

/// Staging `.part` file that unlinks itself unless committed.
struct Staging<'a> {
    overlay: &'a dyn FilesystemOverlay,
    path: PathBuf,
    armed: bool,
}

impl<'a> Staging<'a> {
    fn new(overlay: &'a dyn FilesystemOverlay, target: &Path) -> Self {
        let mut os = target.as_os_str().to_os_string();
        os.push(".part");
        let path = PathBuf::from(os);
        // A stale .part from an interrupted upload must not survive.
        let _ = overlay.unlink(&path);
        Self {
            overlay,
            path,
            armed: true,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn commit(mut self, target: &Path) -> ApiResult<()> {
        self.overlay
            .rename(&self.path, target)
            .map_err(|e| {
                error!("rename {} failed: {e}", self.path.display());
                ErrorKind::RenameFail
            })?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for Staging<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.overlay.unlink(&self.path);
        }
    }
}

/// Producer handle to the ring plus the writer thread behind it.
struct UploadSink {
    ring: Arc<ByteRing>,
    writer: Option<JoinHandle<std::io::Result<()>>>,
}

impl UploadSink {
    fn start(file: File, stats: Arc<UploadStats>) -> ApiResult<UploadSink> {
        let ring = Arc::new(
            ByteRing::allocate(RING_SIZE, RING_SIZE_FALLBACK).ok_or(ErrorKind::NoMem)?,
        );
        let consumer_ring = Arc::clone(&ring);
        let writer = thread::Builder::new()
            .name("upload-writer".into())
            .spawn(move || write_loop(consumer_ring, file, stats))
            .map_err(|_| ErrorKind::NoMem)?;
        Ok(UploadSink {
            ring,
            writer: Some(writer),
        })
    }

    fn push(&self, data: &[u8]) -> ApiResult<()> {
        self.ring.push(data).map_err(|_| ErrorKind::WriteFail)
    }

    /// Close the ring and join the writer; the upload is complete only
    /// once the writer has fsynced and exited.
    fn finish(mut self) -> ApiResult<()> {
        self.ring.close();
        match self.writer.take().map(|h| h.join()) {
            Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => {
                error!("upload writer failed: {e}");
                Err(ErrorKind::WriteFail)
            }
            _ => Err(ErrorKind::WriteFail),
        }
    }
}

impl Drop for UploadSink {
    fn drop(&mut self) {
        self.ring.close();
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

fn write_loop(
    ring: Arc<ByteRing>,
    file: File,
    stats: Arc<UploadStats>,
) -> std::io::Result<()> {
    let mut out = BufWriter::with_capacity(WRITE_CHUNK, file);
    let mut buf = vec![0u8; WRITE_CHUNK];
    let mut failure: Option<std::io::Error> = None;
    loop {
        match ring.pop(&mut buf, POP_WAIT) {
            Pop::Data(n) => {
                if failure.is_none() {
                    match out.write_all(&buf[..n]) {
                        Ok(()) => stats.add_write(n),
                        Err(e) => failure = Some(e),
                    }
                }
                // After a failure the ring is still drained so the
                // producer never blocks on a full ring.
            }
            Pop::Empty => {}
            Pop::Closed => break,
        }
    }
    if let Some(e) = failure {
        return Err(e);
    }
    out.flush()?;
    out.get_ref().sync_all()?;
    Ok(())
}

/// Resolve the upload target inside `dir_rel`, honoring the overwrite
/// flag. On success the old file, if any, is already unlinked.
fn resolve_target(
    overlay: &dyn FilesystemOverlay,
    dir_rel: &str,
    name: &str,
    overwrite: bool,
) -> ApiResult<PathBuf> {
    let rel = path::child(dir_rel, name)?;
    let full = path::to_fs_path(overlay.mount_point(), &rel);
    if let Ok(info) = overlay.stat(&full) {
        if info.is_dir {
            return Err(ErrorKind::IsDirectory);
        }
        if !overwrite {
            return Err(ErrorKind::FileExists);
        }
        overlay.unlink(&full).map_err(|_| ErrorKind::DeleteFail)?;
    }
    Ok(full)
}

fn read_chunk(
    body: &mut dyn Read,
    scratch: &mut [u8],
    remaining: &mut usize,
    stats: &UploadStats,
) -> ApiResult<usize> {
    let want = (*remaining).min(scratch.len());
    match body.read(&mut scratch[..want]) {
        Ok(n) if n > 0 => {
            *remaining -= n;
            stats.add_recv(n);
            stats.log(false);
            Ok(n)
        }
        Ok(_) => {
            warn!("request body ended {} bytes early", remaining);
            Err(ErrorKind::RecvFail)
        }
        Err(e) => {
            warn!("recv failed: {e}");
            Err(ErrorKind::RecvFail)
        }
    }
}

/// Raw upload: the whole request body is the file content.
pub fn run_raw(
    overlay: &dyn FilesystemOverlay,
    body: &mut dyn Read,
    content_len: usize,
    dir_rel: &str,
    name: &str,
    overwrite: bool,
) -> ApiResult<()> {
    if content_len == 0 {
        return Err(ErrorKind::NoBody);
    }
    let target = resolve_target(overlay, dir_rel, name, overwrite)?;
    let staging = Staging::new(overlay, &target);
    let file = overlay
        .open_write(staging.path())
        .map_err(|_| ErrorKind::OpenFail)?;
    let stats = Arc::new(UploadStats::new());
    let sink = UploadSink::start(file, Arc::clone(&stats))?;

    let mut scratch = vec![0u8; RECV_BUF_SIZE];
    let mut remaining = content_len;
    while remaining > 0 {
        let n = read_chunk(body, &mut scratch, &mut remaining, &stats)?;
        sink.push(&scratch[..n])?;
    }

    sink.finish()?;
    stats.log(true);
    staging.commit(&target)
}

/// Multipart upload: only the first `filename`-bearing part is taken;
/// its body runs until the `\r\n--<boundary>` delimiter.
pub fn run_multipart(
    overlay: &dyn FilesystemOverlay,
    body: &mut dyn Read,
    content_len: usize,
    dir_rel: &str,
    overwrite: bool,
    boundary: &str,
) -> ApiResult<()> {
    let marker = format!("\r\n--{boundary}").into_bytes();
    if marker.len() + 1 > TAIL_MAX {
        return Err(ErrorKind::BoundaryTooLong);
    }
    let stats = Arc::new(UploadStats::new());
    let mut scratch = vec![0u8; RECV_BUF_SIZE];
    let mut remaining = content_len;

    // Accumulate until the part header terminator shows up.
    let mut acc: Vec<u8> = Vec::new();
    let (header_end, mark_len) = loop {
        if remaining == 0 {
            return Err(ErrorKind::BadMultipart);
        }
        let n = read_chunk(body, &mut scratch, &mut remaining, &stats)?;
        acc.extend_from_slice(&scratch[..n]);
        if let Some(found) = find_header_end(&acc) {
            break found;
        }
        if acc.len() >= HEADER_MAX {
            return Err(ErrorKind::HeaderTooLarge);
        }
    };
    if header_end > HEADER_MAX {
        return Err(ErrorKind::HeaderTooLarge);
    }

    let filename = extract_filename(&acc[..header_end]).ok_or(ErrorKind::NoFilename)?;
    let name = path::sanitize_name(&filename)?;
    let target = resolve_target(overlay, dir_rel, &name, overwrite)?;
    let staging = Staging::new(overlay, &target);
    let file = overlay
        .open_write(staging.path())
        .map_err(|_| ErrorKind::OpenFail)?;
    let sink = UploadSink::start(file, Arc::clone(&stats))?;

    // Scan for the boundary, carrying marker_len - 1 trailing bytes so
    // a marker straddling two reads is still caught whole.
    let mut tail: Vec<u8> = Vec::with_capacity(TAIL_MAX);
    let mut pending: Vec<u8> = acc.split_off(header_end + mark_len);
    loop {
        let mut work = Vec::with_capacity(tail.len() + pending.len());
        work.extend_from_slice(&tail);
        work.extend_from_slice(&pending);
        if let Some(hit) = find_subsequence(&work, &marker) {
            sink.push(&work[..hit])?;
            break;
        }
        let keep = marker.len() - 1;
        if work.len() > keep {
            let split = work.len() - keep;
            sink.push(&work[..split])?;
            tail.clear();
            tail.extend_from_slice(&work[split..]);
        } else {
            tail = work;
        }
        if remaining == 0 {
            return Err(ErrorKind::BadMultipart);
        }
        let n = read_chunk(body, &mut scratch, &mut remaining, &stats)?;
        pending = scratch[..n].to_vec();
    }

    // Closing boundary and epilogue are received and discarded.
    while remaining > 0 {
        read_chunk(body, &mut scratch, &mut remaining, &stats)?;
    }

    sink.finish()?;
    stats.log(true);
    staging.commit(&target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::overlay::HostOverlay;
    use std::io::Cursor;
    use tempfile::tempdir;

    /// Reader splitting its input at fixed points, to pin down chunk
    /// boundaries the network would otherwise choose.
    struct SplitReader {
        parts: Vec<Vec<u8>>,
        at: usize,
    }

    impl SplitReader {
        fn new(parts: Vec<&[u8]>) -> Self {
            Self {
                parts: parts.into_iter().map(|p| p.to_vec()).collect(),
                at: 0,
            }
        }
    }

    impl Read for SplitReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.at >= self.parts.len() {
                return Ok(0);
            }
            let part = &self.parts[self.at];
            let n = part.len().min(buf.len());
            buf[..n].copy_from_slice(&part[..n]);
            if n == part.len() {
                self.at += 1;
            } else {
                self.parts[self.at] = part[n..].to_vec();
            }
            Ok(n)
        }
    }

    fn mounted_overlay() -> (tempfile::TempDir, HostOverlay) {
        let dir = tempdir().unwrap();
        let overlay = HostOverlay::new(dir.path().join("card"));
        overlay.mount().unwrap();
        (dir, overlay)
    }

    #[test]
    fn raw_round_trip() {
        let (_dir, overlay) = mounted_overlay();
        let body = b"HELLO\n";
        let mut reader = Cursor::new(&body[..]);
        run_raw(&overlay, &mut reader, body.len(), "/", "hello.txt", true).unwrap();
        let written = std::fs::read(overlay.mount_point().join("hello.txt")).unwrap();
        assert_eq!(written, body);
        assert!(!overlay.mount_point().join("hello.txt.part").exists());
    }

    #[test]
    fn raw_empty_body_refused() {
        let (_dir, overlay) = mounted_overlay();
        let mut reader = Cursor::new(&b""[..]);
        assert_eq!(
            run_raw(&overlay, &mut reader, 0, "/", "x", false),
            Err(ErrorKind::NoBody)
        );
    }

    #[test]
    fn raw_conflicts() {
        let (_dir, overlay) = mounted_overlay();
        std::fs::write(overlay.mount_point().join("a.bin"), b"old").unwrap();
        std::fs::create_dir(overlay.mount_point().join("d")).unwrap();

        let mut r = Cursor::new(&b"new"[..]);
        assert_eq!(
            run_raw(&overlay, &mut r, 3, "/", "a.bin", false),
            Err(ErrorKind::FileExists)
        );
        let mut r = Cursor::new(&b"new"[..]);
        assert_eq!(
            run_raw(&overlay, &mut r, 3, "/", "d", true),
            Err(ErrorKind::IsDirectory)
        );
        let mut r = Cursor::new(&b"new"[..]);
        run_raw(&overlay, &mut r, 3, "/", "a.bin", true).unwrap();
        assert_eq!(
            std::fs::read(overlay.mount_point().join("a.bin")).unwrap(),
            b"new"
        );
    }

    #[test]
    fn raw_truncated_body_leaves_no_files() {
        let (_dir, overlay) = mounted_overlay();
        let mut reader = Cursor::new(&b"short"[..]);
        assert_eq!(
            run_raw(&overlay, &mut reader, 100, "/", "t.bin", false),
            Err(ErrorKind::RecvFail)
        );
        assert!(!overlay.mount_point().join("t.bin").exists());
        assert!(!overlay.mount_point().join("t.bin.part").exists());
    }

    #[test]
    fn multipart_basic() {
        let (_dir, overlay) = mounted_overlay();
        let body: &[u8] = b"--BDY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\n\r\nAB\r\n--BDY--\r\n";
        let mut reader = Cursor::new(body);
        run_multipart(&overlay, &mut reader, body.len(), "/", false, "BDY").unwrap();
        assert_eq!(
            std::fs::read(overlay.mount_point().join("a.bin")).unwrap(),
            b"AB"
        );
    }

    #[test]
    fn multipart_boundary_straddles_reads() {
        let (_dir, overlay) = mounted_overlay();
        let head: &[u8] = b"--BDY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\n\r\nA";
        let rest: &[u8] = b"B\r\n--BDY--\r\n";
        let len = head.len() + rest.len();
        let mut reader = SplitReader::new(vec![head, rest]);
        run_multipart(&overlay, &mut reader, len, "/", false, "BDY").unwrap();
        assert_eq!(
            std::fs::read(overlay.mount_point().join("a.bin")).unwrap(),
            b"AB"
        );
    }

    #[test]
    fn multipart_marker_split_mid_dashes() {
        let (_dir, overlay) = mounted_overlay();
        let head: &[u8] = b"--BDY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"b.bin\"\r\n\r\npayload\r\n--B";
        let rest: &[u8] = b"DY--\r\n";
        let len = head.len() + rest.len();
        let mut reader = SplitReader::new(vec![head, rest]);
        run_multipart(&overlay, &mut reader, len, "/", false, "BDY").unwrap();
        assert_eq!(
            std::fs::read(overlay.mount_point().join("b.bin")).unwrap(),
            b"payload"
        );
    }

    #[test]
    fn multipart_empty_part() {
        let (_dir, overlay) = mounted_overlay();
        let body: &[u8] = b"--BDY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"e\"\r\n\r\n\r\n--BDY--\r\n";
        let mut reader = Cursor::new(body);
        run_multipart(&overlay, &mut reader, body.len(), "/", false, "BDY").unwrap();
        assert_eq!(
            std::fs::read(overlay.mount_point().join("e")).unwrap(),
            b""
        );
    }

    #[test]
    fn multipart_missing_filename() {
        let (_dir, overlay) = mounted_overlay();
        let body: &[u8] = b"--BDY\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\nAB\r\n--BDY--\r\n";
        let mut reader = Cursor::new(body);
        assert_eq!(
            run_multipart(&overlay, &mut reader, body.len(), "/", false, "BDY"),
            Err(ErrorKind::NoFilename)
        );
    }

    #[test]
    fn multipart_boundary_too_long() {
        let (_dir, overlay) = mounted_overlay();
        let boundary = "b".repeat(TAIL_MAX);
        let mut reader = Cursor::new(&b"irrelevant"[..]);
        assert_eq!(
            run_multipart(&overlay, &mut reader, 10, "/", false, &boundary),
            Err(ErrorKind::BoundaryTooLong)
        );
    }

    #[test]
    fn multipart_header_too_large() {
        let (_dir, overlay) = mounted_overlay();
        let mut body = Vec::new();
        body.extend_from_slice(b"--BDY\r\nContent-Disposition: form-data; name=\"file\"");
        body.resize(HEADER_MAX + 1024, b'x');
        let len = body.len();
        let mut reader = Cursor::new(body);
        assert_eq!(
            run_multipart(&overlay, &mut reader, len, "/", false, "BDY"),
            Err(ErrorKind::HeaderTooLarge)
        );
    }

    #[test]
    fn multipart_unterminated_is_rejected_and_staging_removed() {
        let (_dir, overlay) = mounted_overlay();
        let body: &[u8] = b"--BDY\r\nContent-Disposition: form-data; name=\"f\"; filename=\"c.bin\"\r\n\r\nno closing boundary here";
        let mut reader = Cursor::new(body);
        assert_eq!(
            run_multipart(&overlay, &mut reader, body.len(), "/", false, "BDY"),
            Err(ErrorKind::BadMultipart)
        );
        assert!(!overlay.mount_point().join("c.bin").exists());
        assert!(!overlay.mount_point().join("c.bin.part").exists());
    }

    #[test]
    fn large_raw_upload_preserves_byte_order() {
        let (_dir, overlay) = mounted_overlay();
        let mut body = vec![0u8; 3 * RECV_BUF_SIZE + 12345];
        for (i, b) in body.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let len = body.len();
        let mut reader = Cursor::new(body.clone());
        run_raw(&overlay, &mut reader, len, "/", "big.bin", false).unwrap();
        let written = std::fs::read(overlay.mount_point().join("big.bin")).unwrap();
        assert_eq!(written, body);
    }
}

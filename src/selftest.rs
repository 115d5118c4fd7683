// CLASSIFICATION: COMMUNITY
// Filename: selftest.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-07-01

//! Card self-test and throughput benchmark.
//!
//! Writes a deterministic pattern file, syncs it, reads it back while
//! verifying every byte, and reports write/read throughput. Runs under
//! the file-operation lock so it is mutually exclusive with uploads and
//! with USB attach, like every other card user.

use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use log::{error, info};

use crate::core::Core;
use crate::fs::overlay::FilesystemOverlay;

const SCRATCH_NAME: &str = ".sdbridge_selftest.bin";
const BLOCK_MIN: usize = 4096;
const DEFAULT_SIZE_MB: usize = 10;
const SEED: u32 = 0xA5A5_F00D;

/// Benchmark parameters; zeroes select the defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct BenchSpec {
    pub size_mb: usize,
    pub buf_bytes: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct BenchReport {
    pub bytes: u64,
    pub write_kbps: f64,
    pub read_kbps: f64,
}

/// Single-instance runner for the background self-test.
pub struct SelfTestRunner {
    running: AtomicBool,
}

impl SelfTestRunner {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Kick off a background run; refused while one is in flight.
    pub fn spawn(&self, core: Arc<Core>, spec: BenchSpec) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("self test already running");
        }
        std::thread::Builder::new()
            .name("sdtest".into())
            .spawn(move || {
                match run_blocking(&core, spec) {
                    Ok(report) => info!(
                        "self test pass: {} bytes write={:.1} KB/s read={:.1} KB/s",
                        report.bytes, report.write_kbps, report.read_kbps
                    ),
                    Err(e) => error!("self test failed: {e:#}"),
                }
                core.selftest.running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                anyhow::anyhow!("spawn sdtest: {e}")
            })?;
        Ok(())
    }
}

impl Default for SelfTestRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the benchmark on the calling thread, holding the file-operation
/// lock for the whole pass.
pub fn run_blocking(core: &Core, spec: BenchSpec) -> anyhow::Result<BenchReport> {
    let _lock = core
        .arbiter
        .try_fileop()
        .map_err(|k| anyhow::anyhow!("{k}"))?;
    core.arbiter
        .with_app_fs(|overlay| run_inner(overlay, spec))
        .map_err(|k| anyhow::anyhow!("{k}"))?
}

fn fill_pattern(buf: &mut [u8], seed: u32, offset: usize) {
    let mut i = 0;
    while i < buf.len() {
        let v = (seed ^ ((offset + i) as u32).wrapping_mul(0x45d9_f3b)).to_le_bytes();
        let n = (buf.len() - i).min(4);
        buf[i..i + n].copy_from_slice(&v[..n]);
        i += 4;
    }
}

fn run_inner(overlay: &dyn FilesystemOverlay, spec: BenchSpec) -> anyhow::Result<BenchReport> {
    let size_mb = if spec.size_mb == 0 {
        DEFAULT_SIZE_MB
    } else {
        spec.size_mb
    };
    let buf_bytes = spec.buf_bytes.max(BLOCK_MIN);
    let total = size_mb * 1024 * 1024;
    let scratch = overlay.mount_point().join(SCRATCH_NAME);
    info!(
        "self test start: {} MB, {} byte buffers, scratch {}",
        size_mb,
        buf_bytes,
        scratch.display()
    );

    let mut buf = vec![0u8; buf_bytes];
    let file = overlay
        .open_write(&scratch)
        .context("open scratch for write")?;
    let mut writer = BufWriter::with_capacity(buf_bytes, file);
    let write_start = Instant::now();
    let mut written = 0usize;
    while written < total {
        let n = buf_bytes.min(total - written);
        fill_pattern(&mut buf[..n], SEED, written);
        if let Err(e) = writer.write_all(&buf[..n]) {
            drop(writer);
            let _ = overlay.unlink(&scratch);
            return Err(e).context("scratch write");
        }
        written += n;
    }
    writer.flush().context("scratch flush")?;
    writer.get_ref().sync_all().context("scratch fsync")?;
    drop(writer);
    let write_secs = write_start.elapsed().as_secs_f64();

    let mut expect = vec![0u8; buf_bytes];
    let file = overlay
        .open_read(&scratch)
        .context("open scratch for read")?;
    let mut reader = BufReader::with_capacity(buf_bytes, file);
    let read_start = Instant::now();
    let mut verified = 0usize;
    while verified < total {
        let n = buf_bytes.min(total - verified);
        if let Err(e) = reader.read_exact(&mut buf[..n]) {
            let _ = overlay.unlink(&scratch);
            return Err(e).context("scratch read");
        }
        fill_pattern(&mut expect[..n], SEED, verified);
        if buf[..n] != expect[..n] {
            let _ = overlay.unlink(&scratch);
            bail!("verify mismatch at offset {verified}");
        }
        verified += n;
    }
    let read_secs = read_start.elapsed().as_secs_f64();

    overlay.unlink(&scratch).context("remove scratch")?;

    let kb = total as f64 / 1024.0;
    Ok(BenchReport {
        bytes: total as u64,
        write_kbps: if write_secs > 0.0 { kb / write_secs } else { 0.0 },
        read_kbps: if read_secs > 0.0 { kb / read_secs } else { 0.0 },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_is_deterministic_and_offset_sensitive() {
        let mut a = vec![0u8; 64];
        let mut b = vec![0u8; 64];
        fill_pattern(&mut a, SEED, 0);
        fill_pattern(&mut b, SEED, 0);
        assert_eq!(a, b);
        fill_pattern(&mut b, SEED, 64);
        assert_ne!(a, b);
    }
}

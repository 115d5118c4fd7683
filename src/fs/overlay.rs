// CLASSIFICATION: COMMUNITY
// Filename: overlay.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-06-23

//! Filesystem overlay over the card.
//!
//! This is the mount seam: when the arbiter grants the application side
//! the card, the FAT volume appears under a fixed mount point and all
//! file operations go through this trait. The hosted implementation
//! shadows a host directory so the daemon and the tests exercise the
//! same code paths as the device build.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

/// Stat result for one filesystem object.
#[derive(Debug, Clone, Copy)]
pub struct FileInfo {
    pub is_dir: bool,
    pub size: u64,
}

/// One directory listing row.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Mountable filesystem view of the card.
///
/// All paths are filesystem-absolute, already composed against
/// [`mount_point`](FilesystemOverlay::mount_point) by the path guard.
pub trait FilesystemOverlay: Send + Sync {
    fn mount(&self) -> anyhow::Result<()>;
    fn unmount(&self) -> anyhow::Result<()>;
    fn is_mounted(&self) -> bool;
    fn mount_point(&self) -> &Path;

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>>;
    fn stat(&self, path: &Path) -> io::Result<FileInfo>;
    fn open_read(&self, path: &Path) -> io::Result<File>;
    fn open_write(&self, path: &Path) -> io::Result<File>;
    fn unlink(&self, path: &Path) -> io::Result<()>;
    fn mkdir(&self, path: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// Host-directory overlay standing in for the FAT volume.
pub struct HostOverlay {
    root: PathBuf,
    mounted: AtomicBool,
}

impl HostOverlay {
    /// Shadow `root` as the card's filesystem. The directory is created
    /// on first mount when absent.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            mounted: AtomicBool::new(false),
        }
    }
}

impl FilesystemOverlay for HostOverlay {
    fn mount(&self) -> anyhow::Result<()> {
        if self.mounted.load(Ordering::SeqCst) {
            return Ok(());
        }
        fs::create_dir_all(&self.root)?;
        self.mounted.store(true, Ordering::SeqCst);
        info!("mounted {}", self.root.display());
        Ok(())
    }

    fn unmount(&self) -> anyhow::Result<()> {
        if !self.mounted.swap(false, Ordering::SeqCst) {
            warn!("unmount with nothing mounted");
        }
        info!("unmounted {}", self.root.display());
        Ok(())
    }

    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn mount_point(&self) -> &Path {
        &self.root
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let mut items = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            let name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(_) => continue,
            };
            items.push(DirEntryInfo {
                name,
                is_dir: meta.is_dir(),
                size: meta.len(),
            });
        }
        Ok(items)
    }

    fn stat(&self, path: &Path) -> io::Result<FileInfo> {
        let meta = fs::metadata(path)?;
        Ok(FileInfo {
            is_dir: meta.is_dir(),
            size: meta.len(),
        })
    }

    fn open_read(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }

    fn open_write(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn mkdir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

// CLASSIFICATION: COMMUNITY
// Filename: arbiter.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-06-26

//! Access-mode arbiter for the SD card.
//!
//! The card is either exposed to a USB host as a raw block device or
//! mounted for the application side, never both. The arbiter owns the
//! transition machinery and publishes the current mode as a single
//! atomic word so USB callbacks and HTTP handlers can consult it
//! without taking a lock.
//!
//! Lock order is fixed: transition lock, then the file-operation lock,
//! then the mount guard. The block-device lock sits below all three and
//! is only ever taken by the adapter.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::{error, info, warn};

use crate::error::ErrorKind;
use crate::fs::overlay::FilesystemOverlay;
use crate::usb::adapter::UsbBlockAdapter;
use crate::usb::UsbStack;

/// Published access mode of the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    /// USB host owns the card; the overlay is unmounted.
    UsbExposed = 0,
    /// Overlay mounted; file operations are allowed.
    AppMounted = 1,
    /// A transition is in flight.
    Transition = 2,
    /// A transition failed; explicit recovery required.
    Error = 3,
}

impl Mode {
    fn from_u8(v: u8) -> Mode {
        match v {
            0 => Mode::UsbExposed,
            1 => Mode::AppMounted,
            2 => Mode::Transition,
            _ => Mode::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::UsbExposed => "USB_EXPOSED",
            Mode::AppMounted => "APP_MOUNTED",
            Mode::Transition => "TRANSITION",
            Mode::Error => "ERROR",
        }
    }
}

/// Outcome of a refused or failed transition request.
#[derive(Debug)]
pub enum ArbiterError {
    /// A file operation is in progress; try again later.
    Busy,
    /// The card is already in the requested mode.
    AlreadyThere,
    /// The transition itself failed; mode is now [`Mode::Error`].
    Fatal(String),
}

impl std::fmt::Display for ArbiterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArbiterError::Busy => f.write_str("busy"),
            ArbiterError::AlreadyThere => f.write_str("already in requested mode"),
            ArbiterError::Fatal(e) => write!(f, "transition failed: {e}"),
        }
    }
}

impl std::error::Error for ArbiterError {}

/// Held for the duration of one mutating file operation.
pub struct FsOpGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Shared guard proving the overlay is mounted; USB attach serializes
/// behind all outstanding guards.
pub struct AppFsGuard<'a> {
    _read: std::sync::RwLockReadGuard<'a, ()>,
    overlay: &'a dyn FilesystemOverlay,
}

impl AppFsGuard<'_> {
    pub fn overlay(&self) -> &dyn FilesystemOverlay {
        self.overlay
    }
}

pub struct SdArbiter {
    mode: AtomicU8,
    transition: Mutex<()>,
    fileop: Mutex<()>,
    mount_guard: RwLock<()>,
    overlay: Arc<dyn FilesystemOverlay>,
    usb: Arc<dyn UsbStack>,
    adapter: Arc<UsbBlockAdapter>,
    idle_timeout_ms: AtomicU64,
}

impl SdArbiter {
    /// Build the arbiter in the transitional state; the caller performs
    /// the initial transition via [`try_request`](Self::try_request).
    pub fn new(
        overlay: Arc<dyn FilesystemOverlay>,
        usb: Arc<dyn UsbStack>,
        adapter: Arc<UsbBlockAdapter>,
    ) -> Self {
        Self {
            mode: AtomicU8::new(Mode::Transition as u8),
            transition: Mutex::new(()),
            fileop: Mutex::new(()),
            mount_guard: RwLock::new(()),
            overlay,
            usb,
            adapter,
            idle_timeout_ms: AtomicU64::new(0),
        }
    }

    /// Constant-time mode read, safe from any context.
    pub fn current_mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Acquire))
    }

    fn publish(&self, mode: Mode) {
        self.mode.store(mode as u8, Ordering::Release);
        info!("mode -> {}", mode.as_str());
    }

    /// Try to take the file-operation lock without blocking.
    pub fn try_fileop(&self) -> Result<FsOpGuard<'_>, ErrorKind> {
        match self.fileop.try_lock() {
            Ok(guard) => Ok(FsOpGuard { _guard: guard }),
            Err(_) => Err(ErrorKind::FileopInProgress),
        }
    }

    /// Whether a file operation currently holds the lock.
    pub fn fileop_busy(&self) -> bool {
        self.fileop.try_lock().is_err()
    }

    /// Acquire a shared guard under which the overlay is mounted and
    /// stays mounted. Attach requests block behind outstanding guards.
    pub fn app_fs(&self) -> Result<AppFsGuard<'_>, ErrorKind> {
        let read = self.mount_guard.read().unwrap();
        match self.current_mode() {
            Mode::AppMounted => Ok(AppFsGuard {
                _read: read,
                overlay: self.overlay.as_ref(),
            }),
            Mode::UsbExposed => Err(ErrorKind::Busy),
            Mode::Transition | Mode::Error => Err(ErrorKind::NotMounted),
        }
    }

    /// Run `f` with the overlay guaranteed mounted for its whole
    /// duration.
    pub fn with_app_fs<R>(
        &self,
        f: impl FnOnce(&dyn FilesystemOverlay) -> R,
    ) -> Result<R, ErrorKind> {
        let guard = self.app_fs()?;
        Ok(f(guard.overlay()))
    }

    /// Request a transition to `target`, atomically or not at all.
    ///
    /// Transitions are never retried internally; a failure parks the
    /// arbiter in [`Mode::Error`] until the next explicit request.
    pub fn try_request(&self, target: Mode) -> Result<Mode, ArbiterError> {
        let _t = self.transition.lock().unwrap();
        let current = self.current_mode();
        if current == target {
            return Err(ArbiterError::AlreadyThere);
        }
        match target {
            Mode::UsbExposed => {
                let Ok(_op) = self.fileop.try_lock() else {
                    warn!("attach refused: file operation in progress");
                    return Err(ArbiterError::Busy);
                };
                let _mount = self.mount_guard.write().unwrap();
                self.publish(Mode::Transition);
                if let Err(e) = self.expose_usb() {
                    error!("attach failed: {e:#}");
                    self.publish(Mode::Error);
                    return Err(ArbiterError::Fatal(e.to_string()));
                }
                self.publish(Mode::UsbExposed);
            }
            Mode::AppMounted => {
                let Ok(_op) = self.fileop.try_lock() else {
                    warn!("detach refused: file operation in progress");
                    return Err(ArbiterError::Busy);
                };
                self.publish(Mode::Transition);
                if let Err(e) = self.mount_app() {
                    error!("detach failed: {e:#}");
                    self.publish(Mode::Error);
                    return Err(ArbiterError::Fatal(e.to_string()));
                }
                self.publish(Mode::AppMounted);
            }
            Mode::Transition | Mode::Error => {
                return Err(ArbiterError::Fatal(format!(
                    "{} is not a requestable mode",
                    target.as_str()
                )));
            }
        }
        Ok(target)
    }

    fn expose_usb(&self) -> anyhow::Result<()> {
        self.overlay.unmount()?;
        self.adapter.on_attach();
        self.usb.start()?;
        Ok(())
    }

    fn mount_app(&self) -> anyhow::Result<()> {
        self.usb.stop()?;
        self.adapter
            .on_detach()
            .map_err(|e| anyhow::anyhow!("cache writeback: {e}"))?;
        self.overlay.mount()?;
        Ok(())
    }

    /// Milliseconds since the last USB data command.
    pub fn usb_idle_ms(&self) -> u64 {
        self.adapter.idle_ms()
    }

    /// Idle threshold after which the front-ends may auto-detach;
    /// zero disables the check.
    pub fn idle_timeout_ms(&self) -> u64 {
        self.idle_timeout_ms.load(Ordering::Relaxed)
    }

    pub fn set_idle_timeout_ms(&self, ms: u64) {
        self.idle_timeout_ms.store(ms, Ordering::Relaxed);
    }

    /// Whether the USB side has been idle past the configured timeout.
    pub fn usb_idle_expired(&self) -> bool {
        let timeout = self.idle_timeout_ms();
        timeout > 0 && self.current_mode() == Mode::UsbExposed && self.usb_idle_ms() >= timeout
    }
}

// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-06-22

//! USB device stack seam.
//!
//! The real transport (controller bring-up, descriptors, endpoint
//! plumbing) lives behind [`UsbStack`]; the adapter in this module tree
//! only supplies the SCSI command behavior. The hosted build ships a
//! stub stack that records state so the control plane and the tests can
//! run without hardware.

pub mod adapter;
pub mod scsi;

use std::sync::atomic::{AtomicBool, Ordering};

use log::info;

/// Start/stop control over the USB mass-storage function.
pub trait UsbStack: Send + Sync {
    /// Bring the device function up and expose the unit to the host.
    fn start(&self) -> anyhow::Result<()>;

    /// Tear the device function down.
    fn stop(&self) -> anyhow::Result<()>;

    /// Whether a host currently has the function configured.
    fn connected(&self) -> bool;
}

/// Hosted stand-in for the device controller.
#[derive(Default)]
pub struct StubUsbStack {
    started: AtomicBool,
}

impl StubUsbStack {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsbStack for StubUsbStack {
    fn start(&self) -> anyhow::Result<()> {
        self.started.store(true, Ordering::SeqCst);
        info!("usb stack started");
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        self.started.store(false, Ordering::SeqCst);
        info!("usb stack stopped");
        Ok(())
    }

    fn connected(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

// CLASSIFICATION: COMMUNITY
// Filename: core.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-01

//! Process-wide core value.
//!
//! All bridge state lives here and is threaded through the request
//! handlers; there are no mutable globals. Construction wires the block
//! device, the overlay, and the USB stack into the arbiter and performs
//! the initial transition configured for boot.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use log::{info, warn};

use crate::arbiter::{ArbiterError, Mode, SdArbiter};
use crate::block::BlockDevice;
use crate::config::Config;
use crate::fs::overlay::FilesystemOverlay;
use crate::selftest::SelfTestRunner;
use crate::usb::adapter::UsbBlockAdapter;
use crate::usb::UsbStack;

pub struct Core {
    pub arbiter: Arc<SdArbiter>,
    pub adapter: Arc<UsbBlockAdapter>,
    pub usb: Arc<dyn UsbStack>,
    pub overlay: Arc<dyn FilesystemOverlay>,
    pub selftest: SelfTestRunner,
    pub config: Config,
}

impl Core {
    /// Wire the collaborators together and enter the configured boot
    /// mode.
    pub fn boot(
        config: Config,
        device: Box<dyn BlockDevice>,
        overlay: Arc<dyn FilesystemOverlay>,
        usb: Arc<dyn UsbStack>,
    ) -> anyhow::Result<Arc<Core>> {
        let adapter = Arc::new(UsbBlockAdapter::new(device));
        let arbiter = Arc::new(SdArbiter::new(
            Arc::clone(&overlay),
            Arc::clone(&usb),
            Arc::clone(&adapter),
        ));
        arbiter.set_idle_timeout_ms(config.usb_idle_timeout_ms);

        let initial = if config.usb_on_boot {
            Mode::UsbExposed
        } else {
            Mode::AppMounted
        };
        arbiter
            .try_request(initial)
            .map_err(|e| anyhow::anyhow!(e.to_string()))
            .with_context(|| format!("boot transition to {}", initial.as_str()))?;
        info!("core up in {}", arbiter.current_mode().as_str());

        Ok(Arc::new(Core {
            arbiter,
            adapter,
            usb,
            overlay,
            selftest: SelfTestRunner::new(),
            config,
        }))
    }

    /// Background check that hands an idle USB session back to the app
    /// side, honoring the configured timeout. Does nothing when the
    /// timeout is zero.
    pub fn spawn_idle_watchdog(self: Arc<Self>) -> JoinHandle<()> {
        let core = self;
        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_secs(1));
            if !core.arbiter.usb_idle_expired() {
                continue;
            }
            info!(
                "usb idle for {} ms, detaching",
                core.arbiter.usb_idle_ms()
            );
            match core.arbiter.try_request(Mode::AppMounted) {
                Ok(_) | Err(ArbiterError::AlreadyThere) => {}
                Err(e) => warn!("idle detach failed: {e}"),
            }
        })
    }
}

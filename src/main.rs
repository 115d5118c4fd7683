// CLASSIFICATION: COMMUNITY
// Filename: main.rs v0.4
// Date Modified: 2026-07-03
// Author: Lukas Bower

//! Entry point for the sdbridged daemon.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::info;

use sdbridge::block::FileBlockDevice;
use sdbridge::config::ConfigStore;
use sdbridge::core::Core;
use sdbridge::fs::overlay::HostOverlay;
use sdbridge::selftest::{self, BenchSpec};
use sdbridge::usb::StubUsbStack;
use sdbridge::web::WebServer;

/// Default image size when a new card image must be created: 64 MiB.
const DEFAULT_IMAGE_SECTORS: u32 = 64 * 2048;

#[derive(Parser)]
#[command(name = "sdbridged", about = "Networked SD-card bridge daemon")]
struct Args {
    /// Configuration file.
    #[arg(long, default_value = "sdbridge.json")]
    config: PathBuf,

    /// Card image backing the block device.
    #[arg(long, default_value = "card.img")]
    image: PathBuf,

    /// Directory shadowed as the card filesystem.
    #[arg(long, default_value = "card")]
    root: PathBuf,

    /// Override the configured HTTP port.
    #[arg(long)]
    port: Option<u16>,

    /// Run a write/read benchmark of this many MiB at boot.
    #[arg(long)]
    bench_mb: Option<usize>,
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let store = ConfigStore::new(args.config.clone());
    let mut config = store.load();
    if let Some(port) = args.port {
        config.web_port = port;
    }
    let bench = args.bench_mb;
    let bench_requested = bench.is_some();
    let mut boot_config = config.clone();
    if bench_requested {
        // The benchmark needs the overlay mounted.
        boot_config.usb_on_boot = false;
    }

    let device = Box::new(FileBlockDevice::open(&args.image, DEFAULT_IMAGE_SECTORS)?);
    let overlay = Arc::new(HostOverlay::new(args.root.clone()));
    let usb = Arc::new(StubUsbStack::new());

    let core = Core::boot(boot_config, device, overlay, usb)?;

    if let Some(size_mb) = bench {
        let report = selftest::run_blocking(
            &core,
            BenchSpec {
                size_mb,
                buf_bytes: 0,
            },
        )?;
        info!(
            "bench: {} bytes write={:.1} KB/s read={:.1} KB/s",
            report.bytes, report.write_kbps, report.read_kbps
        );
    }

    Arc::clone(&core).spawn_idle_watchdog();

    let server = WebServer::bind(Arc::clone(&core), config.web_port)?;
    info!(
        "sdbridge up: port={} mode={}",
        server.port(),
        core.arbiter.current_mode().as_str()
    );
    server.join();
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

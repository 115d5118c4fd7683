// CLASSIFICATION: COMMUNITY
// Filename: usb_session.rs v0.3
// Date Modified: 2026-07-05
// Author: Lukas Bower

//! SCSI session behavior of the block adapter: cache coherence across
//! partial and aligned transfers, sense reporting, media lifecycle.

use std::sync::Arc;

use sdbridge::arbiter::Mode;
use sdbridge::block::{MemBlockDevice, SECTOR_SIZE};
use sdbridge::config::Config;
use sdbridge::core::Core;
use sdbridge::fs::overlay::HostOverlay;
use sdbridge::usb::StubUsbStack;
use tempfile::{tempdir, TempDir};

struct TestEnv {
    _dir: TempDir,
    core: Arc<Core>,
}

fn attach() -> TestEnv {
    let dir = tempdir().unwrap();
    let core = Core::boot(
        Config::default(),
        Box::new(MemBlockDevice::new(256)),
        Arc::new(HostOverlay::new(dir.path().join("card"))),
        Arc::new(StubUsbStack::new()),
    )
    .unwrap();
    // Clear the attach unit attention so data commands run clean.
    let _ = core.adapter.test_unit_ready();
    core.adapter.test_unit_ready().unwrap();
    TestEnv { _dir: dir, core }
}

#[test]
fn inquiry_identity_is_fixed_width() {
    let env = attach();
    let (vendor, product, rev) = env.core.adapter.inquiry();
    assert_eq!(&vendor, b"SDBRIDGE");
    assert!(product.starts_with(b"SD CARD BRIDGE"));
    assert_eq!(product.len(), 16);
    assert_eq!(&rev, b"0.3 ");
}

#[test]
fn capacity_reports_device_geometry() {
    let env = attach();
    let (count, size) = env.core.adapter.read_capacity().unwrap();
    assert_eq!(count, 256);
    assert_eq!(size as usize, SECTOR_SIZE);
    assert_eq!(
        env.core.adapter.read_format_capacities().unwrap(),
        (256, SECTOR_SIZE as u16)
    );
}

#[test]
fn partial_write_is_visible_to_full_read() {
    let env = attach();
    let adapter = &env.core.adapter;

    // Seed the sector with prior content first.
    let seed = vec![0x55u8; SECTOR_SIZE];
    adapter.write10(100, 0, &seed).unwrap();

    let pattern = [0xAAu8; 5];
    adapter.write10(100, 10, &pattern).unwrap();

    let mut out = vec![0u8; SECTOR_SIZE];
    adapter.read10(100, 0, &mut out).unwrap();
    assert_eq!(&out[10..15], &pattern);
    assert!(out[..10].iter().all(|&b| b == 0x55));
    assert!(out[15..].iter().all(|&b| b == 0x55));
}

#[test]
fn interleaved_partial_writes_round_trip_exactly() {
    let env = attach();
    let adapter = &env.core.adapter;

    adapter.write10(7, 0, &[0x11u8; 16]).unwrap();
    adapter.write10(7, 200, &[0x22u8; 16]).unwrap();
    adapter.write10(8, 4, &[0x33u8; 16]).unwrap();
    adapter.write10(7, 496, &[0x44u8; 16]).unwrap();

    let mut out = vec![0u8; SECTOR_SIZE];
    adapter.read10(7, 0, &mut out).unwrap();
    assert_eq!(&out[0..16], &[0x11u8; 16]);
    assert_eq!(&out[200..216], &[0x22u8; 16]);
    assert_eq!(&out[496..512], &[0x44u8; 16]);

    let mut part = vec![0u8; 16];
    adapter.read10(8, 4, &mut part).unwrap();
    assert_eq!(part, vec![0x33u8; 16]);
}

#[test]
fn aligned_write_read_back_over_several_sectors() {
    let env = attach();
    let adapter = &env.core.adapter;

    let mut data = vec![0u8; SECTOR_SIZE * 4];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (i % 256) as u8;
    }
    adapter.write10(40, 0, &data).unwrap();

    let mut out = vec![0u8; SECTOR_SIZE * 4];
    adapter.read10(40, 0, &mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn synchronize_cache_and_removal_succeed() {
    let env = attach();
    env.core.adapter.write10(3, 9, &[0xEEu8; 3]).unwrap();
    env.core.adapter.synchronize_cache().unwrap();
    env.core.adapter.prevent_allow_removal().unwrap();
}

#[test]
fn dirty_sector_survives_detach_attach() {
    let env = attach();
    env.core.adapter.write10(12, 30, &[0x77u8; 6]).unwrap();

    // Detach flushes and invalidates; the next session must observe the
    // bytes from the medium itself.
    env.core.arbiter.try_request(Mode::AppMounted).unwrap();
    env.core.arbiter.try_request(Mode::UsbExposed).unwrap();
    let _ = env.core.adapter.test_unit_ready();

    let mut out = vec![0u8; SECTOR_SIZE];
    env.core.adapter.read10(12, 0, &mut out).unwrap();
    assert_eq!(&out[30..36], &[0x77u8; 6]);
}

#[test]
fn media_absent_after_detach() {
    let env = attach();
    env.core.arbiter.try_request(Mode::AppMounted).unwrap();

    assert!(!env.core.adapter.media_present());
    let err = env.core.adapter.test_unit_ready().unwrap_err();
    assert_eq!(err.key, 0x02);
    assert_eq!((err.asc, err.ascq), (0x3A, 0x00));

    let mut out = vec![0u8; SECTOR_SIZE];
    let err = env.core.adapter.read10(0, 0, &mut out).unwrap_err();
    assert_eq!(err.key, 0x02);
    let err = env.core.adapter.read_capacity().unwrap_err();
    assert_eq!((err.asc, err.ascq), (0x3A, 0x00));
}

#[test]
fn read_failure_reports_medium_error_sense() {
    let env = attach();
    let mut out = vec![0u8; SECTOR_SIZE];
    // Past the end of the 256-sector device.
    let err = env.core.adapter.read10(1000, 0, &mut out).unwrap_err();
    assert_eq!(err.key, 0x03);
    assert_eq!((err.asc, err.ascq), (0x11, 0x00));

    let err = env.core.adapter.write10(1000, 0, &out).unwrap_err();
    assert_eq!(err.key, 0x03);
    assert_eq!((err.asc, err.ascq), (0x03, 0x00));
}

#[test]
fn unknown_opcode_sets_illegal_request() {
    let env = attach();
    let sense = env.core.adapter.scsi_command(&[0xC7, 0, 0, 0]).unwrap_err();
    assert_eq!(sense.key, 0x05);
    assert_eq!((sense.asc, sense.ascq), (0x20, 0x00));

    // RequestSense reports it once, then the condition is clear.
    assert_eq!(env.core.adapter.take_sense(), Some(sense));
    assert_eq!(env.core.adapter.take_sense(), None);

    // Removal prevention routes through the same generic entry.
    env.core.adapter.scsi_command(&[0x1E, 0, 0, 0, 0, 0]).unwrap();
}

#[test]
fn start_stop_echoes_requested_state() {
    let env = attach();
    assert!(env.core.adapter.start_stop(true, false));
    assert!(!env.core.adapter.start_stop(false, true));
}

#[test]
fn mode_sense_stubs_report_length_only() {
    let env = attach();
    assert_eq!(env.core.adapter.mode_sense6(), [3, 0, 0, 0]);
    assert_eq!(env.core.adapter.mode_sense10(), [0, 6, 0, 0, 0, 0, 0, 0]);
}

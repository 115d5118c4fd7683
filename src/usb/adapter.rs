// CLASSIFICATION: COMMUNITY
// Filename: adapter.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-06-25

//! USB mass-storage block adapter.
//!
//! Implements the SCSI command subset the host driver issues, on top of
//! the block device and the sector cache. Commands execute on the USB
//! stack's own context: they take the block-device lock and nothing
//! else, never panic, and report every refusal through sense data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, error};

use crate::block::cache::SectorCache;
use crate::block::{BlockDevice, BlockError};
use crate::usb::scsi::{self, asc, sense_key};

/// Fixed-format sense triple reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sense {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl Sense {
    fn new(key: u8, pair: (u8, u8)) -> Self {
        Self {
            key,
            asc: pair.0,
            ascq: pair.1,
        }
    }
}

struct CardIo {
    device: Box<dyn BlockDevice>,
    cache: SectorCache,
    sense: Option<Sense>,
    unit_attention: bool,
    media_present: bool,
}

impl CardIo {
    fn refuse(&mut self, key: u8, pair: (u8, u8)) -> Sense {
        let s = Sense::new(key, pair);
        self.sense = Some(s);
        s
    }
}

/// SCSI/MSC block adapter over the shared card.
pub struct UsbBlockAdapter {
    io: Mutex<CardIo>,
    last_activity_ms: AtomicU64,
    epoch: Instant,
}

impl UsbBlockAdapter {
    pub fn new(device: Box<dyn BlockDevice>) -> Self {
        let sector_size = device.sector_size() as usize;
        Self {
            io: Mutex::new(CardIo {
                device,
                cache: SectorCache::new(sector_size),
                sense: None,
                unit_attention: false,
                media_present: false,
            }),
            last_activity_ms: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_activity_ms.store(now, Ordering::Relaxed);
    }

    /// Milliseconds since the last Read10/Write10, measured from boot.
    pub fn idle_ms(&self) -> u64 {
        let now = self.epoch.elapsed().as_millis() as u64;
        now.saturating_sub(self.last_activity_ms.load(Ordering::Relaxed))
    }

    /// Bring the medium online for a new USB session.
    ///
    /// The cache starts empty and a unit attention is armed so the first
    /// TestUnitReady of the session reports the media change.
    pub fn on_attach(&self) {
        let mut io = self.io.lock().unwrap();
        io.cache.reset();
        io.sense = None;
        io.unit_attention = true;
        io.media_present = true;
        self.touch();
        debug!("adapter online: unit attention armed");
    }

    /// Take the medium offline, writing back any dirty sector.
    pub fn on_detach(&self) -> Result<(), BlockError> {
        let mut io = self.io.lock().unwrap();
        let io = &mut *io;
        let flushed = io.cache.invalidate(&mut *io.device);
        io.media_present = false;
        io.unit_attention = false;
        if let Err(e) = flushed {
            error!("detach flush failed: {e}");
            return Err(e);
        }
        Ok(())
    }

    pub fn media_present(&self) -> bool {
        self.io.lock().unwrap().media_present
    }

    /// Peek at the pending sense without clearing it.
    pub fn sense(&self) -> Option<Sense> {
        self.io.lock().unwrap().sense
    }

    /// RequestSense semantics: report and clear.
    pub fn take_sense(&self) -> Option<Sense> {
        self.io.lock().unwrap().sense.take()
    }

    /// Fixed identity strings, space padded to field width.
    pub fn inquiry(&self) -> ([u8; 8], [u8; 16], [u8; 4]) {
        (
            scsi::pad_field::<8>(scsi::INQUIRY_VENDOR),
            scsi::pad_field::<16>(scsi::INQUIRY_PRODUCT),
            scsi::pad_field::<4>(scsi::INQUIRY_REVISION),
        )
    }

    /// Ready check. Reports the armed unit attention exactly once per
    /// attach, then clears it.
    pub fn test_unit_ready(&self) -> Result<(), Sense> {
        let mut io = self.io.lock().unwrap();
        if !io.media_present {
            return Err(io.refuse(sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT));
        }
        if io.unit_attention {
            io.unit_attention = false;
            return Err(io.refuse(sense_key::UNIT_ATTENTION, asc::MEDIUM_CHANGED));
        }
        Ok(())
    }

    /// `(block_count, block_size)` of the exposed unit.
    pub fn read_capacity(&self) -> Result<(u32, u16), Sense> {
        let mut io = self.io.lock().unwrap();
        if !io.media_present {
            return Err(io.refuse(sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT));
        }
        Ok((io.device.sector_count(), io.device.sector_size()))
    }

    /// ReadFormatCapacities reports the same single descriptor.
    pub fn read_format_capacities(&self) -> Result<(u32, u16), Sense> {
        self.read_capacity()
    }

    pub fn read10(&self, lba: u32, offset: usize, buf: &mut [u8]) -> Result<usize, Sense> {
        self.touch();
        let mut io = self.io.lock().unwrap();
        if !io.media_present {
            return Err(io.refuse(sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT));
        }
        let CardIo { device, cache, .. } = &mut *io;
        match cache.read(&mut **device, lba, offset, buf) {
            Ok(()) => Ok(buf.len()),
            Err(e) => {
                error!("READ10 failed lba={lba} off={offset} len={} err={e}", buf.len());
                Err(io.refuse(sense_key::MEDIUM_ERROR, asc::UNRECOVERED_READ))
            }
        }
    }

    pub fn write10(&self, lba: u32, offset: usize, buf: &[u8]) -> Result<usize, Sense> {
        self.touch();
        let mut io = self.io.lock().unwrap();
        if !io.media_present {
            return Err(io.refuse(sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT));
        }
        let CardIo { device, cache, .. } = &mut *io;
        match cache.write(&mut **device, lba, offset, buf) {
            Ok(()) => Ok(buf.len()),
            Err(e) => {
                error!("WRITE10 failed lba={lba} off={offset} len={} err={e}", buf.len());
                Err(io.refuse(sense_key::MEDIUM_ERROR, asc::WRITE_FAULT))
            }
        }
    }

    /// Flush the write-back cache to the medium.
    pub fn synchronize_cache(&self) -> Result<(), Sense> {
        let mut io = self.io.lock().unwrap();
        if !io.media_present {
            return Ok(());
        }
        let CardIo { device, cache, .. } = &mut *io;
        match cache.flush(&mut **device) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("cache flush failed: {e}");
                Err(io.refuse(sense_key::MEDIUM_ERROR, asc::WRITE_FAULT))
            }
        }
    }

    /// The host toggles removal prevention around sessions; the card
    /// cannot be ejected, so this only flushes.
    pub fn prevent_allow_removal(&self) -> Result<(), Sense> {
        self.synchronize_cache()
    }

    /// StartStopUnit is a noop; the requested start state is echoed.
    pub fn start_stop(&self, start: bool, _load_eject: bool) -> bool {
        start
    }

    /// Minimal ModeSense(6): mode data length only, no pages.
    pub fn mode_sense6(&self) -> [u8; 4] {
        [3, 0, 0, 0]
    }

    /// Minimal ModeSense(10).
    pub fn mode_sense10(&self) -> [u8; 8] {
        [0, 6, 0, 0, 0, 0, 0, 0]
    }

    /// Fallthrough for opcodes outside the supported subset.
    pub fn unknown_command(&self, op: u8) -> Sense {
        debug!("unsupported SCSI opcode {op:#04x}");
        let mut io = self.io.lock().unwrap();
        io.refuse(sense_key::ILLEGAL_REQUEST, asc::INVALID_COMMAND)
    }

    /// Generic command entry for CDBs the stack does not route to a
    /// dedicated callback.
    pub fn scsi_command(&self, cdb: &[u8]) -> Result<(), Sense> {
        match cdb.first().copied() {
            Some(scsi::opcode::PREVENT_ALLOW_MEDIUM_REMOVAL) => self.prevent_allow_removal(),
            Some(scsi::opcode::SYNCHRONIZE_CACHE_10) => self.synchronize_cache(),
            Some(op) => Err(self.unknown_command(op)),
            None => Err(self.unknown_command(0)),
        }
    }
}

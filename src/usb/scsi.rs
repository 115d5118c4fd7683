// CLASSIFICATION: COMMUNITY
// Filename: scsi.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-06-22

//! SCSI constants for the mass-storage command subset.

/// Operation codes the host driver issues.
pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const INQUIRY: u8 = 0x12;
    pub const MODE_SENSE_6: u8 = 0x1A;
    pub const START_STOP_UNIT: u8 = 0x1B;
    pub const PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;
    pub const READ_FORMAT_CAPACITIES: u8 = 0x23;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const SYNCHRONIZE_CACHE_10: u8 = 0x35;
    pub const MODE_SENSE_10: u8 = 0x5A;
    pub const WRITE_10: u8 = 0x2A;
}

/// Sense key values.
pub mod sense_key {
    pub const NO_SENSE: u8 = 0x00;
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const UNIT_ATTENTION: u8 = 0x06;
}

/// Additional sense code pairs `(asc, ascq)`.
pub mod asc {
    /// Write fault.
    pub const WRITE_FAULT: (u8, u8) = (0x03, 0x00);
    /// Unrecovered read error.
    pub const UNRECOVERED_READ: (u8, u8) = (0x11, 0x00);
    /// Invalid command operation code.
    pub const INVALID_COMMAND: (u8, u8) = (0x20, 0x00);
    /// Not-ready-to-ready change, medium may have changed.
    pub const MEDIUM_CHANGED: (u8, u8) = (0x28, 0x00);
    /// Medium not present.
    pub const MEDIUM_NOT_PRESENT: (u8, u8) = (0x3A, 0x00);
}

/// Fixed inquiry identity. Vendor is 8 bytes, product 16, revision 4,
/// space padded on the wire.
pub const INQUIRY_VENDOR: &str = "SDBRIDGE";
pub const INQUIRY_PRODUCT: &str = "SD CARD BRIDGE";
pub const INQUIRY_REVISION: &str = "0.3";

/// Space-pad `src` into a fixed-width identity field.
pub fn pad_field<const N: usize>(src: &str) -> [u8; N] {
    let mut out = [b' '; N];
    let bytes = src.as_bytes();
    let n = bytes.len().min(N);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

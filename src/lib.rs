// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.6
// Date Modified: 2026-07-03
// Author: Lukas Bower

//! Root library for the sdbridge control plane.
//!
//! One SD card, two masters: a USB host that wants a raw block device,
//! and a browser that wants files over HTTP. The arbiter guarantees the
//! card belongs to exactly one of them at any moment.

/// Access-mode arbiter and the file-operation lock
pub mod arbiter;

/// Block device abstraction and the sector cache
pub mod block;

/// Persisted device configuration
pub mod config;

/// Process-wide core value wiring the collaborators together
pub mod core;

/// Tagged API error kinds
pub mod error;

/// Filesystem overlay and path guard
pub mod fs;

/// Card self-test and throughput benchmark
pub mod selftest;

/// USB mass-storage stack seam and SCSI block adapter
pub mod usb;

/// HTTP front-end: routing, handlers, upload pipeline
pub mod web;

//! Kernel wire protocol: ABI structs, version drift, dirent packing.
//!
//! Frames on the device are native-layout C structs, little-endian. Inbound
//! frames start with `fuse_in_header`, outbound with `fuse_out_header`; the
//! per-opcode bodies follow. Reply struct sizes depend on the negotiated
//! minor version, which [`Protocol`] tracks.

pub mod abi;
pub mod dirent;
mod version;

pub use dirent::{file_type, DirentBuffer};
pub use version::Protocol;

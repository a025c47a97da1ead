//! Negotiated protocol version and the struct-size drift across 7.x minors.
//!
//! Several reply structs grew over the life of the protocol. The kernel
//! expects the size that matches the *negotiated* minor, not the newest one,
//! so every encode consults this table.

use super::abi;

/// A (major, minor) protocol pair. Immutable once negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol {
    pub major: u32,
    pub minor: u32,
}

impl Protocol {
    /// The highest version the library itself speaks.
    pub const LIBRARY: Protocol = Protocol {
        major: abi::KERNEL_VERSION,
        minor: abi::KERNEL_MINOR_VERSION,
    };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Attributes gained `blksize` + padding in 7.9.
    pub fn has_attr_blksize(&self) -> bool {
        self.minor >= 9
    }

    /// Size of `fuse_entry_out` on the wire for this version.
    pub fn entry_out_size(&self) -> usize {
        if self.has_attr_blksize() {
            abi::FUSE_ENTRY_OUT_SIZE
        } else {
            abi::FUSE_ENTRY_OUT_SIZE - 8
        }
    }

    /// Size of `fuse_attr_out` on the wire for this version.
    pub fn attr_out_size(&self) -> usize {
        if self.has_attr_blksize() {
            abi::FUSE_ATTR_OUT_SIZE
        } else {
            abi::FUSE_ATTR_OUT_SIZE - 8
        }
    }

    /// Size of `fuse_init_out` on the wire: 8 bytes before 7.5, 24 bytes
    /// before 7.23, the full struct afterwards.
    pub fn init_out_size(&self) -> usize {
        if self.minor < 5 {
            8
        } else if self.minor < 23 {
            24
        } else {
            abi::FUSE_INIT_OUT_SIZE
        }
    }

    /// Size of the fixed READ body: grew past fh/offset/size/flags in 7.9.
    pub fn read_in_size(&self) -> usize {
        if self.minor >= 9 {
            40
        } else {
            abi::FUSE_COMPAT_READ_IN_SIZE
        }
    }

    /// Size of the fixed WRITE body, same 7.9 boundary.
    pub fn write_in_size(&self) -> usize {
        if self.minor >= 9 {
            abi::FUSE_WRITE_IN_SIZE
        } else {
            abi::FUSE_COMPAT_WRITE_IN_SIZE
        }
    }

    /// MKNOD gained umask in 7.12.
    pub fn mknod_in_size(&self) -> usize {
        if self.minor >= 12 {
            16
        } else {
            abi::FUSE_COMPAT_MKNOD_IN_SIZE
        }
    }

    /// CREATE gained its own body (flags/mode/umask) in 7.12; before that the
    /// kernel sent an open-in-shaped body whose second word held the mode.
    pub fn has_create_in(&self) -> bool {
        self.minor >= 12
    }
}

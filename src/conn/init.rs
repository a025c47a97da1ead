//! Protocol negotiation with the kernel.
//!
//! The first frame on a fresh connection is always Init. The library
//! advertises the highest version it speaks; whichever side is older wins,
//! component-wise. Feature flags are the intersection of what the kernel
//! offers and what the library (as configured) enables.

use crate::protocol::abi::{self, fuse_init_in, fuse_init_out};
use crate::protocol::Protocol;
use crate::server::MountOptions;

/// Flags the library itself understands and is willing to enable.
const LIBRARY_FLAGS: u32 = abi::FUSE_ASYNC_READ
    | abi::FUSE_ATOMIC_O_TRUNC
    | abi::FUSE_BIG_WRITES
    | abi::FUSE_PARALLEL_DIROPS
    | abi::FUSE_WRITEBACK_CACHE;

/// The outcome of a successful handshake. Immutable for the connection's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Negotiated {
    pub proto: Protocol,
    pub flags: u32,
    pub max_readahead: u32,
    pub max_write: u32,
}

/// Negotiate against the kernel's Init. `Err` carries the errno to refuse
/// the handshake with.
pub(crate) fn negotiate(init: &fuse_init_in, opts: &MountOptions) -> Result<Negotiated, i32> {
    // Whichever side is older wins, component-wise. A kernel whose major
    // predates ours has no common dialect: EPROTO and tear down.
    if init.major < abi::KERNEL_VERSION {
        return Err(libc::EPROTO);
    }

    let proto = Protocol::new(
        init.major.min(abi::KERNEL_VERSION),
        init.minor.min(abi::KERNEL_MINOR_VERSION),
    );

    let mut enabled = LIBRARY_FLAGS;
    if opts.disable_writeback_caching {
        enabled &= !abi::FUSE_WRITEBACK_CACHE;
    }

    Ok(Negotiated {
        proto,
        flags: init.flags & enabled,
        max_readahead: init.max_readahead.min(opts.max_readahead),
        max_write: opts.max_write,
    })
}

/// Build the init reply body, sized for the negotiated minor.
pub(crate) fn init_out(n: &Negotiated, opts: &MountOptions) -> (fuse_init_out, usize) {
    let out = fuse_init_out {
        major: n.proto.major,
        minor: n.proto.minor,
        max_readahead: n.max_readahead,
        flags: n.flags,
        max_background: opts.max_background,
        congestion_threshold: opts.congestion_threshold,
        max_write: n.max_write,
        time_gran: abi::DEFAULT_TIME_GRAN,
        max_pages: 0,
        map_alignment: 0,
        unused: [0; 8],
    };
    (out, n.proto.init_out_size())
}

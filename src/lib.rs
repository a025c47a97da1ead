//! Userspace library for the kernel side of FUSE.
//!
//! `fuse-dev` owns the binary conversation with the kernel's FUSE character
//! device: it decodes request frames, dispatches them to a user-supplied
//! [`Filesystem`] on a worker pool, and encodes bit-exact replies across the
//! 7.x protocol range. Path resolution, caching and access control stay in
//! the kernel; the library speaks only in inode and handle numbers.
//!
//! - **Protocol**: kernel ABI structs, opcodes, version-dependent sizes
//! - **Connection**: single reader, in-flight tracking, interrupt-driven
//!   cancellation, direct replies from handler tasks
//! - **Server**: per-op handler tasks over a blocking pool
//! - **Mount**: a narrow boundary consuming an already-mounted descriptor
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use fuse_dev::{Filesystem, Mount, MountOptions, Server};
//!
//! struct HelloFs;
//! impl Filesystem for HelloFs {
//!     // implement the ops your filesystem supports; the rest answer ENOSYS
//! }
//!
//! // `mount` came from the platform mount helper (fd + unmount hook)
//! let server = Server::with_options(HelloFs, MountOptions::new().fs_name("hellofs"));
//! server.serve(mount).await?;
//! ```
//!
//! How the descriptor is obtained is platform glue behind the
//! [`mount::Mounter`] trait; tests drive the library through a socketpair
//! standing in for the device.

pub mod buffer;
pub mod conn;
pub mod error;
pub mod mount;
pub mod ops;
pub mod protocol;
pub mod server;

pub use conn::{Connection, OpContext, OpRequest};
pub use error::{Error, OpResult};
pub use mount::{DeviceChannel, Mount, Mounter};
pub use ops::{
    Attr, AttrChanges, AttrReply, Entry, Op, Reply, RequestHeader, SetTime, Statfs, XattrOut,
};
pub use protocol::{file_type, DirentBuffer, Protocol};
pub use server::{Filesystem, MountOptions, Server};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::ops::{Attr, AttrChanges, AttrReply, Entry, Op, Reply, Statfs, XattrOut};
    pub use crate::protocol::{file_type, DirentBuffer};
    pub use crate::server::{Filesystem, MountOptions, Server};
    pub use crate::{Mount, OpContext, OpResult};
}

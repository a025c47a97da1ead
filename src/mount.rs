//! The mount boundary.
//!
//! How a FUSE file descriptor is obtained is platform glue that lives outside
//! this crate: a `fusermount` helper on Linux, a mount(2) dance elsewhere.
//! Whatever performs it hands the library a [`Mount`]: the device channel
//! plus a hook that undoes the mount. The library only ever reads and writes
//! the descriptor.

use crate::server::MountOptions;
use std::io::{self, IoSlice};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::path::Path;
use std::sync::Arc;

/// The FUSE character device.
///
/// Reads yield exactly one request frame each (the kernel never splits or
/// coalesces messages); writes must supply one complete reply frame. Any
/// thread may write; reading is restricted to the connection's single reader.
pub struct DeviceChannel {
    fd: OwnedFd,
}

impl DeviceChannel {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Read the next frame into `buf`. Returns `Ok(0)` at end-of-stream
    /// (device closed or filesystem unmounted). EINTR is retried.
    pub(crate) fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(self.fd.as_raw_fd(), buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                // The kernel reports an unmounted filesystem as ENODEV.
                Err(nix::errno::Errno::ENODEV) => return Ok(0),
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    /// Write one complete frame with a single gathered syscall.
    pub(crate) fn send(&self, slices: &[IoSlice<'_>]) -> io::Result<usize> {
        loop {
            match nix::sys::uio::writev(self.fd.as_fd(), slices) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

/// A mounted filesystem: the device channel plus the unmount hook.
///
/// Dropping the mount runs the hook; [`Mount::unmount`] does so explicitly.
pub struct Mount {
    channel: Arc<DeviceChannel>,
    on_unmount: Option<Box<dyn FnOnce() + Send>>,
}

impl Mount {
    /// Couple a device channel with an unmount hook.
    pub fn new(channel: DeviceChannel, on_unmount: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            channel: Arc::new(channel),
            on_unmount: Some(on_unmount),
        }
    }

    /// A mount with no unmount hook; used when the caller manages the mount
    /// lifetime itself (and by tests speaking through a socketpair).
    pub fn from_channel(channel: DeviceChannel) -> Self {
        Self {
            channel: Arc::new(channel),
            on_unmount: None,
        }
    }

    pub(crate) fn channel(&self) -> Arc<DeviceChannel> {
        Arc::clone(&self.channel)
    }

    /// Undo the mount now instead of at drop time.
    pub fn unmount(mut self) {
        if let Some(hook) = self.on_unmount.take() {
            hook();
        }
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        if let Some(hook) = self.on_unmount.take() {
            hook();
        }
    }
}

/// Platform glue that performs the mount and yields the device.
///
/// Implementations invoke `fusermount`/`mount(2)` with the fields of
/// [`MountOptions`] that belong in the mount string (`fs_name`, `subtype`,
/// `volume_name`, read-only).
pub trait Mounter {
    fn mount(&self, target: &Path, options: &MountOptions) -> io::Result<Mount>;
}

//! Mount configuration.

use crate::protocol::abi::{DEFAULT_CONGESTION_THRESHOLD, DEFAULT_MAX_BACKGROUND};

/// Default largest write payload the kernel is told to send, which also
/// sizes request buffers.
const DEFAULT_MAX_WRITE: u32 = 128 * 1024;

/// Default readahead granted to the kernel.
const DEFAULT_MAX_READAHEAD: u32 = 128 * 1024;

/// Options for a mounted filesystem.
///
/// The mount-string fields (`fs_name`, `subtype`, `volume_name`, read-only)
/// are consumed by the platform [`Mounter`](crate::mount::Mounter); the rest
/// shape the init handshake and the dispatcher. Decode failures and
/// unexpected opcodes are reported as `tracing` events under the
/// `fuse_dev::conn` target.
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Advertise the filesystem as read-only; mutating ops are rejected with
    /// EROFS before dispatch.
    pub read_only: bool,

    /// Clear the writeback-caching init flag. With writeback caching on, the
    /// kernel buffers writes and the pid on some ops is unavailable.
    pub disable_writeback_caching: bool,

    /// Request-pipelining depth hint passed to the kernel.
    pub max_background: u16,

    /// Outstanding-request count at which the kernel considers the
    /// connection congested.
    pub congestion_threshold: u16,

    /// Largest readahead the kernel may use.
    pub max_readahead: u32,

    /// Largest write payload the kernel may send; bounds buffer sizes and
    /// reply payloads.
    pub max_write: u32,

    /// Filesystem name shown in the mount table.
    pub fs_name: String,

    /// Mount subtype (`fuse.<subtype>`).
    pub subtype: String,

    /// Volume name (used by platforms that surface one).
    pub volume_name: String,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            disable_writeback_caching: false,
            max_background: DEFAULT_MAX_BACKGROUND,
            congestion_threshold: DEFAULT_CONGESTION_THRESHOLD,
            max_readahead: DEFAULT_MAX_READAHEAD,
            max_write: DEFAULT_MAX_WRITE,
            fs_name: String::new(),
            subtype: String::new(),
            volume_name: String::new(),
        }
    }
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn disable_writeback_caching(mut self, value: bool) -> Self {
        self.disable_writeback_caching = value;
        self
    }

    pub fn max_background(mut self, value: u16) -> Self {
        self.max_background = value;
        self
    }

    pub fn congestion_threshold(mut self, value: u16) -> Self {
        self.congestion_threshold = value;
        self
    }

    pub fn max_readahead(mut self, value: u32) -> Self {
        self.max_readahead = value;
        self
    }

    pub fn max_write(mut self, value: u32) -> Self {
        self.max_write = value;
        self
    }

    pub fn fs_name(mut self, value: impl Into<String>) -> Self {
        self.fs_name = value.into();
        self
    }

    pub fn subtype(mut self, value: impl Into<String>) -> Self {
        self.subtype = value.into();
        self
    }

    pub fn volume_name(mut self, value: impl Into<String>) -> Self {
        self.volume_name = value.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = MountOptions::default();
        assert!(!opts.read_only);
        assert_eq!(opts.max_background, 12);
        assert_eq!(opts.congestion_threshold, 9);
        assert_eq!(opts.max_write, 128 * 1024);
    }

    #[test]
    fn test_builder_pattern() {
        let opts = MountOptions::new()
            .read_only(true)
            .max_write(64 * 1024)
            .fs_name("testfs");

        assert!(opts.read_only);
        assert_eq!(opts.max_write, 64 * 1024);
        assert_eq!(opts.fs_name, "testfs");
    }
}

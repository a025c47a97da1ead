//! Kernel wire structures for the FUSE character device.
//!
//! Every request the kernel writes and every reply we send is the byte image
//! of one of these C structs, little-endian, with the padding the kernel
//! headers spell out. The structs carry their padding as explicit fields so
//! that the bincode fixed-int little-endian image equals the C image exactly;
//! nothing here relies on `repr(C)` layout.
//!
//! Struct sizes changed across 7.x minors. The full (newest supported)
//! layouts live here; [`super::Protocol`](super::version::Protocol) knows the
//! compat sizes and the codec truncates or narrows accordingly.

#![allow(non_camel_case_types)]

use serde::{Deserialize, Serialize};

/// Highest protocol version this library speaks.
pub const KERNEL_VERSION: u32 = 7;
pub const KERNEL_MINOR_VERSION: u32 = 31;

pub const DEFAULT_MAX_BACKGROUND: u16 = 12;
pub const DEFAULT_CONGESTION_THRESHOLD: u16 = DEFAULT_MAX_BACKGROUND * 3 / 4;
pub const DEFAULT_TIME_GRAN: u32 = 1;

// Bitmasks for fuse_setattr_in.valid
pub const FATTR_MODE: u32 = 1 << 0;
pub const FATTR_UID: u32 = 1 << 1;
pub const FATTR_GID: u32 = 1 << 2;
pub const FATTR_SIZE: u32 = 1 << 3;
pub const FATTR_ATIME: u32 = 1 << 4;
pub const FATTR_MTIME: u32 = 1 << 5;
pub const FATTR_FH: u32 = 1 << 6;
pub const FATTR_ATIME_NOW: u32 = 1 << 7;
pub const FATTR_MTIME_NOW: u32 = 1 << 8;
pub const FATTR_LOCKOWNER: u32 = 1 << 9;
pub const FATTR_CTIME: u32 = 1 << 10;

// Init request/reply flags
/// asynchronous read requests
pub const FUSE_ASYNC_READ: u32 = 1 << 0;
/// handles the O_TRUNC open flag in the filesystem
pub const FUSE_ATOMIC_O_TRUNC: u32 = 1 << 3;
/// filesystem can handle write size larger than 4kB
pub const FUSE_BIG_WRITES: u32 = 1 << 5;
/// don't apply umask to file mode on create operations
pub const FUSE_DONT_MASK: u32 = 1 << 6;
/// automatically invalidate cached pages
pub const FUSE_AUTO_INVAL_DATA: u32 = 1 << 12;
/// asynchronous direct I/O submission
pub const FUSE_ASYNC_DIO: u32 = 1 << 15;
/// use writeback cache for buffered writes
pub const FUSE_WRITEBACK_CACHE: u32 = 1 << 16;
/// allow parallel lookups and readdir
pub const FUSE_PARALLEL_DIROPS: u32 = 1 << 18;
/// init_out.max_pages contains the max number of req pages
pub const FUSE_MAX_PAGES: u32 = 1 << 22;

// Getattr flags
pub const FUSE_GETATTR_FH: u32 = 1 << 0;

// Release flags
pub const FUSE_RELEASE_FLUSH: u32 = 1 << 0;

// Fsync flags
pub const FUSE_FSYNC_FDATASYNC: u32 = 1 << 0;

/// Opcodes the library recognizes. Anything else decodes to the unknown-op
/// variant and is answered ENOSYS without reaching user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    Lookup = 1,
    Forget = 2, // no reply
    Getattr = 3,
    Setattr = 4,
    Readlink = 5,
    Symlink = 6,
    Mknod = 8,
    Mkdir = 9,
    Unlink = 10,
    Rmdir = 11,
    Rename = 12,
    Link = 13,
    Open = 14,
    Read = 15,
    Write = 16,
    Statfs = 17,
    Release = 18,
    Fsync = 20,
    Setxattr = 21,
    Getxattr = 22,
    Listxattr = 23,
    Removexattr = 24,
    Flush = 25,
    Init = 26,
    Opendir = 27,
    Readdir = 28,
    Releasedir = 29,
    Fsyncdir = 30,
    Access = 34,
    Create = 35,
    Interrupt = 36, // no reply
    Destroy = 38,
    BatchForget = 42, // no reply
    Fallocate = 43,
}

impl Opcode {
    pub fn from_u32(n: u32) -> Option<Self> {
        Some(match n {
            1 => Opcode::Lookup,
            2 => Opcode::Forget,
            3 => Opcode::Getattr,
            4 => Opcode::Setattr,
            5 => Opcode::Readlink,
            6 => Opcode::Symlink,
            8 => Opcode::Mknod,
            9 => Opcode::Mkdir,
            10 => Opcode::Unlink,
            11 => Opcode::Rmdir,
            12 => Opcode::Rename,
            13 => Opcode::Link,
            14 => Opcode::Open,
            15 => Opcode::Read,
            16 => Opcode::Write,
            17 => Opcode::Statfs,
            18 => Opcode::Release,
            20 => Opcode::Fsync,
            21 => Opcode::Setxattr,
            22 => Opcode::Getxattr,
            23 => Opcode::Listxattr,
            24 => Opcode::Removexattr,
            25 => Opcode::Flush,
            26 => Opcode::Init,
            27 => Opcode::Opendir,
            28 => Opcode::Readdir,
            29 => Opcode::Releasedir,
            30 => Opcode::Fsyncdir,
            34 => Opcode::Access,
            35 => Opcode::Create,
            36 => Opcode::Interrupt,
            38 => Opcode::Destroy,
            42 => Opcode::BatchForget,
            43 => Opcode::Fallocate,
            _ => return None,
        })
    }
}

pub const FUSE_IN_HEADER_SIZE: usize = 40;

/// Fixed prefix on every inbound frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_in_header {
    pub len: u32,
    pub opcode: u32,
    pub unique: u64,
    pub nodeid: u64,
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
    pub padding: u32,
}

pub const FUSE_OUT_HEADER_SIZE: usize = 16;

/// Fixed prefix on every outbound frame. `error` is a negated errno, zero on
/// success; `len` covers the whole frame including this header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_out_header {
    pub len: u32,
    pub error: i32,
    pub unique: u64,
}

/// Attributes as the kernel stores them (Linux layout).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct fuse_attr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub atimensec: u32,
    pub mtimensec: u32,
    pub ctimensec: u32,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
    pub padding: u32,
}

pub const FUSE_ENTRY_OUT_SIZE: usize = 128;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct fuse_entry_out {
    pub nodeid: u64,
    pub generation: u64,
    pub entry_valid: u64,
    pub attr_valid: u64,
    pub entry_valid_nsec: u32,
    pub attr_valid_nsec: u32,
    pub attr: fuse_attr,
}

pub const FUSE_ATTR_OUT_SIZE: usize = 104;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct fuse_attr_out {
    pub attr_valid: u64,
    pub attr_valid_nsec: u32,
    pub dummy: u32,
    pub attr: fuse_attr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_forget_in {
    pub nlookup: u64,
}

pub const FUSE_FORGET_ONE_SIZE: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_forget_one {
    pub nodeid: u64,
    pub nlookup: u64,
}

pub const FUSE_BATCH_FORGET_IN_SIZE: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_batch_forget_in {
    pub count: u32,
    pub dummy: u32,
}

/// Body of GETATTR since 7.9; older kernels send an empty body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct fuse_getattr_in {
    pub getattr_flags: u32,
    pub dummy: u32,
    pub fh: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct fuse_setattr_in {
    pub valid: u32,
    pub padding: u32,
    pub fh: u64,
    pub size: u64,
    pub lock_owner: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub atimensec: u32,
    pub mtimensec: u32,
    pub ctimensec: u32,
    pub mode: u32,
    pub unused4: u32,
    pub uid: u32,
    pub gid: u32,
    pub unused5: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_mknod_in {
    pub mode: u32,
    pub rdev: u32,
    pub umask: u32,
    pub padding: u32,
}

/// Pre-7.12 MKNOD body: mode and rdev only.
pub const FUSE_COMPAT_MKNOD_IN_SIZE: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_mkdir_in {
    pub mode: u32,
    pub umask: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_rename_in {
    pub newdir: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_link_in {
    pub oldnodeid: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_open_in {
    pub flags: u32,
    pub unused: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_create_in {
    pub flags: u32,
    pub mode: u32,
    pub umask: u32,
    pub padding: u32,
}

pub const FUSE_OPEN_OUT_SIZE: usize = 16;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct fuse_open_out {
    pub fh: u64,
    pub open_flags: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_release_in {
    pub fh: u64,
    pub flags: u32,
    pub release_flags: u32,
    pub lock_owner: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_flush_in {
    pub fh: u64,
    pub unused: u32,
    pub padding: u32,
    pub lock_owner: u64,
}

/// Body of READ since 7.9; the pre-7.9 body stops after `read_flags`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_read_in {
    pub fh: u64,
    pub offset: u64,
    pub size: u32,
    pub read_flags: u32,
    pub lock_owner: u64,
    pub flags: u32,
    pub padding: u32,
}

pub const FUSE_COMPAT_READ_IN_SIZE: usize = 24;

/// Body of WRITE since 7.9; the pre-7.9 body stops after `write_flags`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_write_in {
    pub fh: u64,
    pub offset: u64,
    pub size: u32,
    pub write_flags: u32,
    pub lock_owner: u64,
    pub flags: u32,
    pub padding: u32,
}

pub const FUSE_WRITE_IN_SIZE: usize = 40;
pub const FUSE_COMPAT_WRITE_IN_SIZE: usize = 24;

pub const FUSE_WRITE_OUT_SIZE: usize = 8;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct fuse_write_out {
    pub size: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct fuse_kstatfs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
    pub padding: u32,
    pub spare: [u32; 6],
}

pub const FUSE_STATFS_OUT_SIZE: usize = 80;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct fuse_statfs_out {
    pub st: fuse_kstatfs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_fsync_in {
    pub fh: u64,
    pub fsync_flags: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_setxattr_in {
    pub size: u32,
    pub flags: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_getxattr_in {
    pub size: u32,
    pub padding: u32,
}

pub const FUSE_GETXATTR_OUT_SIZE: usize = 8;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct fuse_getxattr_out {
    pub size: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_access_in {
    pub mask: u32,
    pub padding: u32,
}

pub const FUSE_INIT_IN_SIZE: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_init_in {
    pub major: u32,
    pub minor: u32,
    pub max_readahead: u32,
    pub flags: u32,
}

pub const FUSE_INIT_OUT_SIZE: usize = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct fuse_init_out {
    pub major: u32,
    pub minor: u32,
    pub max_readahead: u32,
    pub flags: u32,
    pub max_background: u16,
    pub congestion_threshold: u16,
    pub max_write: u32,
    pub time_gran: u32,
    pub max_pages: u16,
    pub map_alignment: u16,
    pub unused: [u32; 8],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_interrupt_in {
    pub unique: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_fallocate_in {
    pub fh: u64,
    pub offset: u64,
    pub length: u64,
    pub mode: u32,
    pub padding: u32,
}

pub const FUSE_DIRENT_SIZE: usize = 24;

/// Fixed part of a directory record; followed by the name, padded with NULs
/// to an 8-byte boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct fuse_dirent {
    pub ino: u64,
    pub off: u64,
    pub namelen: u32,
    pub r#type: u32,
}

/// Serialize a wire struct into its exact byte image.
pub fn to_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    // Top-level bincode is fixed-int little-endian, which for these
    // padding-explicit structs is the C image byte for byte.
    bincode::serialize(value).expect("wire struct serialization cannot fail")
}

/// Deserialize a wire struct from the front of `bytes`. Trailing bytes are
/// permitted (variable-length ops carry names/data after the fixed part).
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Option<T> {
    bincode::deserialize(bytes).ok()
}

/// Compile-time-ish guards that the serialized images have the kernel sizes.
#[cfg(test)]
mod tests {
    use super::*;

    fn size_of_image<T: Serialize + Default>() -> usize {
        to_bytes(&T::default()).len()
    }

    #[test]
    fn test_header_sizes() {
        let hdr = fuse_in_header {
            len: 0,
            opcode: 0,
            unique: 0,
            nodeid: 0,
            uid: 0,
            gid: 0,
            pid: 0,
            padding: 0,
        };
        assert_eq!(to_bytes(&hdr).len(), FUSE_IN_HEADER_SIZE);

        let hdr = fuse_out_header {
            len: 0,
            error: 0,
            unique: 0,
        };
        assert_eq!(to_bytes(&hdr).len(), FUSE_OUT_HEADER_SIZE);
    }

    #[test]
    fn test_out_struct_sizes() {
        assert_eq!(size_of_image::<fuse_entry_out>(), FUSE_ENTRY_OUT_SIZE);
        assert_eq!(size_of_image::<fuse_attr_out>(), FUSE_ATTR_OUT_SIZE);
        assert_eq!(size_of_image::<fuse_open_out>(), FUSE_OPEN_OUT_SIZE);
        assert_eq!(size_of_image::<fuse_write_out>(), FUSE_WRITE_OUT_SIZE);
        assert_eq!(size_of_image::<fuse_statfs_out>(), FUSE_STATFS_OUT_SIZE);
        assert_eq!(size_of_image::<fuse_init_out>(), FUSE_INIT_OUT_SIZE);
        assert_eq!(size_of_image::<fuse_getxattr_out>(), FUSE_GETXATTR_OUT_SIZE);
    }

    #[test]
    fn test_in_struct_sizes() {
        let init = fuse_init_in {
            major: 7,
            minor: 31,
            max_readahead: 0,
            flags: 0,
        };
        assert_eq!(to_bytes(&init).len(), FUSE_INIT_IN_SIZE);

        let write = fuse_write_in {
            fh: 0,
            offset: 0,
            size: 0,
            write_flags: 0,
            lock_owner: 0,
            flags: 0,
            padding: 0,
        };
        assert_eq!(to_bytes(&write).len(), FUSE_WRITE_IN_SIZE);
    }

    #[test]
    fn test_little_endian_layout() {
        let out = fuse_out_header {
            len: 0x11223344,
            error: -2,
            unique: 0x8877665544332211,
        };
        let bytes = to_bytes(&out);
        assert_eq!(&bytes[0..4], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&bytes[8..16], &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
    }

    #[test]
    fn test_from_bytes_allows_trailing() {
        let mut bytes = to_bytes(&fuse_rename_in { newdir: 7 });
        bytes.extend_from_slice(b"old\0new\0");
        let parsed: fuse_rename_in = from_bytes(&bytes).unwrap();
        assert_eq!(parsed.newdir, 7);
    }

    #[test]
    fn test_opcode_round_trip() {
        assert_eq!(Opcode::from_u32(26), Some(Opcode::Init));
        assert_eq!(Opcode::from_u32(36), Some(Opcode::Interrupt));
        assert_eq!(Opcode::from_u32(255), None);
    }
}

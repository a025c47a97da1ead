//! The closed set of kernel operations and their replies.
//!
//! Each [`Op`] variant carries the decoded in-fields of one request; the
//! handler produces a [`Reply`] variant carrying the out-fields. The encoder
//! enforces that the reply variant matches the opcode, so an op's reply
//! contract is checkable in one place.

mod decode;
mod encode;

pub(crate) use decode::decode_body;
pub(crate) use encode::{encode_error, encode_reply};

use crate::protocol::abi::Opcode;
use std::ffi::OsString;
use std::time::Duration;

/// Attributes of a filesystem object, as reported to the kernel.
///
/// Times are seconds/nanoseconds since the epoch, matching the wire layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime_secs: u64,
    pub atime_nsecs: u32,
    pub mtime_secs: u64,
    pub mtime_nsecs: u32,
    pub ctime_secs: u64,
    pub ctime_nsecs: u32,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

impl Attr {
    /// Attributes for the given inode with everything else zeroed except a
    /// link count of one and a conventional block size.
    pub fn new(ino: u64) -> Self {
        Self {
            ino,
            nlink: 1,
            blksize: 4096,
            ..Default::default()
        }
    }
}

/// A child entry returned by lookup and the directory-mutating ops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub child: u64,
    pub generation: u64,
    pub attr: Attr,
    /// How long the kernel may cache the attributes.
    pub attr_ttl: Duration,
    /// How long the kernel may cache the name -> inode binding.
    pub entry_ttl: Duration,
}

/// Attributes plus their cache lifetime, for GetAttr/SetAttr replies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrReply {
    pub attr: Attr,
    pub ttl: Duration,
}

/// Filesystem statistics for StatFs replies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statfs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// A time to set in SetAttr: an explicit instant or "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetTime {
    Now,
    At { secs: u64, nsecs: u32 },
}

/// The attribute changes requested by a SetAttr op. Absent fields are left
/// untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrChanges {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SetTime>,
    pub mtime: Option<SetTime>,
    pub ctime: Option<(u64, u32)>,
    /// Present when the change came through an open file (ftruncate).
    pub handle: Option<u64>,
}

/// Reply to a GetXattr/ListXattr op.
///
/// When the request's size field is zero the kernel is probing for the value
/// length; otherwise it wants the bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum XattrOut {
    Size(u32),
    Data(Vec<u8>),
}

/// A decoded kernel request.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    LookUp {
        parent: u64,
        name: OsString,
    },
    /// No reply is ever written for Forget.
    Forget {
        inode: u64,
        nlookup: u64,
    },
    /// A batched Forget; `(inode, nlookup)` pairs. No reply.
    BatchForget {
        entries: Vec<(u64, u64)>,
    },
    GetAttr {
        inode: u64,
        handle: Option<u64>,
    },
    SetAttr {
        inode: u64,
        changes: AttrChanges,
    },
    MkDir {
        parent: u64,
        name: OsString,
        mode: u32,
    },
    MkNod {
        parent: u64,
        name: OsString,
        mode: u32,
        rdev: u32,
    },
    Create {
        parent: u64,
        name: OsString,
        mode: u32,
        flags: u32,
    },
    Symlink {
        parent: u64,
        name: OsString,
        target: OsString,
    },
    Link {
        inode: u64,
        new_parent: u64,
        new_name: OsString,
    },
    Rename {
        old_parent: u64,
        old_name: OsString,
        new_parent: u64,
        new_name: OsString,
    },
    Unlink {
        parent: u64,
        name: OsString,
    },
    RmDir {
        parent: u64,
        name: OsString,
    },
    OpenFile {
        inode: u64,
        flags: u32,
    },
    OpenDir {
        inode: u64,
        flags: u32,
    },
    ReadFile {
        inode: u64,
        handle: u64,
        offset: u64,
        size: u32,
    },
    ReadDir {
        inode: u64,
        handle: u64,
        offset: u64,
        size: u32,
    },
    WriteFile {
        inode: u64,
        handle: u64,
        offset: u64,
        data: Vec<u8>,
    },
    Flush {
        inode: u64,
        handle: u64,
        lock_owner: u64,
    },
    ReleaseFile {
        inode: u64,
        handle: u64,
        flags: u32,
    },
    ReleaseDir {
        inode: u64,
        handle: u64,
        flags: u32,
    },
    Fsync {
        inode: u64,
        handle: u64,
        datasync: bool,
    },
    FsyncDir {
        inode: u64,
        handle: u64,
        datasync: bool,
    },
    ReadSymlink {
        inode: u64,
    },
    StatFs {
        inode: u64,
    },
    GetXattr {
        inode: u64,
        name: OsString,
        size: u32,
    },
    ListXattr {
        inode: u64,
        size: u32,
    },
    SetXattr {
        inode: u64,
        name: OsString,
        value: Vec<u8>,
        flags: u32,
    },
    RemoveXattr {
        inode: u64,
        name: OsString,
    },
    Fallocate {
        inode: u64,
        handle: u64,
        offset: u64,
        length: u64,
        mode: u32,
    },
    Access {
        inode: u64,
        mask: u32,
    },
    /// An opcode outside the closed set; answered ENOSYS without reaching
    /// user code.
    Unknown {
        opcode: u32,
    },
}

impl Op {
    /// The operation name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Op::LookUp { .. } => "lookup",
            Op::Forget { .. } => "forget",
            Op::BatchForget { .. } => "batch_forget",
            Op::GetAttr { .. } => "getattr",
            Op::SetAttr { .. } => "setattr",
            Op::MkDir { .. } => "mkdir",
            Op::MkNod { .. } => "mknod",
            Op::Create { .. } => "create",
            Op::Symlink { .. } => "symlink",
            Op::Link { .. } => "link",
            Op::Rename { .. } => "rename",
            Op::Unlink { .. } => "unlink",
            Op::RmDir { .. } => "rmdir",
            Op::OpenFile { .. } => "open",
            Op::OpenDir { .. } => "opendir",
            Op::ReadFile { .. } => "read",
            Op::ReadDir { .. } => "readdir",
            Op::WriteFile { .. } => "write",
            Op::Flush { .. } => "flush",
            Op::ReleaseFile { .. } => "release",
            Op::ReleaseDir { .. } => "releasedir",
            Op::Fsync { .. } => "fsync",
            Op::FsyncDir { .. } => "fsyncdir",
            Op::ReadSymlink { .. } => "readlink",
            Op::StatFs { .. } => "statfs",
            Op::GetXattr { .. } => "getxattr",
            Op::ListXattr { .. } => "listxattr",
            Op::SetXattr { .. } => "setxattr",
            Op::RemoveXattr { .. } => "removexattr",
            Op::Fallocate { .. } => "fallocate",
            Op::Access { .. } => "access",
            Op::Unknown { .. } => "unknown",
        }
    }

    /// Ops that never get a reply frame.
    pub fn is_no_reply(&self) -> bool {
        matches!(self, Op::Forget { .. } | Op::BatchForget { .. })
    }

    /// Ops that modify the filesystem; rejected with EROFS on read-only
    /// mounts before dispatch.
    pub fn mutates(&self) -> bool {
        matches!(
            self,
            Op::SetAttr { .. }
                | Op::MkDir { .. }
                | Op::MkNod { .. }
                | Op::Create { .. }
                | Op::Symlink { .. }
                | Op::Link { .. }
                | Op::Rename { .. }
                | Op::Unlink { .. }
                | Op::RmDir { .. }
                | Op::WriteFile { .. }
                | Op::Fallocate { .. }
                | Op::SetXattr { .. }
                | Op::RemoveXattr { .. }
        )
    }
}

/// The out-fields of a successful reply.
///
/// Which variant an op requires is fixed by its opcode; the encoder rejects
/// mismatches as protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// LookUp, MkDir, MkNod, Symlink, Link.
    Entry(Entry),
    /// GetAttr, SetAttr.
    Attr(AttrReply),
    /// Create: a new entry plus an open handle.
    Created {
        entry: Entry,
        handle: u64,
        open_flags: u32,
    },
    /// OpenFile, OpenDir.
    Opened { handle: u64, open_flags: u32 },
    /// ReadFile and ReadDir; for ReadDir the bytes are packed dirent
    /// records (see [`crate::protocol::DirentBuffer`]).
    Data(Vec<u8>),
    /// WriteFile: bytes accepted.
    Written(u32),
    /// ReadSymlink.
    Symlink(OsString),
    /// StatFs.
    Statfs(Statfs),
    /// GetXattr, ListXattr.
    Xattr(XattrOut),
    /// Ops whose success carries no body.
    Unit,
}

impl Reply {
    /// Size of the variable payload, for max_write enforcement.
    pub(crate) fn payload_len(&self) -> usize {
        match self {
            Reply::Data(data) => data.len(),
            Reply::Xattr(XattrOut::Data(data)) => data.len(),
            _ => 0,
        }
    }
}

/// Decoded `fuse_in_header` fields the library exposes.
#[derive(Debug, Clone, Copy)]
pub struct RequestHeader {
    pub unique: u64,
    pub opcode: u32,
    pub nodeid: u64,
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

impl RequestHeader {
    pub(crate) fn op_code(&self) -> Option<Opcode> {
        Opcode::from_u32(self.opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_name() {
        let op = Op::LookUp {
            parent: 1,
            name: "test".into(),
        };
        assert_eq!(op.name(), "lookup");
    }

    #[test]
    fn test_no_reply_set() {
        assert!(Op::Forget {
            inode: 1,
            nlookup: 1
        }
        .is_no_reply());
        assert!(Op::BatchForget { entries: vec![] }.is_no_reply());
        assert!(!Op::StatFs { inode: 1 }.is_no_reply());
    }

    #[test]
    fn test_mutates() {
        assert!(Op::WriteFile {
            inode: 1,
            handle: 1,
            offset: 0,
            data: vec![]
        }
        .mutates());
        assert!(!Op::ReadFile {
            inode: 1,
            handle: 1,
            offset: 0,
            size: 4096
        }
        .mutates());
        assert!(!Op::Flush {
            inode: 1,
            handle: 1,
            lock_owner: 0
        }
        .mutates());
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(Reply::Data(vec![0; 100]).payload_len(), 100);
        assert_eq!(Reply::Unit.payload_len(), 0);
        assert_eq!(Reply::Xattr(XattrOut::Size(9)).payload_len(), 0);
    }
}

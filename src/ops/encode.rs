//! Reply encoding: out-fields to wire frames.
//!
//! Success replies are built per opcode with the struct sizes the negotiated
//! protocol expects; error replies are a bare header carrying the negated
//! errno. A reply variant that does not match its opcode is reported as a
//! mismatch and turned into EIO by the connection — it can only come from a
//! broken dispatch path, never from the kernel.

use super::{Attr, Entry, Reply, XattrOut};
use crate::buffer::OutMessage;
use crate::protocol::abi::{self, Opcode};
use crate::protocol::Protocol;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::time::Duration;

/// The reply variant does not fit the opcode's contract.
#[derive(Debug)]
pub struct ReplyMismatch {
    pub opcode: Opcode,
}

impl fmt::Display for ReplyMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reply variant does not match opcode {:?}", self.opcode)
    }
}

impl std::error::Error for ReplyMismatch {}

/// Clamp a cache lifetime to the wire's (secs, nsecs) pair. Zero and
/// sub-nanosecond expirations collapse to zero.
fn expiration(ttl: Duration) -> (u64, u32) {
    (ttl.as_secs(), ttl.subsec_nanos())
}

fn wire_attr(attr: &Attr) -> abi::fuse_attr {
    abi::fuse_attr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime_secs,
        mtime: attr.mtime_secs,
        ctime: attr.ctime_secs,
        atimensec: attr.atime_nsecs,
        mtimensec: attr.mtime_nsecs,
        ctimensec: attr.ctime_nsecs,
        mode: attr.mode,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        blksize: attr.blksize,
        padding: 0,
    }
}

fn wire_entry(entry: &Entry) -> abi::fuse_entry_out {
    let (entry_valid, entry_valid_nsec) = expiration(entry.entry_ttl);
    let (attr_valid, attr_valid_nsec) = expiration(entry.attr_ttl);
    abi::fuse_entry_out {
        nodeid: entry.child,
        generation: entry.generation,
        entry_valid,
        attr_valid,
        entry_valid_nsec,
        attr_valid_nsec,
        attr: wire_attr(&entry.attr),
    }
}

/// Build the success frame for `opcode` from `reply`.
///
/// Takes the reply by value so data payloads move into the frame unchanged
/// and are written without an intermediate copy.
pub(crate) fn encode_reply(
    opcode: Opcode,
    reply: Reply,
    proto: Protocol,
) -> Result<OutMessage, ReplyMismatch> {
    let mismatch = || ReplyMismatch { opcode };

    let msg = match (opcode, reply) {
        (
            Opcode::Lookup | Opcode::Mkdir | Opcode::Mknod | Opcode::Symlink | Opcode::Link,
            Reply::Entry(entry),
        ) => {
            let size = proto.entry_out_size();
            let mut msg = OutMessage::new(size);
            msg.append_struct(&wire_entry(&entry), size);
            msg
        }

        (Opcode::Getattr | Opcode::Setattr, Reply::Attr(out)) => {
            let (attr_valid, attr_valid_nsec) = expiration(out.ttl);
            let size = proto.attr_out_size();
            let mut msg = OutMessage::new(size);
            msg.append_struct(
                &abi::fuse_attr_out {
                    attr_valid,
                    attr_valid_nsec,
                    dummy: 0,
                    attr: wire_attr(&out.attr),
                },
                size,
            );
            msg
        }

        (
            Opcode::Create,
            Reply::Created {
                entry,
                handle,
                open_flags,
            },
        ) => {
            let entry_size = proto.entry_out_size();
            let mut msg = OutMessage::new(entry_size + abi::FUSE_OPEN_OUT_SIZE);
            msg.append_struct(&wire_entry(&entry), entry_size);
            msg.append_struct(
                &abi::fuse_open_out {
                    fh: handle,
                    open_flags,
                    padding: 0,
                },
                abi::FUSE_OPEN_OUT_SIZE,
            );
            msg
        }

        (Opcode::Open | Opcode::Opendir, Reply::Opened { handle, open_flags }) => {
            let mut msg = OutMessage::new(abi::FUSE_OPEN_OUT_SIZE);
            msg.append_struct(
                &abi::fuse_open_out {
                    fh: handle,
                    open_flags,
                    padding: 0,
                },
                abi::FUSE_OPEN_OUT_SIZE,
            );
            msg
        }

        (Opcode::Read | Opcode::Readdir, Reply::Data(data)) => {
            let mut msg = OutMessage::new(0);
            msg.set_payload(data);
            msg
        }

        (Opcode::Write, Reply::Written(size)) => {
            let mut msg = OutMessage::new(abi::FUSE_WRITE_OUT_SIZE);
            msg.append_struct(
                &abi::fuse_write_out { size, padding: 0 },
                abi::FUSE_WRITE_OUT_SIZE,
            );
            msg
        }

        (Opcode::Readlink, Reply::Symlink(target)) => {
            // Target is appended without a trailing NUL.
            let bytes = target.as_os_str().as_bytes();
            let mut msg = OutMessage::new(bytes.len());
            msg.append(bytes);
            msg
        }

        (Opcode::Statfs, Reply::Statfs(st)) => {
            let mut msg = OutMessage::new(abi::FUSE_STATFS_OUT_SIZE);
            msg.append_struct(
                &abi::fuse_statfs_out {
                    st: abi::fuse_kstatfs {
                        blocks: st.blocks,
                        bfree: st.bfree,
                        bavail: st.bavail,
                        files: st.files,
                        ffree: st.ffree,
                        bsize: st.bsize,
                        namelen: st.namelen,
                        frsize: st.frsize,
                        padding: 0,
                        spare: [0; 6],
                    },
                },
                abi::FUSE_STATFS_OUT_SIZE,
            );
            msg
        }

        (Opcode::Getxattr | Opcode::Listxattr, Reply::Xattr(out)) => match out {
            XattrOut::Size(size) => {
                let mut msg = OutMessage::new(abi::FUSE_GETXATTR_OUT_SIZE);
                msg.append_struct(
                    &abi::fuse_getxattr_out { size, padding: 0 },
                    abi::FUSE_GETXATTR_OUT_SIZE,
                );
                msg
            }
            XattrOut::Data(data) => {
                let mut msg = OutMessage::new(0);
                msg.set_payload(data);
                msg
            }
        },

        (
            Opcode::Setattr
            | Opcode::Rename
            | Opcode::Unlink
            | Opcode::Rmdir
            | Opcode::Flush
            | Opcode::Release
            | Opcode::Releasedir
            | Opcode::Fsync
            | Opcode::Fsyncdir
            | Opcode::Setxattr
            | Opcode::Removexattr
            | Opcode::Fallocate
            | Opcode::Access,
            Reply::Unit,
        ) => OutMessage::new(0),

        _ => return Err(mismatch()),
    };

    Ok(msg)
}

/// Build a bare error frame.
pub(crate) fn encode_error(unique: u64, errno: i32) -> OutMessage {
    let mut msg = OutMessage::new(0);
    msg.finish(unique, errno);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::AttrReply;

    const MODERN: Protocol = Protocol {
        major: 7,
        minor: 31,
    };
    const LEGACY: Protocol = Protocol { major: 7, minor: 8 };

    fn sample_entry() -> Entry {
        Entry {
            child: 5,
            generation: 1,
            attr: Attr::new(5),
            attr_ttl: Duration::from_secs(1),
            entry_ttl: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_entry_size_by_version() {
        let mut modern = encode_reply(Opcode::Lookup, Reply::Entry(sample_entry()), MODERN).unwrap();
        modern.finish(1, 0);
        assert_eq!(modern.len(), 16 + 128);

        let mut legacy = encode_reply(Opcode::Lookup, Reply::Entry(sample_entry()), LEGACY).unwrap();
        legacy.finish(1, 0);
        assert_eq!(legacy.len(), 16 + 120);
    }

    #[test]
    fn test_attr_out_size_by_version() {
        let out = Reply::Attr(AttrReply {
            attr: Attr::new(2),
            ttl: Duration::from_secs(1),
        });
        let mut msg = encode_reply(Opcode::Getattr, out.clone(), MODERN).unwrap();
        msg.finish(1, 0);
        assert_eq!(msg.len(), 16 + 104);

        let mut msg = encode_reply(Opcode::Getattr, out, LEGACY).unwrap();
        msg.finish(1, 0);
        assert_eq!(msg.len(), 16 + 96);
    }

    #[test]
    fn test_create_is_entry_plus_open() {
        let mut msg = encode_reply(
            Opcode::Create,
            Reply::Created {
                entry: sample_entry(),
                handle: 99,
                open_flags: 0,
            },
            MODERN,
        )
        .unwrap();
        msg.finish(1, 0);
        assert_eq!(msg.len(), 16 + 128 + 16);
    }

    #[test]
    fn test_data_moves_without_copy() {
        let data = vec![7u8; 4096];
        let ptr = data.as_ptr();
        let msg = encode_reply(Opcode::Readdir, Reply::Data(data), MODERN).unwrap();
        assert_eq!(msg.payload().unwrap().as_ptr(), ptr);
    }

    #[test]
    fn test_readlink_no_trailing_nul() {
        let mut msg = encode_reply(
            Opcode::Readlink,
            Reply::Symlink("/a/b".into()),
            MODERN,
        )
        .unwrap();
        msg.finish(1, 0);
        assert_eq!(msg.len(), 16 + 4);
    }

    #[test]
    fn test_mismatch_rejected() {
        let err = encode_reply(Opcode::Lookup, Reply::Written(4), MODERN);
        assert!(err.is_err());
    }

    #[test]
    fn test_error_frame() {
        let msg = encode_error(42, libc::ENOSYS);
        assert_eq!(msg.len(), 16);
        let slices = msg.io_slices();
        let frame: &[u8] = &slices[0];
        assert_eq!(&frame[4..8], &(-libc::ENOSYS).to_le_bytes());
        assert_eq!(&frame[8..16], &42u64.to_le_bytes());
    }

    #[test]
    fn test_zero_expiration() {
        assert_eq!(expiration(Duration::ZERO), (0, 0));
        assert_eq!(expiration(Duration::new(3, 500)), (3, 500));
    }
}

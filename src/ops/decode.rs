//! Request-body decoding: one function per opcode shape.
//!
//! The caller has already split off `fuse_in_header`; these functions see the
//! body only. Fixed parts are deserialized from the front; variable parts
//! (names, write data) follow. A body shorter than its fixed part, or a name
//! without its terminating NUL, is a decode error — the connection answers
//! EIO and keeps running.

use super::{AttrChanges, Op, RequestHeader, SetTime};
use crate::protocol::abi::{self, Opcode};
use crate::protocol::Protocol;
use serde::Deserialize;
use std::ffi::OsString;
use std::fmt;
use std::os::unix::ffi::OsStringExt;

/// A request body the codec cannot parse.
#[derive(Debug)]
pub struct DecodeError {
    pub op: &'static str,
    pub reason: &'static str,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot decode {}: {}", self.op, self.reason)
    }
}

impl std::error::Error for DecodeError {}

fn short(op: &'static str) -> DecodeError {
    DecodeError {
        op,
        reason: "body shorter than fixed part",
    }
}

fn bad_name(op: &'static str) -> DecodeError {
    DecodeError {
        op,
        reason: "name is not NUL-terminated",
    }
}

/// Deserialize the fixed part of a body, requiring at least `size` bytes.
fn fixed<'a, T: Deserialize<'a>>(
    body: &'a [u8],
    size: usize,
    op: &'static str,
) -> Result<T, DecodeError> {
    if body.len() < size {
        return Err(short(op));
    }
    abi::from_bytes(&body[..size]).ok_or(short(op))
}

/// Split one NUL-terminated name off the front of `bytes`.
fn take_name<'a>(bytes: &'a [u8], op: &'static str) -> Result<(OsString, &'a [u8]), DecodeError> {
    let nul = bytes.iter().position(|&b| b == 0).ok_or(bad_name(op))?;
    let name = OsString::from_vec(bytes[..nul].to_vec());
    Ok((name, &bytes[nul + 1..]))
}

/// One NUL-terminated name and nothing else of interest after it.
fn single_name(bytes: &[u8], op: &'static str) -> Result<OsString, DecodeError> {
    let (name, _) = take_name(bytes, op)?;
    Ok(name)
}

/// Decode a request body into an [`Op`].
///
/// Init, Interrupt and Destroy never reach this function; the connection
/// consumes them internally.
pub(crate) fn decode_body(
    header: &RequestHeader,
    opcode: Opcode,
    body: &[u8],
    proto: Protocol,
) -> Result<Op, DecodeError> {
    let inode = header.nodeid;
    let op = match opcode {
        Opcode::Lookup => Op::LookUp {
            parent: inode,
            name: single_name(body, "lookup")?,
        },

        Opcode::Forget => {
            let f: abi::fuse_forget_in = fixed(body, 8, "forget")?;
            Op::Forget {
                inode,
                nlookup: f.nlookup,
            }
        }

        Opcode::BatchForget => {
            let b: abi::fuse_batch_forget_in =
                fixed(body, abi::FUSE_BATCH_FORGET_IN_SIZE, "batch_forget")?;
            let rest = &body[abi::FUSE_BATCH_FORGET_IN_SIZE..];
            let count = b.count as usize;
            if rest.len() < count * abi::FUSE_FORGET_ONE_SIZE {
                return Err(short("batch_forget"));
            }
            let mut entries = Vec::with_capacity(count);
            for i in 0..count {
                let chunk = &rest[i * abi::FUSE_FORGET_ONE_SIZE..];
                let one: abi::fuse_forget_one =
                    fixed(chunk, abi::FUSE_FORGET_ONE_SIZE, "batch_forget")?;
                entries.push((one.nodeid, one.nlookup));
            }
            Op::BatchForget { entries }
        }

        Opcode::Getattr => {
            // The body only exists since 7.9.
            if proto.minor < 9 || body.is_empty() {
                Op::GetAttr {
                    inode,
                    handle: None,
                }
            } else {
                let g: abi::fuse_getattr_in = fixed(body, 16, "getattr")?;
                let handle = (g.getattr_flags & abi::FUSE_GETATTR_FH != 0).then_some(g.fh);
                Op::GetAttr { inode, handle }
            }
        }

        Opcode::Setattr => {
            let s: abi::fuse_setattr_in = fixed(body, 88, "setattr")?;
            Op::SetAttr {
                inode,
                changes: unpack_setattr(&s),
            }
        }

        Opcode::Mkdir => {
            let m: abi::fuse_mkdir_in = fixed(body, 8, "mkdir")?;
            Op::MkDir {
                parent: inode,
                name: single_name(&body[8..], "mkdir")?,
                mode: m.mode,
            }
        }

        Opcode::Mknod => {
            let size = proto.mknod_in_size();
            let (mode, rdev) = if size == abi::FUSE_COMPAT_MKNOD_IN_SIZE {
                let m: [u32; 2] = fixed(body, 8, "mknod")?;
                (m[0], m[1])
            } else {
                let m: abi::fuse_mknod_in = fixed(body, 16, "mknod")?;
                (m.mode, m.rdev)
            };
            Op::MkNod {
                parent: inode,
                name: single_name(&body[size..], "mknod")?,
                mode,
                rdev,
            }
        }

        Opcode::Create => {
            let (flags, mode, fixed_size) = if proto.has_create_in() {
                let c: abi::fuse_create_in = fixed(body, 16, "create")?;
                (c.flags, c.mode, 16)
            } else {
                // Pre-7.12 CREATE sent an open-in-shaped body whose second
                // word carried the mode.
                let c: abi::fuse_open_in = fixed(body, 8, "create")?;
                (c.flags, c.unused, 8)
            };
            Op::Create {
                parent: inode,
                name: single_name(&body[fixed_size..], "create")?,
                mode,
                flags,
            }
        }

        Opcode::Symlink => {
            // Two consecutive NUL-terminated strings: link name, then target.
            let (name, rest) = take_name(body, "symlink")?;
            let (target, _) = take_name(rest, "symlink")?;
            Op::Symlink {
                parent: inode,
                name,
                target,
            }
        }

        Opcode::Link => {
            let l: abi::fuse_link_in = fixed(body, 8, "link")?;
            Op::Link {
                inode: l.oldnodeid,
                new_parent: inode,
                new_name: single_name(&body[8..], "link")?,
            }
        }

        Opcode::Rename => {
            let r: abi::fuse_rename_in = fixed(body, 8, "rename")?;
            let (old_name, rest) = take_name(&body[8..], "rename")?;
            let (new_name, _) = take_name(rest, "rename")?;
            Op::Rename {
                old_parent: inode,
                old_name,
                new_parent: r.newdir,
                new_name,
            }
        }

        Opcode::Unlink => Op::Unlink {
            parent: inode,
            name: single_name(body, "unlink")?,
        },

        Opcode::Rmdir => Op::RmDir {
            parent: inode,
            name: single_name(body, "rmdir")?,
        },

        Opcode::Open => {
            let o: abi::fuse_open_in = fixed(body, 8, "open")?;
            Op::OpenFile {
                inode,
                flags: o.flags,
            }
        }

        Opcode::Opendir => {
            let o: abi::fuse_open_in = fixed(body, 8, "opendir")?;
            Op::OpenDir {
                inode,
                flags: o.flags,
            }
        }

        Opcode::Read | Opcode::Readdir => {
            let r: abi::fuse_read_in = if proto.read_in_size() == abi::FUSE_COMPAT_READ_IN_SIZE {
                let c: [u64; 3] = fixed(body, 24, "read")?;
                abi::fuse_read_in {
                    fh: c[0],
                    offset: c[1],
                    size: c[2] as u32,
                    read_flags: (c[2] >> 32) as u32,
                    lock_owner: 0,
                    flags: 0,
                    padding: 0,
                }
            } else {
                fixed(body, 40, "read")?
            };
            if opcode == Opcode::Read {
                Op::ReadFile {
                    inode,
                    handle: r.fh,
                    offset: r.offset,
                    size: r.size,
                }
            } else {
                Op::ReadDir {
                    inode,
                    handle: r.fh,
                    offset: r.offset,
                    size: r.size,
                }
            }
        }

        Opcode::Write => {
            let size = proto.write_in_size();
            let w: abi::fuse_write_in = if size == abi::FUSE_COMPAT_WRITE_IN_SIZE {
                let c: [u64; 3] = fixed(body, 24, "write")?;
                abi::fuse_write_in {
                    fh: c[0],
                    offset: c[1],
                    size: c[2] as u32,
                    write_flags: (c[2] >> 32) as u32,
                    lock_owner: 0,
                    flags: 0,
                    padding: 0,
                }
            } else {
                fixed(body, abi::FUSE_WRITE_IN_SIZE, "write")?
            };
            let data = &body[size..];
            if data.len() < w.size as usize {
                return Err(DecodeError {
                    op: "write",
                    reason: "data shorter than header size field",
                });
            }
            Op::WriteFile {
                inode,
                handle: w.fh,
                offset: w.offset,
                data: data[..w.size as usize].to_vec(),
            }
        }

        Opcode::Flush => {
            let f: abi::fuse_flush_in = fixed(body, 24, "flush")?;
            Op::Flush {
                inode,
                handle: f.fh,
                lock_owner: f.lock_owner,
            }
        }

        Opcode::Release => {
            let r: abi::fuse_release_in = fixed(body, 24, "release")?;
            Op::ReleaseFile {
                inode,
                handle: r.fh,
                flags: r.flags,
            }
        }

        Opcode::Releasedir => {
            let r: abi::fuse_release_in = fixed(body, 24, "releasedir")?;
            Op::ReleaseDir {
                inode,
                handle: r.fh,
                flags: r.flags,
            }
        }

        Opcode::Fsync => {
            let f: abi::fuse_fsync_in = fixed(body, 16, "fsync")?;
            Op::Fsync {
                inode,
                handle: f.fh,
                datasync: f.fsync_flags & abi::FUSE_FSYNC_FDATASYNC != 0,
            }
        }

        Opcode::Fsyncdir => {
            let f: abi::fuse_fsync_in = fixed(body, 16, "fsyncdir")?;
            Op::FsyncDir {
                inode,
                handle: f.fh,
                datasync: f.fsync_flags & abi::FUSE_FSYNC_FDATASYNC != 0,
            }
        }

        Opcode::Readlink => Op::ReadSymlink { inode },

        Opcode::Statfs => Op::StatFs { inode },

        Opcode::Getxattr => {
            let g: abi::fuse_getxattr_in = fixed(body, 8, "getxattr")?;
            Op::GetXattr {
                inode,
                name: single_name(&body[8..], "getxattr")?,
                size: g.size,
            }
        }

        Opcode::Listxattr => {
            let g: abi::fuse_getxattr_in = fixed(body, 8, "listxattr")?;
            Op::ListXattr {
                inode,
                size: g.size,
            }
        }

        Opcode::Setxattr => {
            let s: abi::fuse_setxattr_in = fixed(body, 8, "setxattr")?;
            let (name, rest) = take_name(&body[8..], "setxattr")?;
            if rest.len() < s.size as usize {
                return Err(DecodeError {
                    op: "setxattr",
                    reason: "value shorter than header size field",
                });
            }
            Op::SetXattr {
                inode,
                name,
                value: rest[..s.size as usize].to_vec(),
                flags: s.flags,
            }
        }

        Opcode::Removexattr => Op::RemoveXattr {
            inode,
            name: single_name(body, "removexattr")?,
        },

        Opcode::Fallocate => {
            let f: abi::fuse_fallocate_in = fixed(body, 32, "fallocate")?;
            Op::Fallocate {
                inode,
                handle: f.fh,
                offset: f.offset,
                length: f.length,
                mode: f.mode,
            }
        }

        Opcode::Access => {
            let a: abi::fuse_access_in = fixed(body, 8, "access")?;
            Op::Access {
                inode,
                mask: a.mask,
            }
        }

        Opcode::Init | Opcode::Interrupt | Opcode::Destroy => {
            return Err(DecodeError {
                op: "internal",
                reason: "internal opcode reached the body decoder",
            })
        }
    };

    Ok(op)
}

fn unpack_setattr(s: &abi::fuse_setattr_in) -> AttrChanges {
    let valid = s.valid;
    let time = |set_bit: u32, now_bit: u32, secs: u64, nsecs: u32| -> Option<SetTime> {
        if valid & now_bit != 0 {
            Some(SetTime::Now)
        } else if valid & set_bit != 0 {
            Some(SetTime::At { secs, nsecs })
        } else {
            None
        }
    };

    AttrChanges {
        mode: (valid & abi::FATTR_MODE != 0).then_some(s.mode),
        uid: (valid & abi::FATTR_UID != 0).then_some(s.uid),
        gid: (valid & abi::FATTR_GID != 0).then_some(s.gid),
        size: (valid & abi::FATTR_SIZE != 0).then_some(s.size),
        atime: time(abi::FATTR_ATIME, abi::FATTR_ATIME_NOW, s.atime, s.atimensec),
        mtime: time(abi::FATTR_MTIME, abi::FATTR_MTIME_NOW, s.mtime, s.mtimensec),
        ctime: (valid & abi::FATTR_CTIME != 0).then_some((s.ctime, s.ctimensec)),
        handle: (valid & abi::FATTR_FH != 0).then_some(s.fh),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROTO: Protocol = Protocol {
        major: 7,
        minor: 31,
    };

    fn header(opcode: Opcode, nodeid: u64) -> RequestHeader {
        RequestHeader {
            unique: 1,
            opcode: opcode as u32,
            nodeid,
            uid: 1000,
            gid: 1000,
            pid: 42,
        }
    }

    #[test]
    fn test_lookup_strips_nul() {
        let hdr = header(Opcode::Lookup, 1);
        let op = decode_body(&hdr, Opcode::Lookup, b"hello.txt\0", PROTO).unwrap();
        assert_eq!(
            op,
            Op::LookUp {
                parent: 1,
                name: "hello.txt".into()
            }
        );
    }

    #[test]
    fn test_lookup_missing_nul() {
        let hdr = header(Opcode::Lookup, 1);
        let err = decode_body(&hdr, Opcode::Lookup, b"hello.txt", PROTO).unwrap_err();
        assert_eq!(err.reason, "name is not NUL-terminated");
    }

    #[test]
    fn test_rename_two_names() {
        let hdr = header(Opcode::Rename, 5);
        let mut body = abi::to_bytes(&abi::fuse_rename_in { newdir: 9 });
        body.extend_from_slice(b"old\0new\0");
        let op = decode_body(&hdr, Opcode::Rename, &body, PROTO).unwrap();
        assert_eq!(
            op,
            Op::Rename {
                old_parent: 5,
                old_name: "old".into(),
                new_parent: 9,
                new_name: "new".into(),
            }
        );
    }

    #[test]
    fn test_write_carries_data() {
        let hdr = header(Opcode::Write, 3);
        let mut body = abi::to_bytes(&abi::fuse_write_in {
            fh: 7,
            offset: 100,
            size: 5,
            write_flags: 0,
            lock_owner: 0,
            flags: 0,
            padding: 0,
        });
        body.extend_from_slice(b"hello");
        let op = decode_body(&hdr, Opcode::Write, &body, PROTO).unwrap();
        assert_eq!(
            op,
            Op::WriteFile {
                inode: 3,
                handle: 7,
                offset: 100,
                data: b"hello".to_vec(),
            }
        );
    }

    #[test]
    fn test_write_short_data() {
        let hdr = header(Opcode::Write, 3);
        let mut body = abi::to_bytes(&abi::fuse_write_in {
            fh: 7,
            offset: 0,
            size: 100,
            write_flags: 0,
            lock_owner: 0,
            flags: 0,
            padding: 0,
        });
        body.extend_from_slice(b"short");
        assert!(decode_body(&hdr, Opcode::Write, &body, PROTO).is_err());
    }

    #[test]
    fn test_short_fixed_part() {
        let hdr = header(Opcode::Fallocate, 3);
        assert!(decode_body(&hdr, Opcode::Fallocate, &[0u8; 16], PROTO).is_err());
    }

    #[test]
    fn test_getattr_handle_flag() {
        let hdr = header(Opcode::Getattr, 2);
        let body = abi::to_bytes(&abi::fuse_getattr_in {
            getattr_flags: abi::FUSE_GETATTR_FH,
            dummy: 0,
            fh: 11,
        });
        let op = decode_body(&hdr, Opcode::Getattr, &body, PROTO).unwrap();
        assert_eq!(
            op,
            Op::GetAttr {
                inode: 2,
                handle: Some(11)
            }
        );
    }

    #[test]
    fn test_getattr_compat_empty_body() {
        let hdr = header(Opcode::Getattr, 2);
        let old = Protocol::new(7, 8);
        let op = decode_body(&hdr, Opcode::Getattr, &[], old).unwrap();
        assert_eq!(
            op,
            Op::GetAttr {
                inode: 2,
                handle: None
            }
        );
    }

    #[test]
    fn test_setattr_bits() {
        let hdr = header(Opcode::Setattr, 4);
        let s = abi::fuse_setattr_in {
            valid: abi::FATTR_MODE | abi::FATTR_SIZE | abi::FATTR_MTIME_NOW,
            mode: 0o644,
            size: 1024,
            ..Default::default()
        };
        let op = decode_body(&hdr, Opcode::Setattr, &abi::to_bytes(&s), PROTO).unwrap();
        match op {
            Op::SetAttr { inode, changes } => {
                assert_eq!(inode, 4);
                assert_eq!(changes.mode, Some(0o644));
                assert_eq!(changes.size, Some(1024));
                assert_eq!(changes.mtime, Some(SetTime::Now));
                assert_eq!(changes.atime, None);
                assert_eq!(changes.uid, None);
            }
            other => panic!("unexpected op: {:?}", other),
        }
    }

    #[test]
    fn test_batch_forget() {
        let hdr = header(Opcode::BatchForget, 0);
        let mut body = abi::to_bytes(&abi::fuse_batch_forget_in { count: 2, dummy: 0 });
        body.extend_from_slice(&abi::to_bytes(&abi::fuse_forget_one {
            nodeid: 10,
            nlookup: 1,
        }));
        body.extend_from_slice(&abi::to_bytes(&abi::fuse_forget_one {
            nodeid: 11,
            nlookup: 3,
        }));
        let op = decode_body(&hdr, Opcode::BatchForget, &body, PROTO).unwrap();
        assert_eq!(
            op,
            Op::BatchForget {
                entries: vec![(10, 1), (11, 3)]
            }
        );
    }

    #[test]
    fn test_symlink_name_then_target() {
        let hdr = header(Opcode::Symlink, 1);
        let op = decode_body(&hdr, Opcode::Symlink, b"link\0/target/path\0", PROTO).unwrap();
        assert_eq!(
            op,
            Op::Symlink {
                parent: 1,
                name: "link".into(),
                target: "/target/path".into(),
            }
        );
    }

    #[test]
    fn test_setxattr_value() {
        let hdr = header(Opcode::Setxattr, 6);
        let mut body = abi::to_bytes(&abi::fuse_setxattr_in { size: 3, flags: 0 });
        body.extend_from_slice(b"user.test\0abc");
        let op = decode_body(&hdr, Opcode::Setxattr, &body, PROTO).unwrap();
        assert_eq!(
            op,
            Op::SetXattr {
                inode: 6,
                name: "user.test".into(),
                value: b"abc".to_vec(),
                flags: 0,
            }
        );
    }
}

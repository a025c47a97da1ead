//! Filesystem trait for user code.

// FUSE operations have fixed parameter sets
#![allow(clippy::too_many_arguments)]

use crate::conn::OpContext;
use crate::error::OpResult;
use crate::ops::{AttrChanges, AttrReply, Entry, Op, Reply, Statfs, XattrOut};
use std::ffi::OsStr;

/// A user filesystem.
///
/// One method per kernel operation. Methods are synchronous — they may block
/// — and are invoked from async context on the blocking pool. Handlers for
/// different ops run in parallel; the implementation is responsible for its
/// own locking.
///
/// Every method receives an [`OpContext`] carrying the caller's credentials
/// and a cancellation token; a long-running method should poll
/// [`OpContext::is_cancelled`] and bail out with EINTR. Cancellation is
/// advisory: a completed result is still delivered.
///
/// The default implementation answers ENOSYS everywhere except where a
/// permissive default is harmless (`flush`, the releases, the fsyncs and
/// `access` succeed; `stat_fs` reports zeroes).
pub trait Filesystem: Send + Sync {
    /// Look up a child by name and report its attributes.
    fn look_up(&self, _cx: &OpContext, _parent: u64, _name: &OsStr) -> OpResult<Entry> {
        Err(libc::ENOSYS)
    }

    /// The kernel dropped `nlookup` references to the inode. No reply is
    /// sent; errors cannot be reported.
    fn forget(&self, _cx: &OpContext, _inode: u64, _nlookup: u64) {}

    /// Get attributes. `handle` is present when the kernel stats through an
    /// open file.
    fn get_attr(&self, _cx: &OpContext, _inode: u64, _handle: Option<u64>) -> OpResult<AttrReply> {
        Err(libc::ENOSYS)
    }

    /// Apply attribute changes and return the resulting attributes.
    fn set_attr(&self, _cx: &OpContext, _inode: u64, _changes: &AttrChanges) -> OpResult<AttrReply> {
        Err(libc::ENOSYS)
    }

    fn mk_dir(&self, _cx: &OpContext, _parent: u64, _name: &OsStr, _mode: u32) -> OpResult<Entry> {
        Err(libc::ENOSYS)
    }

    fn mk_nod(
        &self,
        _cx: &OpContext,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _rdev: u32,
    ) -> OpResult<Entry> {
        Err(libc::ENOSYS)
    }

    /// Create and open a file. Returns the new entry plus an open handle.
    fn create(
        &self,
        _cx: &OpContext,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _flags: u32,
    ) -> OpResult<(Entry, u64)> {
        Err(libc::ENOSYS)
    }

    fn symlink(
        &self,
        _cx: &OpContext,
        _parent: u64,
        _name: &OsStr,
        _target: &OsStr,
    ) -> OpResult<Entry> {
        Err(libc::ENOSYS)
    }

    fn link(
        &self,
        _cx: &OpContext,
        _inode: u64,
        _new_parent: u64,
        _new_name: &OsStr,
    ) -> OpResult<Entry> {
        Err(libc::ENOSYS)
    }

    fn rename(
        &self,
        _cx: &OpContext,
        _old_parent: u64,
        _old_name: &OsStr,
        _new_parent: u64,
        _new_name: &OsStr,
    ) -> OpResult<()> {
        Err(libc::ENOSYS)
    }

    fn unlink(&self, _cx: &OpContext, _parent: u64, _name: &OsStr) -> OpResult<()> {
        Err(libc::ENOSYS)
    }

    fn rm_dir(&self, _cx: &OpContext, _parent: u64, _name: &OsStr) -> OpResult<()> {
        Err(libc::ENOSYS)
    }

    /// Open a file; the returned handle is echoed on subsequent I/O.
    fn open_file(&self, _cx: &OpContext, _inode: u64, _flags: u32) -> OpResult<u64> {
        Err(libc::ENOSYS)
    }

    fn open_dir(&self, _cx: &OpContext, _inode: u64, _flags: u32) -> OpResult<u64> {
        Err(libc::ENOSYS)
    }

    /// Read up to `size` bytes at `offset`. Fewer bytes than requested means
    /// end of file.
    fn read_file(
        &self,
        _cx: &OpContext,
        _inode: u64,
        _handle: u64,
        _offset: u64,
        _size: u32,
    ) -> OpResult<Vec<u8>> {
        Err(libc::ENOSYS)
    }

    /// Read directory records starting at `offset`, formatted with
    /// [`DirentBuffer`](crate::protocol::DirentBuffer) and at most `size`
    /// bytes long.
    fn read_dir(
        &self,
        _cx: &OpContext,
        _inode: u64,
        _handle: u64,
        _offset: u64,
        _size: u32,
    ) -> OpResult<Vec<u8>> {
        Err(libc::ENOSYS)
    }

    /// Write `data` at `offset`; returns the number of bytes accepted.
    fn write_file(
        &self,
        _cx: &OpContext,
        _inode: u64,
        _handle: u64,
        _offset: u64,
        _data: &[u8],
    ) -> OpResult<u32> {
        Err(libc::ENOSYS)
    }

    fn flush(&self, _cx: &OpContext, _inode: u64, _handle: u64, _lock_owner: u64) -> OpResult<()> {
        Ok(())
    }

    fn release_file(&self, _cx: &OpContext, _inode: u64, _handle: u64, _flags: u32) -> OpResult<()> {
        Ok(())
    }

    fn release_dir(&self, _cx: &OpContext, _inode: u64, _handle: u64, _flags: u32) -> OpResult<()> {
        Ok(())
    }

    fn fsync(&self, _cx: &OpContext, _inode: u64, _handle: u64, _datasync: bool) -> OpResult<()> {
        Ok(())
    }

    fn fsync_dir(&self, _cx: &OpContext, _inode: u64, _handle: u64, _datasync: bool) -> OpResult<()> {
        Ok(())
    }

    fn read_symlink(&self, _cx: &OpContext, _inode: u64) -> OpResult<std::ffi::OsString> {
        Err(libc::ENOSYS)
    }

    fn stat_fs(&self, _cx: &OpContext, _inode: u64) -> OpResult<Statfs> {
        Ok(Statfs {
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
            ..Default::default()
        })
    }

    /// `size == 0` probes for the value length; otherwise return at most
    /// `size` bytes (ERANGE if the value does not fit).
    fn get_xattr(
        &self,
        _cx: &OpContext,
        _inode: u64,
        _name: &OsStr,
        _size: u32,
    ) -> OpResult<XattrOut> {
        Err(libc::ENOSYS)
    }

    fn list_xattr(&self, _cx: &OpContext, _inode: u64, _size: u32) -> OpResult<XattrOut> {
        Err(libc::ENOSYS)
    }

    fn set_xattr(
        &self,
        _cx: &OpContext,
        _inode: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: u32,
    ) -> OpResult<()> {
        Err(libc::ENOSYS)
    }

    fn remove_xattr(&self, _cx: &OpContext, _inode: u64, _name: &OsStr) -> OpResult<()> {
        Err(libc::ENOSYS)
    }

    fn fallocate(
        &self,
        _cx: &OpContext,
        _inode: u64,
        _handle: u64,
        _offset: u64,
        _length: u64,
        _mode: u32,
    ) -> OpResult<()> {
        Err(libc::ENOSYS)
    }

    /// Check access permissions. Only issued when the kernel is not doing
    /// its own permission checks.
    fn access(&self, _cx: &OpContext, _inode: u64, _mask: u32) -> OpResult<()> {
        Ok(())
    }

    /// Map an op to its method and its result to the reply contract.
    ///
    /// The dispatcher calls this; overriding it is the hook for filesystems
    /// that want to observe every op in one place.
    fn dispatch(&self, cx: &OpContext, op: &Op) -> Result<Reply, i32> {
        match op {
            Op::LookUp { parent, name } => {
                self.look_up(cx, *parent, name).map(Reply::Entry)
            }
            Op::Forget { inode, nlookup } => {
                self.forget(cx, *inode, *nlookup);
                Ok(Reply::Unit)
            }
            Op::BatchForget { entries } => {
                for (inode, nlookup) in entries {
                    self.forget(cx, *inode, *nlookup);
                }
                Ok(Reply::Unit)
            }
            Op::GetAttr { inode, handle } => {
                self.get_attr(cx, *inode, *handle).map(Reply::Attr)
            }
            Op::SetAttr { inode, changes } => {
                self.set_attr(cx, *inode, changes).map(Reply::Attr)
            }
            Op::MkDir { parent, name, mode } => {
                self.mk_dir(cx, *parent, name, *mode).map(Reply::Entry)
            }
            Op::MkNod {
                parent,
                name,
                mode,
                rdev,
            } => self.mk_nod(cx, *parent, name, *mode, *rdev).map(Reply::Entry),
            Op::Create {
                parent,
                name,
                mode,
                flags,
            } => self
                .create(cx, *parent, name, *mode, *flags)
                .map(|(entry, handle)| Reply::Created {
                    entry,
                    handle,
                    open_flags: 0,
                }),
            Op::Symlink {
                parent,
                name,
                target,
            } => self.symlink(cx, *parent, name, target).map(Reply::Entry),
            Op::Link {
                inode,
                new_parent,
                new_name,
            } => self.link(cx, *inode, *new_parent, new_name).map(Reply::Entry),
            Op::Rename {
                old_parent,
                old_name,
                new_parent,
                new_name,
            } => self
                .rename(cx, *old_parent, old_name, *new_parent, new_name)
                .map(|()| Reply::Unit),
            Op::Unlink { parent, name } => {
                self.unlink(cx, *parent, name).map(|()| Reply::Unit)
            }
            Op::RmDir { parent, name } => {
                self.rm_dir(cx, *parent, name).map(|()| Reply::Unit)
            }
            Op::OpenFile { inode, flags } => {
                self.open_file(cx, *inode, *flags).map(|handle| Reply::Opened {
                    handle,
                    open_flags: 0,
                })
            }
            Op::OpenDir { inode, flags } => {
                self.open_dir(cx, *inode, *flags).map(|handle| Reply::Opened {
                    handle,
                    open_flags: 0,
                })
            }
            Op::ReadFile {
                inode,
                handle,
                offset,
                size,
            } => self
                .read_file(cx, *inode, *handle, *offset, *size)
                .map(Reply::Data),
            Op::ReadDir {
                inode,
                handle,
                offset,
                size,
            } => self
                .read_dir(cx, *inode, *handle, *offset, *size)
                .map(Reply::Data),
            Op::WriteFile {
                inode,
                handle,
                offset,
                data,
            } => self
                .write_file(cx, *inode, *handle, *offset, data)
                .map(Reply::Written),
            Op::Flush {
                inode,
                handle,
                lock_owner,
            } => self
                .flush(cx, *inode, *handle, *lock_owner)
                .map(|()| Reply::Unit),
            Op::ReleaseFile {
                inode,
                handle,
                flags,
            } => self
                .release_file(cx, *inode, *handle, *flags)
                .map(|()| Reply::Unit),
            Op::ReleaseDir {
                inode,
                handle,
                flags,
            } => self
                .release_dir(cx, *inode, *handle, *flags)
                .map(|()| Reply::Unit),
            Op::Fsync {
                inode,
                handle,
                datasync,
            } => self
                .fsync(cx, *inode, *handle, *datasync)
                .map(|()| Reply::Unit),
            Op::FsyncDir {
                inode,
                handle,
                datasync,
            } => self
                .fsync_dir(cx, *inode, *handle, *datasync)
                .map(|()| Reply::Unit),
            Op::ReadSymlink { inode } => self.read_symlink(cx, *inode).map(Reply::Symlink),
            Op::StatFs { inode } => self.stat_fs(cx, *inode).map(Reply::Statfs),
            Op::GetXattr { inode, name, size } => {
                self.get_xattr(cx, *inode, name, *size).map(Reply::Xattr)
            }
            Op::ListXattr { inode, size } => {
                self.list_xattr(cx, *inode, *size).map(Reply::Xattr)
            }
            Op::SetXattr {
                inode,
                name,
                value,
                flags,
            } => self
                .set_xattr(cx, *inode, name, value, *flags)
                .map(|()| Reply::Unit),
            Op::RemoveXattr { inode, name } => {
                self.remove_xattr(cx, *inode, name).map(|()| Reply::Unit)
            }
            Op::Fallocate {
                inode,
                handle,
                offset,
                length,
                mode,
            } => self
                .fallocate(cx, *inode, *handle, *offset, *length, *mode)
                .map(|()| Reply::Unit),
            Op::Access { inode, mask } => self.access(cx, *inode, *mask).map(|()| Reply::Unit),
            // The dispatcher answers unknown ops itself; this arm exists for
            // completeness.
            Op::Unknown { .. } => Err(libc::ENOSYS),
        }
    }
}

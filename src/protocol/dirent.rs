//! Directory-listing records in the kernel's dirent format.
//!
//! ReadDir replies carry a packed sequence of `fuse_dirent` records, each
//! padded with NULs to an 8-byte boundary. The user filesystem formats its
//! listing with [`DirentBuffer`] and returns the bytes; the codec only
//! validates lengths.

use super::abi::{self, fuse_dirent, FUSE_DIRENT_SIZE};
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

/// File type constants matching dirent `d_type` values.
pub mod file_type {
    pub const UNKNOWN: u32 = 0;
    pub const FIFO: u32 = 1;
    pub const CHR: u32 = 2;
    pub const DIR: u32 = 4;
    pub const BLK: u32 = 6;
    pub const REG: u32 = 8;
    pub const LNK: u32 = 10;
    pub const SOCK: u32 = 12;

    /// Convert from a stat mode to a dirent type.
    pub fn from_mode(mode: u32) -> u32 {
        match mode & libc::S_IFMT as u32 {
            x if x == libc::S_IFDIR as u32 => DIR,
            x if x == libc::S_IFREG as u32 => REG,
            x if x == libc::S_IFLNK as u32 => LNK,
            x if x == libc::S_IFCHR as u32 => CHR,
            x if x == libc::S_IFBLK as u32 => BLK,
            x if x == libc::S_IFIFO as u32 => FIFO,
            x if x == libc::S_IFSOCK as u32 => SOCK,
            _ => UNKNOWN,
        }
    }
}

/// Accumulates dirent records up to a size limit.
///
/// The limit is the `size` field of the ReadDir request; a record that would
/// exceed it is rejected so the caller can stop iterating.
pub struct DirentBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl DirentBuffer {
    /// Create a buffer bounded by the request's size field.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.min(64 * 1024)),
            capacity,
        }
    }

    /// Append one record. `offset` is the value a subsequent ReadDir must
    /// pass to resume *after* this entry. Returns false (without writing)
    /// when the record does not fit.
    pub fn push(&mut self, ino: u64, offset: u64, typ: u32, name: &OsStr) -> bool {
        let name = name.as_bytes();
        let record_len = Self::record_size(name.len());
        if self.data.len() + record_len > self.capacity {
            return false;
        }

        let dirent = fuse_dirent {
            ino,
            off: offset,
            namelen: name.len() as u32,
            r#type: typ,
        };
        self.data.extend_from_slice(&abi::to_bytes(&dirent));
        self.data.extend_from_slice(name);
        // NUL padding to the next 8-byte boundary
        let padded = record_len - FUSE_DIRENT_SIZE - name.len();
        self.data.extend(std::iter::repeat(0u8).take(padded));
        true
    }

    /// Bytes a record with a name of `name_len` bytes occupies.
    pub fn record_size(name_len: usize) -> usize {
        (FUSE_DIRENT_SIZE + name_len + 7) & !7
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Consume the buffer and return the packed records.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_alignment() {
        assert_eq!(DirentBuffer::record_size(1), 32);
        assert_eq!(DirentBuffer::record_size(8), 32);
        assert_eq!(DirentBuffer::record_size(9), 40);
    }

    #[test]
    fn test_push_and_pack() {
        let mut buf = DirentBuffer::new(4096);
        assert!(buf.push(2, 1, file_type::REG, OsStr::new("hello.txt")));
        assert_eq!(buf.len(), DirentBuffer::record_size(9));

        let bytes = buf.into_bytes();
        // namelen sits after ino + off
        assert_eq!(&bytes[16..20], &9u32.to_le_bytes());
        assert_eq!(&bytes[24..33], b"hello.txt");
        // NUL padding to the 8-byte boundary
        assert!(bytes[33..40].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_capacity_limit() {
        let mut buf = DirentBuffer::new(40);
        assert!(buf.push(2, 1, file_type::REG, OsStr::new("a")));
        assert!(!buf.push(3, 2, file_type::REG, OsStr::new("too-long-name")));
        assert_eq!(buf.len(), 32);
    }

    #[test]
    fn test_file_type_from_mode() {
        assert_eq!(
            file_type::from_mode(libc::S_IFDIR as u32 | 0o755),
            file_type::DIR
        );
        assert_eq!(
            file_type::from_mode(libc::S_IFREG as u32 | 0o644),
            file_type::REG
        );
        assert_eq!(file_type::from_mode(libc::S_IFLNK as u32), file_type::LNK);
    }
}

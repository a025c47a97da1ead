//! Message buffers for the device channel.
//!
//! One pooled input buffer holds one kernel request from device read to
//! reply; the pool is bounded, and an empty pool blocks the reader, which is
//! the connection's flow-control mechanism (the kernel stops issuing requests
//! when the device stops being read).
//!
//! Reply frames are built in an [`OutMessage`]: a header region, a fixed
//! per-opcode part, and an optional caller-owned payload that is written with
//! a vectored syscall instead of being copied into the frame.

use crate::protocol::abi::{self, fuse_out_header, FUSE_OUT_HEADER_SIZE};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::IoSlice;

/// Slack past the negotiated max_write for the request header and the fixed
/// per-opcode body.
pub const IN_BUFFER_HEADROOM: usize = 4096;

/// An 8-byte-aligned byte region.
///
/// Kernel request bodies are images of 8-byte-aligned C structs; keeping the
/// backing store aligned means in-place views of the payload stay valid.
struct AlignedBuf {
    words: Box<[u64]>,
}

impl AlignedBuf {
    fn new(capacity: usize) -> Self {
        Self {
            words: vec![0u64; capacity.div_ceil(8)].into_boxed_slice(),
        }
    }

    fn as_bytes(&self) -> &[u8] {
        // SAFETY: the u64 allocation is valid, initialized, and exactly
        // len*8 bytes; reinterpreting as bytes narrows alignment.
        unsafe {
            std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.words.len() * 8)
        }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and we hold the unique reference.
        unsafe {
            std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.words.len() * 8)
        }
    }
}

/// Bounded MPMC pool of input buffers.
///
/// Cloning is cheap; clones share the same free list.
#[derive(Clone)]
pub struct BufferPool {
    tx: Sender<AlignedBuf>,
    rx: Receiver<AlignedBuf>,
}

impl BufferPool {
    /// A pool of `count` buffers of `capacity` bytes each.
    pub fn new(count: usize, capacity: usize) -> Self {
        let (tx, rx) = bounded(count);
        for _ in 0..count {
            tx.send(AlignedBuf::new(capacity))
                .expect("pool channel sized to hold all buffers");
        }
        Self { tx, rx }
    }

    /// Take a buffer, blocking until one is free.
    pub fn acquire(&self) -> InBuffer {
        let buf = self
            .rx
            .recv()
            .expect("pool free list never disconnects while a handle exists");
        InBuffer {
            buf: Some(buf),
            filled: 0,
            pool: self.tx.clone(),
        }
    }
}

/// A pooled request buffer; returns itself to the pool on drop.
pub struct InBuffer {
    buf: Option<AlignedBuf>,
    filled: usize,
    pool: Sender<AlignedBuf>,
}

impl InBuffer {
    /// The writable region for a device read.
    pub fn writable(&mut self) -> &mut [u8] {
        self.buf.as_mut().expect("buffer present until drop").as_bytes_mut()
    }

    /// Record how many bytes the device read filled.
    pub fn set_filled(&mut self, n: usize) {
        debug_assert!(n <= self.buf.as_ref().map_or(0, |b| b.as_bytes().len()));
        self.filled = n;
    }

    /// The frame read from the device.
    pub fn frame(&self) -> &[u8] {
        &self.buf.as_ref().expect("buffer present until drop").as_bytes()[..self.filled]
    }
}

impl Drop for InBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            // A full pool or a torn-down pool both mean nobody wants the
            // buffer back.
            let _ = self.pool.send(buf);
        }
    }
}

/// A reply frame under construction.
///
/// The frame starts with a zeroed header; [`OutMessage::finish`] stamps the
/// unique id, errno and total length. Large payloads (file reads, directory
/// listings) are attached with [`OutMessage::set_payload`] and written
/// zero-copy as a second I/O vector.
pub struct OutMessage {
    frame: Vec<u8>,
    payload: Option<Vec<u8>>,
}

impl OutMessage {
    /// A frame with room for `fixed_size` bytes after the header.
    pub fn new(fixed_size: usize) -> Self {
        let mut frame = Vec::with_capacity(FUSE_OUT_HEADER_SIZE + fixed_size);
        frame.resize(FUSE_OUT_HEADER_SIZE, 0);
        Self {
            frame,
            payload: None,
        }
    }

    /// Append a wire struct, truncated to `wire_size` (version-dependent
    /// structs shrink from the tail).
    pub fn append_struct<T: serde::Serialize>(&mut self, value: &T, wire_size: usize) {
        let bytes = abi::to_bytes(value);
        debug_assert!(wire_size <= bytes.len());
        self.frame.extend_from_slice(&bytes[..wire_size]);
    }

    /// Append raw bytes to the fixed part.
    pub fn append(&mut self, bytes: &[u8]) {
        self.frame.extend_from_slice(bytes);
    }

    /// Attach a caller-owned payload written after the fixed part without
    /// copying.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        debug_assert!(self.payload.is_none());
        self.payload = Some(payload);
    }

    /// Total frame length including header and payload. Never zero: the
    /// header is always present.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.frame.len() + self.payload.as_ref().map_or(0, Vec::len)
    }

    /// Stamp the header. An error reply drops any accumulated body: the
    /// kernel expects a bare header with a negated errno.
    pub fn finish(&mut self, unique: u64, errno: i32) {
        if errno != 0 {
            self.frame.truncate(FUSE_OUT_HEADER_SIZE);
            self.payload = None;
        }
        let header = fuse_out_header {
            len: self.len() as u32,
            error: -errno,
            unique,
        };
        self.frame[..FUSE_OUT_HEADER_SIZE].copy_from_slice(&abi::to_bytes(&header));
    }

    /// I/O vectors for a single gathered write.
    pub fn io_slices(&self) -> Vec<IoSlice<'_>> {
        match &self.payload {
            Some(payload) if !payload.is_empty() => {
                vec![IoSlice::new(&self.frame), IoSlice::new(payload)]
            }
            _ => vec![IoSlice::new(&self.frame)],
        }
    }

    /// The payload slice, if one is attached.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

//! The kernel connection: one reader, many repliers.
//!
//! # Architecture
//!
//! ```text
//! device fd ──read──> InBuffer ──decode──> OpRequest ──┐
//!     ^                                                 │ handler tasks
//!     └───────writev─── OutMessage <──encode── Reply <──┘
//! ```
//!
//! A single reader pulls frames off the device, decodes them, registers each
//! op in the in-flight map and hands it out. Handler tasks reply directly:
//! each reply is one gathered write, so the pump is never blocked behind a
//! slow handler. Interrupt frames cancel the target op's token through the
//! in-flight map; whichever of reply and interrupt removes/reaches the entry
//! first wins the race.
//!
//! The handshake runs inside [`Connection::new`]: no op can be read, much
//! less dispatched, before the init reply is on the wire.

mod init;

use crate::buffer::{BufferPool, InBuffer, OutMessage, IN_BUFFER_HEADROOM};
use crate::error::Error;
use crate::mount::DeviceChannel;
use crate::ops::{self, Op, Reply, RequestHeader};
use crate::protocol::abi::{self, Opcode, FUSE_IN_HEADER_SIZE, FUSE_INIT_IN_SIZE};
use crate::protocol::Protocol;
use crate::server::MountOptions;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const TARGET: &str = "fuse_dev::conn";

/// Interrupts whose target is not (yet) in the in-flight map are parked here
/// and reconciled at registration. Bounded well above the kernel's
/// outstanding-request cap.
const PENDING_INTERRUPT_CAP: usize = 64;

/// Per-op context handed to the user callback.
///
/// The token is a child of the connection's token: closing the connection
/// cancels every op, a kernel interrupt cancels just its target.
/// Cancellation is advisory — the callback may still return a real result.
#[derive(Clone)]
pub struct OpContext {
    unique: u64,
    uid: u32,
    gid: u32,
    pid: u32,
    token: CancellationToken,
}

impl OpContext {
    /// The kernel's request id; interrupts reference it.
    pub fn unique(&self) -> u64 {
        self.unique
    }

    /// Credentials of the calling process. With writeback caching enabled
    /// the pid may be zero.
    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// True once the kernel interrupted this op or the connection began
    /// shutting down. Long-running callbacks should poll this and return
    /// EINTR.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the op is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
impl OpContext {
    pub(crate) fn for_tests(unique: u64, uid: u32, gid: u32, pid: u32) -> Self {
        Self {
            unique,
            uid,
            gid,
            pid,
            token: CancellationToken::new(),
        }
    }
}

struct Inner {
    device: Arc<DeviceChannel>,
    proto: Protocol,
    max_write: u32,
    inflight: DashMap<u64, CancellationToken>,
    pending_interrupts: Mutex<VecDeque<u64>>,
    shutdown: CancellationToken,
}

impl Inner {
    /// Write one finished frame. ENOENT means the kernel aborted the request
    /// (an interrupt won the race); ENODEV means the filesystem is already
    /// unmounted. Neither is an error worth failing the handler for.
    fn send_msg(&self, msg: OutMessage) -> Result<(), Error> {
        let slices = msg.io_slices();
        match self.device.send(&slices) {
            Ok(n) if n == msg.len() => Ok(()),
            Ok(n) => Err(Error::protocol(format!(
                "short device write: {} of {} bytes",
                n,
                msg.len()
            ))),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {
                debug!(target: TARGET, "reply dropped: request aborted by kernel");
                Ok(())
            }
            Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                debug!(target: TARGET, "reply dropped: filesystem unmounted");
                Ok(())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn send_error(&self, unique: u64, errno: i32) {
        if let Err(e) = self.send_msg(ops::encode_error(unique, errno)) {
            warn!(target: TARGET, unique, error = %e, "failed to write error reply");
        }
    }

    /// Cancel the target op, or park the interrupt if the target is not in
    /// the map yet.
    fn deliver_interrupt(&self, target: u64) {
        if let Some(entry) = self.inflight.get(&target) {
            debug!(target: TARGET, unique = target, "interrupting in-flight op");
            entry.value().cancel();
            return;
        }
        let mut pending = self.pending_interrupts.lock().unwrap();
        if pending.len() == PENDING_INTERRUPT_CAP {
            pending.pop_front();
        }
        pending.push_back(target);
    }

    fn take_pending_interrupt(&self, unique: u64) -> bool {
        let mut pending = self.pending_interrupts.lock().unwrap();
        if let Some(pos) = pending.iter().position(|&u| u == unique) {
            pending.remove(pos);
            true
        } else {
            false
        }
    }
}

/// A decoded request, coupled to its buffer and its in-flight registration.
///
/// Dropping the request deregisters it; [`OpRequest::reply`] consumes it, so
/// a second reply is unrepresentable. The pooled buffer rides along until
/// then, which keeps the pool's bound on in-flight ops honest.
pub struct OpRequest {
    header: RequestHeader,
    op: Op,
    context: OpContext,
    inner: Arc<Inner>,
    registered: bool,
    _buf: Option<InBuffer>,
}

impl OpRequest {
    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    pub fn context(&self) -> &OpContext {
        &self.context
    }

    /// Encode and write the reply for this op.
    ///
    /// No-reply ops (Forget, BatchForget) write nothing regardless of the
    /// result. A payload larger than the negotiated max_write, or a reply
    /// variant that does not fit the opcode, is downgraded to EIO and logged
    /// as a protocol error — a malformed frame is never sent.
    pub fn reply(self, result: Result<Reply, i32>) -> Result<(), Error> {
        if self.op.is_no_reply() {
            return Ok(());
        }

        let unique = self.header.unique;
        let msg = match result {
            Err(errno) => ops::encode_error(unique, errno.abs()),
            Ok(reply) => {
                if reply.payload_len() > self.inner.max_write as usize {
                    warn!(
                        target: TARGET,
                        unique,
                        op = self.op.name(),
                        payload = reply.payload_len(),
                        max_write = self.inner.max_write,
                        "reply payload exceeds negotiated max_write"
                    );
                    ops::encode_error(unique, libc::EIO)
                } else {
                    match self.header.op_code() {
                        Some(opcode) => match ops::encode_reply(opcode, reply, self.inner.proto) {
                            Ok(mut msg) => {
                                msg.finish(unique, 0);
                                msg
                            }
                            Err(e) => {
                                error!(target: TARGET, unique, error = %e, "reply mismatch");
                                ops::encode_error(unique, libc::EIO)
                            }
                        },
                        // Unknown ops only ever carry an errno result.
                        None => ops::encode_error(unique, libc::ENOSYS),
                    }
                }
            }
        };

        self.inner.send_msg(msg)
        // Drop now removes the in-flight entry and recycles the buffer.
    }
}

impl Drop for OpRequest {
    fn drop(&mut self) {
        if self.registered {
            self.inner.inflight.remove(&self.header.unique);
        }
    }
}

/// A live kernel connection.
///
/// Reading is `&mut self`: the device frames messages, and a second reader
/// would interleave partial frames. Replies go through the [`OpRequest`]s
/// this hands out and may run on any thread.
pub struct Connection {
    inner: Arc<Inner>,
    read_pool: BufferPool,
}

impl Connection {
    /// Perform the init handshake and return the negotiated connection.
    ///
    /// The first frame must be Init; anything else is a protocol error. A
    /// kernel whose major is below the library's is refused with EPROTO on
    /// the wire and [`Error::Handshake`] here; anything else negotiates
    /// down to the common version.
    pub async fn new(device: Arc<DeviceChannel>, opts: &MountOptions) -> Result<Self, Error> {
        let pool = BufferPool::new(
            opts.max_background as usize + 1,
            opts.max_write as usize + IN_BUFFER_HEADROOM,
        );

        let buf = read_frame(&device, &pool, &CancellationToken::new())
            .await?
            .ok_or_else(|| Error::protocol("device closed before init"))?;
        let (header, body) = split_frame(buf.frame())?;

        if header.op_code() != Some(Opcode::Init) {
            return Err(Error::protocol(format!(
                "first frame is opcode {}, expected init",
                header.opcode
            )));
        }
        if body.len() < FUSE_INIT_IN_SIZE {
            return Err(Error::protocol("init body shorter than fixed part"));
        }
        let init_in: abi::fuse_init_in =
            abi::from_bytes(body).ok_or_else(|| Error::protocol("undecodable init body"))?;

        debug!(
            target: TARGET,
            kernel_major = init_in.major,
            kernel_minor = init_in.minor,
            kernel_flags = init_in.flags,
            "init received"
        );

        let negotiated = match init::negotiate(&init_in, opts) {
            Ok(n) => n,
            Err(errno) => {
                let mut msg = OutMessage::new(0);
                msg.finish(header.unique, errno);
                let _ = device.send(&msg.io_slices());
                return Err(Error::Handshake {
                    major: init_in.major,
                    minor: init_in.minor,
                });
            }
        };

        let (out, size) = init::init_out(&negotiated, opts);
        let mut msg = OutMessage::new(size);
        msg.append_struct(&out, size);
        msg.finish(header.unique, 0);

        let inner = Inner {
            device,
            proto: negotiated.proto,
            max_write: negotiated.max_write,
            inflight: DashMap::new(),
            pending_interrupts: Mutex::new(VecDeque::new()),
            shutdown: CancellationToken::new(),
        };
        inner.send_msg(msg)?;

        debug!(
            target: TARGET,
            major = negotiated.proto.major,
            minor = negotiated.proto.minor,
            flags = negotiated.flags,
            max_write = negotiated.max_write,
            "init replied"
        );

        Ok(Self {
            inner: Arc::new(inner),
            read_pool: pool,
        })
    }

    /// The negotiated protocol version.
    pub fn protocol(&self) -> Protocol {
        self.inner.proto
    }

    /// Read, decode and register the next op.
    ///
    /// Returns `None` at end-of-stream (unmount or [`Connection::close`]).
    /// Interrupt, Destroy and stray Init frames are consumed internally and
    /// never surface. Bodies that fail to decode are answered EIO and
    /// skipped; only a truncated frame or device failure is fatal.
    pub async fn read_op(&mut self) -> Result<Option<OpRequest>, Error> {
        loop {
            if self.inner.shutdown.is_cancelled() {
                return Ok(None);
            }
            let Some(buf) = self.next_frame().await? else {
                return Ok(None);
            };

            let (header, body) = split_frame(buf.frame())?;

            let Some(opcode) = header.op_code() else {
                debug!(
                    target: TARGET,
                    opcode = header.opcode,
                    unique = header.unique,
                    "unknown opcode"
                );
                return Ok(Some(self.track(
                    header,
                    Op::Unknown {
                        opcode: header.opcode,
                    },
                    buf,
                )));
            };

            match opcode {
                Opcode::Interrupt => {
                    match abi::from_bytes::<abi::fuse_interrupt_in>(body) {
                        Some(interrupt) if body.len() >= 8 => {
                            self.inner.deliver_interrupt(interrupt.unique)
                        }
                        _ => warn!(target: TARGET, "malformed interrupt body"),
                    }
                    continue;
                }
                Opcode::Init => {
                    warn!(target: TARGET, unique = header.unique, "unexpected init after handshake");
                    self.inner.send_error(header.unique, libc::EIO);
                    continue;
                }
                Opcode::Destroy => {
                    debug!(target: TARGET, "destroy received");
                    let mut msg = OutMessage::new(0);
                    msg.finish(header.unique, 0);
                    if let Err(e) = self.inner.send_msg(msg) {
                        warn!(target: TARGET, error = %e, "failed to acknowledge destroy");
                    }
                    continue;
                }
                _ => {}
            }

            match ops::decode_body(&header, opcode, body, self.inner.proto) {
                Ok(op) => return Ok(Some(self.track(header, op, buf))),
                Err(e) => {
                    warn!(target: TARGET, unique = header.unique, error = %e, "undecodable request body");
                    self.inner.send_error(header.unique, libc::EIO);
                    continue;
                }
            }
        }
    }

    /// Cancel every in-flight op and stop the reader.
    ///
    /// The device itself closes when the last op drops; the actual unmount is
    /// the [`crate::mount::Mount`]'s business.
    pub fn close(&self) {
        debug!(target: TARGET, "connection closing");
        self.inner.shutdown.cancel();
    }

    /// Register the op in the in-flight map and wrap it for the dispatcher.
    fn track(&self, header: RequestHeader, op: Op, buf: InBuffer) -> OpRequest {
        let token = self.inner.shutdown.child_token();
        let registered = !op.is_no_reply();
        if registered {
            self.inner.inflight.insert(header.unique, token.clone());
            // An interrupt may have overtaken this registration.
            if self.inner.take_pending_interrupt(header.unique) {
                token.cancel();
            }
        }
        OpRequest {
            context: OpContext {
                unique: header.unique,
                uid: header.uid,
                gid: header.gid,
                pid: header.pid,
                token,
            },
            header,
            op,
            inner: Arc::clone(&self.inner),
            registered,
            _buf: Some(buf),
        }
    }

    async fn next_frame(&self) -> Result<Option<InBuffer>, Error> {
        read_frame(&self.inner.device, &self.read_pool, &self.inner.shutdown).await
    }
}

/// Block on pool acquisition and the device read off the async runtime.
async fn read_frame(
    device: &Arc<DeviceChannel>,
    pool: &BufferPool,
    shutdown: &CancellationToken,
) -> Result<Option<InBuffer>, Error> {
    let worker = {
        let device = Arc::clone(device);
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<InBuffer>, Error> {
            let mut buf = pool.acquire();
            let n = device.recv(buf.writable())?;
            if n == 0 {
                return Ok(None);
            }
            buf.set_filled(n);
            Ok(Some(buf))
        })
    };

    tokio::select! {
        res = worker => {
            res.map_err(|e| Error::protocol(format!("reader task failed: {e}")))?
        }
        _ = shutdown.cancelled() => Ok(None),
    }
}

/// Split a frame into its header and body, verifying the framing invariant.
fn split_frame(frame: &[u8]) -> Result<(RequestHeader, &[u8]), Error> {
    if frame.len() < FUSE_IN_HEADER_SIZE {
        return Err(Error::protocol(format!(
            "frame of {} bytes is shorter than the request header",
            frame.len()
        )));
    }
    let hdr: abi::fuse_in_header =
        abi::from_bytes(frame).ok_or_else(|| Error::protocol("undecodable request header"))?;
    if hdr.len as usize != frame.len() {
        return Err(Error::protocol(format!(
            "truncated frame: header says {} bytes, read {}",
            hdr.len,
            frame.len()
        )));
    }
    Ok((
        RequestHeader {
            unique: hdr.unique,
            opcode: hdr.opcode,
            nodeid: hdr.nodeid,
            uid: hdr.uid,
            gid: hdr.gid,
            pid: hdr.pid,
        },
        &frame[FUSE_IN_HEADER_SIZE..],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(opcode: u32, unique: u64, body: &[u8]) -> Vec<u8> {
        let header = abi::fuse_in_header {
            len: (FUSE_IN_HEADER_SIZE + body.len()) as u32,
            opcode,
            unique,
            nodeid: 1,
            uid: 0,
            gid: 0,
            pid: 0,
            padding: 0,
        };
        let mut bytes = abi::to_bytes(&header);
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn test_split_frame() {
        let bytes = frame(Opcode::Lookup as u32, 7, b"name\0");
        let (header, body) = split_frame(&bytes).unwrap();
        assert_eq!(header.unique, 7);
        assert_eq!(header.op_code(), Some(Opcode::Lookup));
        assert_eq!(body, b"name\0");
    }

    #[test]
    fn test_split_frame_too_short() {
        assert!(split_frame(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_split_frame_length_mismatch() {
        let mut bytes = frame(Opcode::Lookup as u32, 7, b"name\0");
        bytes.push(0); // one stray byte past the declared length
        assert!(split_frame(&bytes).is_err());
    }

    #[test]
    fn test_pending_interrupt_reconciled() {
        let inner = Inner {
            device: Arc::new(DeviceChannel::new(dummy_fd())),
            proto: Protocol::new(7, 31),
            max_write: 128 * 1024,
            inflight: DashMap::new(),
            pending_interrupts: Mutex::new(VecDeque::new()),
            shutdown: CancellationToken::new(),
        };

        // Interrupt arrives before its target is registered.
        inner.deliver_interrupt(42);
        assert!(inner.take_pending_interrupt(42));
        assert!(!inner.take_pending_interrupt(42));
    }

    #[test]
    fn test_pending_interrupts_bounded() {
        let inner = Inner {
            device: Arc::new(DeviceChannel::new(dummy_fd())),
            proto: Protocol::new(7, 31),
            max_write: 128 * 1024,
            inflight: DashMap::new(),
            pending_interrupts: Mutex::new(VecDeque::new()),
            shutdown: CancellationToken::new(),
        };

        for target in 0..(PENDING_INTERRUPT_CAP as u64 + 10) {
            inner.deliver_interrupt(target);
        }
        // The oldest entries were evicted.
        assert!(!inner.take_pending_interrupt(0));
        assert!(inner.take_pending_interrupt(PENDING_INTERRUPT_CAP as u64 + 9));
    }

    fn dummy_fd() -> std::os::fd::OwnedFd {
        let (a, _b) = nix::sys::socket::socketpair(
            nix::sys::socket::AddressFamily::Unix,
            nix::sys::socket::SockType::SeqPacket,
            None,
            nix::sys::socket::SockFlag::empty(),
        )
        .unwrap();
        a
    }
}

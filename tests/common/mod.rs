//! Shared fake-kernel fixture.
//!
//! Stands in for the FUSE character device with a seqpacket socketpair:
//! message boundaries are preserved, so one read yields one frame exactly as
//! `/dev/fuse` behaves. The fixture plays the kernel's half of the protocol
//! with raw ABI frames; every received reply is checked against the framing
//! invariant (header `len` == frame length) on the way in.

// Allow dead code - these utilities are conditionally used by different test files
#![allow(dead_code)]

use fuse_dev::protocol::abi::{self, Opcode};
use fuse_dev::{DeviceChannel, Mount};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Initialize tracing once for the test process.
static TRACING_INIT: Once = Once::new();

pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    });
}

/// A parsed reply frame.
#[derive(Debug)]
pub struct ReplyFrame {
    pub unique: u64,
    pub error: i32,
    pub body: Vec<u8>,
}

/// The kernel's end of the device channel.
pub struct FakeKernel {
    fd: OwnedFd,
    unique: AtomicU64,
}

impl FakeKernel {
    /// A fake kernel wired to a [`Mount`] the server can serve.
    pub fn mount_pair() -> (FakeKernel, Mount) {
        init_tracing();
        let (kernel_fd, device_fd) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::empty(),
        )
        .expect("socketpair");
        (
            FakeKernel {
                fd: kernel_fd,
                unique: AtomicU64::new(2),
            },
            Mount::from_channel(DeviceChannel::new(device_fd)),
        )
    }

    /// Next request id.
    pub fn next_unique(&self) -> u64 {
        self.unique.fetch_add(2, Ordering::SeqCst)
    }

    /// Write one raw request frame.
    pub fn send_raw(&self, opcode: u32, unique: u64, nodeid: u64, body: &[u8]) {
        let header = abi::fuse_in_header {
            len: (abi::FUSE_IN_HEADER_SIZE + body.len()) as u32,
            opcode,
            unique,
            nodeid,
            uid: 1000,
            gid: 1000,
            pid: 4242,
            padding: 0,
        };
        let mut frame = abi::to_bytes(&header);
        frame.extend_from_slice(body);
        nix::unistd::write(self.fd.as_fd(), &frame).expect("write request frame");
    }

    pub fn send_op(&self, opcode: Opcode, unique: u64, nodeid: u64, body: &[u8]) {
        self.send_raw(opcode as u32, unique, nodeid, body);
    }

    /// Init from a kernel speaking the given version.
    pub fn send_init_versioned(&self, major: u32, minor: u32, flags: u32) -> u64 {
        let body = abi::to_bytes(&abi::fuse_init_in {
            major,
            minor,
            max_readahead: 128 * 1024,
            flags,
        });
        self.send_op(Opcode::Init, 1, 0, &body);
        1
    }

    /// Standard init: modern major-7 kernel offering the given flags.
    pub fn send_init(&self, minor: u32, flags: u32) -> u64 {
        self.send_init_versioned(7, minor, flags)
    }

    pub fn send_lookup(&self, parent: u64, name: &str) -> u64 {
        let unique = self.next_unique();
        let mut body = name.as_bytes().to_vec();
        body.push(0);
        self.send_op(Opcode::Lookup, unique, parent, &body);
        unique
    }

    pub fn send_getattr(&self, inode: u64) -> u64 {
        let unique = self.next_unique();
        let body = abi::to_bytes(&abi::fuse_getattr_in {
            getattr_flags: 0,
            dummy: 0,
            fh: 0,
        });
        self.send_op(Opcode::Getattr, unique, inode, &body);
        unique
    }

    pub fn send_statfs(&self, inode: u64) -> u64 {
        let unique = self.next_unique();
        self.send_op(Opcode::Statfs, unique, inode, &[]);
        unique
    }

    pub fn send_forget(&self, inode: u64, nlookup: u64) {
        let unique = self.next_unique();
        let body = abi::to_bytes(&abi::fuse_forget_in { nlookup });
        self.send_op(Opcode::Forget, unique, inode, &body);
    }

    pub fn send_create(&self, parent: u64, name: &str, unique: u64) {
        let mut body = abi::to_bytes(&abi::fuse_create_in {
            flags: (libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL) as u32,
            mode: 0o644,
            umask: 0o022,
            padding: 0,
        });
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        self.send_op(Opcode::Create, unique, parent, &body);
    }

    pub fn send_read(&self, inode: u64, handle: u64, size: u32, unique: u64) {
        let body = abi::to_bytes(&abi::fuse_read_in {
            fh: handle,
            offset: 0,
            size,
            read_flags: 0,
            lock_owner: 0,
            flags: 0,
            padding: 0,
        });
        self.send_op(Opcode::Read, unique, inode, &body);
    }

    pub fn send_readdir(&self, inode: u64, handle: u64, size: u32) -> u64 {
        let unique = self.next_unique();
        let body = abi::to_bytes(&abi::fuse_read_in {
            fh: handle,
            offset: 0,
            size,
            read_flags: 0,
            lock_owner: 0,
            flags: 0,
            padding: 0,
        });
        self.send_op(Opcode::Readdir, unique, inode, &body);
        unique
    }

    pub fn send_write(&self, inode: u64, handle: u64, offset: u64, data: &[u8]) -> u64 {
        let unique = self.next_unique();
        let mut body = abi::to_bytes(&abi::fuse_write_in {
            fh: handle,
            offset,
            size: data.len() as u32,
            write_flags: 0,
            lock_owner: 0,
            flags: 0,
            padding: 0,
        });
        body.extend_from_slice(data);
        self.send_op(Opcode::Write, unique, inode, &body);
        unique
    }

    pub fn send_interrupt(&self, target: u64) {
        let unique = self.next_unique();
        let body = abi::to_bytes(&abi::fuse_interrupt_in { unique: target });
        self.send_op(Opcode::Interrupt, unique, 0, &body);
    }

    /// Read one reply frame, asserting the framing invariant.
    pub fn recv_reply(&self) -> ReplyFrame {
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        let n = poll(&mut fds, PollTimeout::from(5000u16)).expect("poll");
        assert!(n > 0, "timed out waiting for a reply frame");

        let mut buf = vec![0u8; 256 * 1024];
        let n = nix::unistd::read(self.fd.as_raw_fd(), &mut buf).expect("read reply frame");
        assert!(
            n >= abi::FUSE_OUT_HEADER_SIZE,
            "reply frame shorter than header: {} bytes",
            n
        );

        let header: abi::fuse_out_header = abi::from_bytes(&buf[..n]).expect("parse reply header");
        assert_eq!(
            header.len as usize, n,
            "reply header len does not match frame length"
        );
        ReplyFrame {
            unique: header.unique,
            error: header.error,
            body: buf[abi::FUSE_OUT_HEADER_SIZE..n].to_vec(),
        }
    }

    /// True when no frame arrives within `millis`.
    pub fn assert_silence(&self, millis: u16) {
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        let n = poll(&mut fds, PollTimeout::from(millis)).expect("poll");
        assert_eq!(n, 0, "unexpected frame from the library");
    }

    /// Handshake with default offers and swallow the init reply.
    pub fn handshake(&self) -> ReplyFrame {
        self.send_init(31, abi::FUSE_ASYNC_READ | abi::FUSE_BIG_WRITES);
        let reply = self.recv_reply();
        assert_eq!(reply.unique, 1);
        assert_eq!(reply.error, 0);
        reply
    }
}

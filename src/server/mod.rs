//! The dispatcher: ops in, replies out.
//!
//! One task reads ops off the connection; each op gets its own handler task.
//! The user callback runs on the blocking pool (it is allowed to block on
//! real I/O) and the reply is written from the same handler, so slow
//! operations never stall the pump. Unknown opcodes and writes to a
//! read-only mount are answered before user code is ever involved.

mod config;
mod filesystem;

pub use config::MountOptions;
pub use filesystem::Filesystem;

use crate::conn::{Connection, OpRequest};
use crate::error::Error;
use crate::mount::Mount;
use crate::ops::Op;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const TARGET: &str = "fuse_dev::server";

/// Serves a [`Filesystem`] over a mounted device channel.
pub struct Server<F> {
    fs: Arc<F>,
    options: MountOptions,
}

impl<F: Filesystem + 'static> Server<F> {
    /// A server with default options.
    pub fn new(fs: F) -> Self {
        Self::with_options(fs, MountOptions::default())
    }

    pub fn with_options(fs: F, options: MountOptions) -> Self {
        Self {
            fs: Arc::new(fs),
            options,
        }
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    /// Run until the filesystem is unmounted or the connection fails.
    ///
    /// Performs the init handshake, then pumps ops to handler tasks. At
    /// end-of-stream, outstanding handlers are drained before the mount is
    /// released (running its unmount hook).
    pub async fn serve(self, mount: Mount) -> Result<(), Error> {
        let mut conn = Connection::new(mount.channel(), &self.options).await?;
        info!(
            target: TARGET,
            major = conn.protocol().major,
            minor = conn.protocol().minor,
            "session started"
        );

        let result = self.pump(&mut conn).await;

        conn.close();
        drop(mount);
        debug!(target: TARGET, "session ended");
        result
    }

    async fn pump(&self, conn: &mut Connection) -> Result<(), Error> {
        let mut handlers: JoinSet<()> = JoinSet::new();

        let result = loop {
            match conn.read_op().await {
                Ok(Some(req)) => {
                    // Reap whatever already finished; keeps the set small.
                    while handlers.try_join_next().is_some() {}

                    if matches!(req.op(), Op::Unknown { .. }) {
                        if let Err(e) = req.reply(Err(libc::ENOSYS)) {
                            warn!(target: TARGET, error = %e, "failed to refuse unknown op");
                        }
                        continue;
                    }

                    if self.options.read_only && req.op().mutates() {
                        if let Err(e) = req.reply(Err(libc::EROFS)) {
                            warn!(target: TARGET, error = %e, "failed to reject write on read-only mount");
                        }
                        continue;
                    }

                    let fs = Arc::clone(&self.fs);
                    handlers.spawn(handle_op(fs, req));
                }
                Ok(None) => break Ok(()),
                Err(e) => {
                    error!(target: TARGET, error = %e, "connection failed");
                    break Err(e);
                }
            }
        };

        // Stop spawning, let outstanding handlers finish.
        while handlers.join_next().await.is_some() {}
        result
    }
}

/// Run one op: user callback on the blocking pool, reply from the same task.
async fn handle_op<F: Filesystem + 'static>(fs: Arc<F>, req: OpRequest) {
    let op_name = req.op().name();
    let unique = req.header().unique;

    let outcome = tokio::task::spawn_blocking(move || {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            fs.dispatch(req.context(), req.op())
        }))
        .unwrap_or_else(|_| {
            error!(target: TARGET, unique, op = op_name, "filesystem callback panicked");
            Err(libc::EIO)
        });
        req.reply(result)
    })
    .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(target: TARGET, unique, op = op_name, error = %e, "reply failed")
        }
        Err(e) => error!(target: TARGET, unique, op = op_name, "handler task failed: {e}"),
    }
}

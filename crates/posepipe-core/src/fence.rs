//! Completion signals shared between the compute and inference stages.
//!
//! A [`SyncFence`] owns a file descriptor that becomes readable once the
//! producing hardware queue has finished. It is move-only: it is either
//! consumed by [`SyncFence::wait`] or closed when dropped, never both.
//!
//! Host backends produce fences with [`fence_pair`], which is backed by an
//! anonymous pipe. The producer writes a single byte on completion. A
//! producer dropped without signaling closes the pipe, and the waiter
//! reports the work as abandoned.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};

use crate::error::{PoseError, Result};

/// A hardware completion signal, or the empty signal.
#[derive(Debug, Default)]
pub struct SyncFence {
    fd: Option<OwnedFd>,
}

impl SyncFence {
    /// The empty signal: the associated work is already complete.
    pub fn none() -> Self {
        Self { fd: None }
    }

    /// Take ownership of an exported fence descriptor.
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self { fd: Some(fd) }
    }

    pub fn is_valid(&self) -> bool {
        self.fd.is_some()
    }

    /// Raw descriptor, for logging only.
    pub fn raw_fd(&self) -> Option<i32> {
        self.fd.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Release the descriptor to a consumer that will wait on it itself.
    pub fn into_fd(self) -> Option<OwnedFd> {
        self.fd
    }

    /// Block until the signal fires. The empty signal returns immediately.
    pub fn wait(self) -> Result<()> {
        let Some(fd) = self.fd else {
            return Ok(());
        };
        let raw = fd.as_raw_fd();
        let mut file = File::from(fd);
        let mut byte = [0u8; 1];
        loop {
            match file.read(&mut byte) {
                Ok(1) => {
                    tracing::trace!(fd = raw, "completion signal fired");
                    return Ok(());
                }
                Ok(_) => {
                    return Err(PoseError::Graphics(
                        "completion signal abandoned before the work finished".into(),
                    ))
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Producer side of a host completion signal.
#[derive(Debug)]
pub struct FenceSignaler {
    fd: OwnedFd,
}

impl FenceSignaler {
    /// Mark the work as complete. Consumes the signaler.
    pub fn signal(self) -> Result<()> {
        let mut file = File::from(self.fd);
        match file.write_all(&[1]) {
            Ok(()) => Ok(()),
            // The consumer already dropped its end; nobody is waiting.
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Create a connected signaler/fence pair.
pub fn fence_pair() -> Result<(FenceSignaler, SyncFence)> {
    let (reader, writer) = std::io::pipe()?;
    Ok((
        FenceSignaler {
            fd: OwnedFd::from(writer),
        },
        SyncFence::from_fd(OwnedFd::from(reader)),
    ))
}

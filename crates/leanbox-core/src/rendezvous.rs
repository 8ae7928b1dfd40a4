//! Typed one-shot rendezvous channels.
//!
//! A [`Channel`] is a pipe created before a fork. Both processes inherit
//! both ends; the sending side calls [`Channel::send`], the receiving side
//! calls [`Channel::into_receiver`] (which drops its copy of the write end)
//! and then [`Receiver::recv`]. Every path drops both ends, and a receiver
//! whose peer died observes end-of-file as `Ok(None)` instead of hanging.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::marker::PhantomData;

use leanbox_common::error::{LeanboxError, Result};
use nix::fcntl::OFlag;
use nix::unistd::Pid;

/// A fixed-size message carried by a [`Channel`].
pub trait Message: Sized {
    /// Encoded size in bytes; at most `PIPE_BUF` so writes are atomic.
    const SIZE: usize;

    /// Encodes `self` into `buf`, which is exactly [`Self::SIZE`] bytes.
    fn encode(&self, buf: &mut [u8]);

    /// Decodes a message from exactly [`Self::SIZE`] bytes.
    fn decode(buf: &[u8]) -> Option<Self>;
}

/// The single byte a launcher writes to let a waiting child proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release;

const RELEASE_BYTE: u8 = b'r';

impl Message for Release {
    const SIZE: usize = 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = RELEASE_BYTE;
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        (buf[0] == RELEASE_BYTE).then_some(Self)
    }
}

impl Message for Pid {
    const SIZE: usize = std::mem::size_of::<i32>();

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.as_raw().to_ne_bytes());
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        let raw = i32::from_ne_bytes(buf.try_into().ok()?);
        Some(Self::from_raw(raw))
    }
}

/// Both ends of a one-shot pipe carrying a single `M`.
#[derive(Debug)]
pub struct Channel<M> {
    reader: File,
    writer: File,
    _message: PhantomData<M>,
}

impl<M: Message> Channel<M> {
    /// Creates the pipe. Both ends are close-on-exec, so a workload
    /// exec'd inside an instance never inherits them.
    ///
    /// # Errors
    ///
    /// Returns an error if `pipe2(2)` fails.
    pub fn open() -> Result<Self> {
        let (reader, writer) = nix::unistd::pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| LeanboxError::rendezvous(format!("cannot create pipe: {e}")))?;
        Ok(Self {
            reader: File::from(reader),
            writer: File::from(writer),
            _message: PhantomData,
        })
    }

    /// Writes `message` and closes both ends.
    ///
    /// The read end stays open until the write completes, so the write
    /// cannot fail with `EPIPE` if the peer already exited.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or is short.
    pub fn send(self, message: &M) -> Result<()> {
        let mut buf = vec![0_u8; M::SIZE];
        message.encode(&mut buf);
        let mut writer = &self.writer;
        writer
            .write_all(&buf)
            .map_err(|e| LeanboxError::rendezvous(format!("cannot write to channel: {e}")))?;
        tracing::trace!(bytes = M::SIZE, "rendezvous message sent");
        Ok(())
    }

    /// Drops the write end and returns the receiving half.
    #[must_use]
    pub fn into_receiver(self) -> Receiver<M> {
        let Self { reader, writer, .. } = self;
        drop(writer);
        Receiver {
            reader,
            _message: PhantomData,
        }
    }
}

/// Receiving half of a [`Channel`].
#[derive(Debug)]
pub struct Receiver<M> {
    reader: File,
    _message: PhantomData<M>,
}

impl<M: Message> Receiver<M> {
    /// Blocks until a message arrives or every write end is closed.
    ///
    /// Returns `Ok(None)` if the channel was closed without a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails, the message is truncated, or it
    /// does not decode.
    pub fn recv(mut self) -> Result<Option<M>> {
        let mut buf = vec![0_u8; M::SIZE];
        let mut filled = 0;
        while filled < M::SIZE {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(LeanboxError::rendezvous(format!(
                        "cannot read from channel: {e}"
                    )));
                }
            }
        }
        match filled {
            0 => Ok(None),
            n if n < M::SIZE => Err(LeanboxError::rendezvous(format!(
                "channel closed after {n} of {} bytes",
                M::SIZE
            ))),
            _ => M::decode(&buf)
                .map(Some)
                .ok_or_else(|| LeanboxError::rendezvous("undecodable channel message")),
        }
    }
}

use std::fmt;
use std::io;
use std::sync::{Arc, Weak};

use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;

use crate::cancel::CancellationToken;
use crate::error::{Cancelled, TransientReadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Reliable,
    Unreliable,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Reliable => "reliable",
            ChannelKind::Unreliable => "unreliable",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generation of open channels to the relay. Both handles are opened,
/// installed and closed together.
#[derive(Debug)]
pub struct Channels {
    generation: u64,
    reliable: TcpStream,
    unreliable: UdpSocket,
    closed: CancellationToken,
}

impl Channels {
    pub(crate) fn new(generation: u64, reliable: TcpStream, unreliable: UdpSocket) -> Self {
        Self {
            generation,
            reliable,
            unreliable,
            closed: CancellationToken::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn unreliable(&self) -> &UdpSocket {
        &self.unreliable
    }

    /// Marks this generation closed. Pending and future reads fail with
    /// [`TransientReadError::Closed`]. The sockets are released when the
    /// supervisor drops its reference, since receivers only hold one for the
    /// duration of a read.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub async fn recv_datagram(&self, buf: &mut [u8]) -> Result<usize, TransientReadError> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(TransientReadError::Closed),
            received = self.unreliable.recv(buf) => Ok(received?),
        }
    }

    /// Reads whatever bytes are available on the reliable channel.
    /// `buf` must not be empty.
    pub async fn read_reliable(&self, buf: &mut [u8]) -> Result<usize, TransientReadError> {
        loop {
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(TransientReadError::Closed),
                ready = self.reliable.readable() => ready?,
            }

            match self.reliable.try_read(buf) {
                Ok(0) => return Err(TransientReadError::Eof),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// A receiver's hold on one generation. Keeps no strong reference between
/// reads, so the supervisor closing the generation releases its sockets.
#[derive(Debug, Clone)]
pub(crate) struct GenerationRef {
    generation: u64,
    channels: Weak<Channels>,
}

impl GenerationRef {
    pub(crate) fn new(channels: &Arc<Channels>) -> Self {
        Self {
            generation: channels.generation(),
            channels: Arc::downgrade(channels),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// The channels for one read, or `None` once the generation is closed.
    pub(crate) fn upgrade(&self) -> Option<Arc<Channels>> {
        self.channels
            .upgrade()
            .filter(|channels| !channels.is_closed())
    }
}

/// Read-only view of the channels the supervisor currently has installed.
///
/// Receivers resolve the handle through this on every (re)acquisition instead
/// of holding on to a handle across reconnects.
#[derive(Debug, Clone)]
pub struct ChannelWatch {
    rx: watch::Receiver<Option<Arc<Channels>>>,
}

impl ChannelWatch {
    pub(crate) fn new(rx: watch::Receiver<Option<Arc<Channels>>>) -> Self {
        Self { rx }
    }

    pub fn current(&self) -> Option<Arc<Channels>> {
        self.rx.borrow().clone()
    }

    pub fn current_generation(&self) -> Option<u64> {
        self.rx.borrow().as_ref().map(|channels| channels.generation())
    }

    /// Waits for an open generation other than `stale`.
    ///
    /// Fails with [`Cancelled`] on shutdown or once the supervisor is gone.
    pub async fn wait_for_open(
        &mut self,
        cancel: &CancellationToken,
        stale: Option<u64>,
    ) -> Result<Arc<Channels>, Cancelled> {
        let rx = &mut self.rx;
        let installed = async move {
            rx.wait_for(|current| {
                current.as_ref().is_some_and(|channels| {
                    Some(channels.generation()) != stale && !channels.is_closed()
                })
            })
            .await
            .ok()
            .and_then(|current| (*current).clone())
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            channels = installed => channels.ok_or(Cancelled),
        }
    }

    /// Like [`wait_for_open`](Self::wait_for_open), but keeps only a weak
    /// reference to the generation it finds.
    pub(crate) async fn acquire(
        &mut self,
        cancel: &CancellationToken,
        stale: Option<u64>,
    ) -> Result<GenerationRef, Cancelled> {
        let channels = self.wait_for_open(cancel, stale).await?;
        Ok(GenerationRef::new(&channels))
    }
}

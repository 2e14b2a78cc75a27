use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time;

use crate::backoff::BackoffState;
use crate::cancel::CancellationToken;
use crate::channels::{ChannelKind, ChannelWatch, Channels};
use crate::config::RelayConfig;
use crate::error::{Cancelled, ConnectionError};
use crate::events::{ChannelFault, ConnectionEvent};

const EVENT_CAPACITY: usize = 64;
const FAULT_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Opens the two channel roles against the relay address.
pub trait Dialer: Send + Sync + 'static {
    fn dial_reliable(&self, address: &str) -> impl Future<Output = io::Result<TcpStream>> + Send;

    fn dial_unreliable(
        &self,
        address: &str,
    ) -> impl Future<Output = io::Result<UdpSocket>> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    async fn dial_reliable(&self, address: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn dial_unreliable(&self, address: &str) -> io::Result<UdpSocket> {
        let remote = lookup_host(address).await?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", address),
            )
        })?;

        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        Ok(socket)
    }
}

/// Sending half of the fault channel, held by the receivers.
#[derive(Debug, Clone)]
pub struct FaultReporter {
    tx: mpsc::Sender<ChannelFault>,
}

impl FaultReporter {
    /// Returns false if the report was not queued. A full queue means the
    /// supervisor already has faults pending, so the report is redundant.
    pub fn report(&self, fault: ChannelFault) -> bool {
        match self.tx.try_send(fault) {
            Ok(()) => true,
            Err(TrySendError::Full(fault)) => {
                log::debug!(
                    "Fault on {} channel (generation {}) coalesced with pending reports",
                    fault.channel,
                    fault.generation
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

pub fn fault_channel() -> (FaultReporter, mpsc::Receiver<ChannelFault>) {
    let (tx, rx) = mpsc::channel(FAULT_CAPACITY);
    (FaultReporter { tx }, rx)
}

/// Owns the channel handles and the connection state. The only component
/// that opens, replaces or closes channels.
pub struct Supervisor<D = TcpDialer> {
    config: RelayConfig,
    dialer: D,
    backoff: BackoffState,
    state: watch::Sender<ConnectionState>,
    channels: watch::Sender<Option<Arc<Channels>>>,
    events: broadcast::Sender<ConnectionEvent>,
    generation: u64,
}

impl Supervisor<TcpDialer> {
    pub fn new(config: RelayConfig) -> Self {
        Self::with_dialer(config, TcpDialer)
    }
}

impl<D: Dialer> Supervisor<D> {
    pub fn with_dialer(config: RelayConfig, dialer: D) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (channels, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            backoff: BackoffState::new(config.backoff()),
            config,
            dialer,
            state,
            channels,
            events,
            generation: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn channels(&self) -> ChannelWatch {
        ChannelWatch::new(self.channels.subscribe())
    }

    pub fn current_generation(&self) -> Option<u64> {
        self.channels
            .borrow()
            .as_ref()
            .map(|channels| channels.generation())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<ConnectionEvent> {
        self.events.clone()
    }

    /// Opens the reliable channel, then the unreliable one. Nothing stays open
    /// if either step fails.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.teardown();
        self.set_state(ConnectionState::Connecting);

        match self.open_channels().await {
            Ok((reliable, unreliable)) => {
                let generation = self.install(reliable, unreliable);
                self.set_state(ConnectionState::Connected);
                log::info!(
                    "Connected to relay at {} (generation {})",
                    self.config.address,
                    generation
                );
                self.emit(ConnectionEvent::Connected { generation });
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to connect to relay at {}: {}", self.config.address, e);
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Runs one reconnection episode: closes both channels and reopens them as
    /// a pair, backing off between failed attempts. Retries until it succeeds
    /// or `cancel` fires.
    pub async fn reconnect(&mut self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        self.backoff.reset();
        self.set_state(ConnectionState::Reconnecting);

        loop {
            if cancel.is_cancelled() {
                self.shutdown();
                return Err(Cancelled);
            }

            log::info!("Attempting to reconnect to relay at {}", self.config.address);
            self.teardown();

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                opened = self.open_channels() => Some(opened),
            };

            let error = match opened {
                None => {
                    self.shutdown();
                    return Err(Cancelled);
                }
                Some(Ok((reliable, unreliable))) => {
                    let attempts = self.backoff.attempt() + 1;
                    let generation = self.install(reliable, unreliable);
                    self.backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    log::info!(
                        "Reconnected to relay after {} attempt(s) (generation {})",
                        attempts,
                        generation
                    );
                    self.emit(ConnectionEvent::Reconnected {
                        generation,
                        attempts,
                    });
                    return Ok(());
                }
                Some(Err(e)) => e,
            };

            let attempt = self.backoff.attempt();
            let delay = self.backoff.next_delay();
            if let Some(channel) = error.channel() {
                log::error!(
                    "Failed to reopen relay {} channel: {}, retrying in {:?}",
                    channel,
                    error,
                    delay
                );
            } else {
                log::error!("Failed to reconnect to relay: {}, retrying in {:?}", error, delay);
            }
            self.emit(ConnectionEvent::ReconnectScheduled {
                attempt,
                delay,
                error: error.to_string(),
            });

            if cancel.sleep(delay).await.is_err() {
                self.shutdown();
                return Err(Cancelled);
            }
        }
    }

    /// Waits for fault reports and runs a reconnection episode for each one
    /// that concerns the current generation. Returns on cancellation, or once
    /// every receiver has dropped its reporter.
    pub async fn run(
        &mut self,
        cancel: &CancellationToken,
        mut faults: mpsc::Receiver<ChannelFault>,
    ) {
        loop {
            let fault = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                fault = faults.recv() => fault,
            };

            let Some(fault) = fault else {
                if !cancel.is_cancelled() {
                    log::info!("All channel receivers stopped, closing relay connection");
                }
                self.shutdown();
                return;
            };

            if self.current_generation() != Some(fault.generation) {
                log::debug!(
                    "Ignoring stale fault on {} channel (generation {})",
                    fault.channel,
                    fault.generation
                );
                continue;
            }

            log::warn!(
                "Relay {} channel failed (generation {}): {}",
                fault.channel,
                fault.generation,
                fault.reason
            );
            self.emit(ConnectionEvent::ChannelFault(fault));

            if self.reconnect(cancel).await.is_err() {
                return;
            }
        }
    }

    /// Closes both channels and leaves the supervisor disconnected.
    pub fn shutdown(&mut self) {
        self.teardown();
        if self.state() != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
            log::info!("Disconnected from relay at {}", self.config.address);
            self.emit(ConnectionEvent::Disconnected);
        }
    }

    async fn open_channels(&self) -> Result<(TcpStream, UdpSocket), ConnectionError> {
        let address = self.config.address.as_str();
        let timeout = self.config.connect_timeout;

        log::info!("Connecting to relay TCP socket at {}", address);
        let reliable = time::timeout(timeout, self.dialer.dial_reliable(address))
            .await
            .map_err(|_| ConnectionError::Timeout {
                channel: ChannelKind::Reliable,
                timeout,
            })?
            .map_err(ConnectionError::Reliable)?;

        // `reliable` is dropped, and so closed, if the UDP side fails.
        log::info!("Connecting to relay UDP socket at {}", address);
        let unreliable = time::timeout(timeout, self.dialer.dial_unreliable(address))
            .await
            .map_err(|_| ConnectionError::Timeout {
                channel: ChannelKind::Unreliable,
                timeout,
            })?
            .map_err(ConnectionError::Unreliable)?;

        Ok((reliable, unreliable))
    }

    fn install(&mut self, reliable: TcpStream, unreliable: UdpSocket) -> u64 {
        self.generation += 1;
        let channels = Arc::new(Channels::new(self.generation, reliable, unreliable));
        if let Some(previous) = self.channels.send_replace(Some(channels)) {
            previous.close();
        }
        self.generation
    }

    fn teardown(&mut self) {
        if let Some(previous) = self.channels.send_replace(None) {
            log::debug!("Closing relay channels (generation {})", previous.generation());
            previous.close();
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl<D> Drop for Supervisor<D> {
    fn drop(&mut self) {
        if let Some(previous) = self.channels.send_replace(None) {
            previous.close();
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

use crate::cancel::CancellationToken;
use crate::channels::{ChannelKind, ChannelWatch, Channels, GenerationRef};
use crate::config::RelayConfig;
use crate::error::{Cancelled, TransientReadError};
use crate::events::ChannelFault;
use crate::packet::{Keepalive, MediaPacket, Packet};
use crate::stats::ReceiveStats;
use crate::supervisor::FaultReporter;

/// Pause after a read on a closed channel, before resolving the handle again.
const CLOSED_READ_PAUSE: Duration = Duration::from_millis(5);

/// Reads the unreliable channel and routes datagrams to the keepalive and
/// media queues.
pub struct MediaReceiver {
    channels: ChannelWatch,
    faults: FaultReporter,
    stats: Arc<ReceiveStats>,
    max_datagram_size: usize,
    max_consecutive_errors: u32,
    receive_timeout: Option<Duration>,
}

impl MediaReceiver {
    pub fn new(
        config: &RelayConfig,
        channels: ChannelWatch,
        faults: FaultReporter,
        stats: Arc<ReceiveStats>,
    ) -> Self {
        Self {
            channels,
            faults,
            stats,
            max_datagram_size: config.max_datagram_size,
            max_consecutive_errors: config.max_consecutive_read_errors,
            receive_timeout: config.receive_timeout,
        }
    }

    /// Runs until cancelled, or until a queue consumer has gone away.
    ///
    /// A full queue blocks the loop, so slow consumers throttle intake.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        keepalives: mpsc::Sender<Keepalive>,
        media: mpsc::Sender<MediaPacket>,
    ) -> Result<(), Cancelled> {
        let mut buf = vec![0u8; self.max_datagram_size];
        let mut consecutive_errors = 0u32;
        let mut current = self.channels.acquire(&cancel, None).await?;

        loop {
            if cancel.is_cancelled() {
                log::info!("Stopping relay packet receiver due to cancellation");
                return Err(Cancelled);
            }

            // The strong reference lives only as long as this read.
            let received = match current.upgrade() {
                Some(channels) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    received = self.receive(&channels, &mut buf) => Some(received),
                },
                None => Some(Err(TransientReadError::Closed)),
            };
            let Some(received) = received else {
                continue;
            };

            match received {
                Ok(len) => {
                    consecutive_errors = 0;
                    if !self.route(&cancel, &buf[..len], &keepalives, &media).await? {
                        log::info!("Packet consumers closed, stopping relay packet receiver");
                        return Ok(());
                    }
                }
                Err(TransientReadError::Closed) => {
                    if cancel.is_cancelled() {
                        continue;
                    }
                    log::error!(
                        "Relay UDP channel closed (generation {})",
                        current.generation()
                    );
                    cancel.sleep(CLOSED_READ_PAUSE).await?;
                    current = self
                        .channels
                        .acquire(&cancel, Some(current.generation()))
                        .await?;
                    consecutive_errors = 0;
                }
                Err(TransientReadError::Empty) => {
                    log::warn!("0 bytes read from relay UDP channel");
                }
                Err(error @ TransientReadError::TimedOut(_)) => {
                    log::warn!("Relay UDP channel idle: {}", error);
                    current = self
                        .fail(&cancel, current.generation(), error.to_string())
                        .await?;
                    consecutive_errors = 0;
                }
                Err(error) => {
                    self.stats.record_read_error();
                    consecutive_errors += 1;
                    log::error!("Relay UDP channel read error: {}", error);

                    if self.max_consecutive_errors > 0
                        && consecutive_errors >= self.max_consecutive_errors
                    {
                        let reason = format!(
                            "{} consecutive read errors, last: {}",
                            consecutive_errors, error
                        );
                        current = self.fail(&cancel, current.generation(), reason).await?;
                        consecutive_errors = 0;
                    }
                }
            }
        }
    }

    async fn receive(
        &self,
        channels: &Channels,
        buf: &mut [u8],
    ) -> Result<usize, TransientReadError> {
        let received = match self.receive_timeout {
            Some(limit) => time::timeout(limit, channels.recv_datagram(buf))
                .await
                .map_err(|_| TransientReadError::TimedOut(limit))?,
            None => channels.recv_datagram(buf).await,
        }?;

        if received == 0 {
            return Err(TransientReadError::Empty);
        }
        Ok(received)
    }

    /// Returns false once the target queue's consumer is gone.
    async fn route(
        &self,
        cancel: &CancellationToken,
        datagram: &[u8],
        keepalives: &mpsc::Sender<Keepalive>,
        media: &mpsc::Sender<MediaPacket>,
    ) -> Result<bool, Cancelled> {
        let delivered = match Packet::classify(datagram) {
            Packet::Malformed { len } => {
                self.stats.record_malformed(len);
                log::debug!("Relay UDP packet smaller than expected ({} bytes)", len);
                true
            }
            Packet::Keepalive(keepalive) => {
                self.stats.record_keepalive(datagram.len());
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Cancelled),
                    sent = keepalives.send(keepalive) => sent.is_ok(),
                }
            }
            Packet::Media(packet) => {
                self.stats.record_media(datagram.len());
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Cancelled),
                    sent = media.send(packet) => sent.is_ok(),
                }
            }
        };
        Ok(delivered)
    }

    /// Reports the current generation as faulty and waits for the supervisor
    /// to install a replacement.
    async fn fail(
        &mut self,
        cancel: &CancellationToken,
        generation: u64,
        reason: String,
    ) -> Result<GenerationRef, Cancelled> {
        self.stats.record_fault();
        self.faults.report(ChannelFault::new(
            ChannelKind::Unreliable,
            generation,
            reason,
        ));
        self.channels.acquire(cancel, Some(generation)).await
    }
}

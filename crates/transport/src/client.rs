use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::cancel::CancellationToken;
use crate::channels::ChannelWatch;
use crate::config::RelayConfig;
use crate::control::ControlReceiver;
use crate::error::{Cancelled, ConnectionError};
use crate::events::ConnectionEvent;
use crate::media::MediaReceiver;
use crate::message::Dispatch;
use crate::packet::{Keepalive, MediaPacket};
use crate::stats::{ReceiveStats, StatsSnapshot};
use crate::supervisor::{ConnectionState, Dialer, Supervisor, TcpDialer, fault_channel};

/// Consumer ends of the packet queues fed by the media receiver.
#[derive(Debug)]
pub struct RelayStreams {
    pub keepalives: mpsc::Receiver<Keepalive>,
    pub media: mpsc::Receiver<MediaPacket>,
}

/// A connected relay client: the supervisor and both receivers running as
/// tasks until [`shutdown`](Self::shutdown).
pub struct RelayClient {
    cancel: CancellationToken,
    state: watch::Receiver<ConnectionState>,
    channels: ChannelWatch,
    events: broadcast::Sender<ConnectionEvent>,
    stats: Arc<ReceiveStats>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl RelayClient {
    pub async fn connect<M, D>(
        config: RelayConfig,
        dispatch: D,
    ) -> Result<(Self, RelayStreams), ConnectionError>
    where
        M: DeserializeOwned + Send + 'static,
        D: Dispatch<M> + 'static,
    {
        Self::connect_with(config, TcpDialer, dispatch).await
    }

    pub async fn connect_with<T, M, D>(
        config: RelayConfig,
        dialer: T,
        dispatch: D,
    ) -> Result<(Self, RelayStreams), ConnectionError>
    where
        T: Dialer,
        M: DeserializeOwned + Send + 'static,
        D: Dispatch<M> + 'static,
    {
        config.validate()?;

        let mut supervisor = Supervisor::with_dialer(config.clone(), dialer);
        supervisor.connect().await?;

        let cancel = CancellationToken::new();
        let stats = Arc::new(ReceiveStats::default());
        let (faults, fault_rx) = fault_channel();
        let (keepalive_tx, keepalives) = mpsc::channel(config.queue_capacity);
        let (media_tx, media) = mpsc::channel(config.queue_capacity);

        let state = supervisor.state_watch();
        let channels = supervisor.channels();
        let events = supervisor.event_sender();

        let media_receiver = MediaReceiver::new(
            &config,
            supervisor.channels(),
            faults.clone(),
            Arc::clone(&stats),
        );
        let control_receiver = ControlReceiver::<M>::new(
            &config,
            supervisor.channels(),
            faults,
            Arc::clone(&stats),
        );

        let mut tasks = Vec::with_capacity(3);
        tasks.push((
            "media receiver",
            tokio::spawn(log_exit(
                "media receiver",
                media_receiver.run(cancel.clone(), keepalive_tx, media_tx),
            )),
        ));
        tasks.push((
            "control receiver",
            tokio::spawn(log_exit(
                "control receiver",
                control_receiver.run(cancel.clone(), dispatch),
            )),
        ));
        tasks.push(("supervisor", {
            let cancel = cancel.clone();
            tokio::spawn(async move { supervisor.run(&cancel, fault_rx).await })
        }));

        let client = Self {
            cancel,
            state,
            channels,
            events,
            stats,
            tasks,
        };
        Ok((client, RelayStreams { keepalives, media }))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn channels(&self) -> ChannelWatch {
        self.channels.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Cancels every task and waits for all of them to finish.
    pub async fn shutdown(mut self) {
        log::info!("Shutting down relay client");
        self.cancel.cancel();

        for (name, handle) in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                log::error!("Relay {} task failed: {}", name, e);
            }
        }
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        // Tasks observe this and wind down on their own.
        self.cancel.cancel();
    }
}

async fn log_exit<F>(name: &'static str, task: F)
where
    F: Future<Output = Result<(), Cancelled>>,
{
    match task.await {
        Ok(()) => log::info!("Relay {} stopped", name),
        Err(Cancelled) => log::debug!("Relay {} cancelled", name),
    }
}

pub mod backoff;
pub mod cancel;
pub mod channels;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod media;
pub mod message;
pub mod packet;
pub mod stats;
pub mod supervisor;

pub use backoff::{Backoff, BackoffState};
pub use cancel::CancellationToken;
pub use channels::{ChannelKind, ChannelWatch, Channels};
pub use client::{RelayClient, RelayStreams};
pub use config::{
    DEFAULT_PORT, FRAME_LENGTH, GUID_LENGTH, KEEPALIVE_INTERVAL, MAX_BACKOFF, MAX_DATAGRAM_SIZE,
    RelayConfig,
};
pub use control::ControlReceiver;
pub use error::{Cancelled, ConfigError, ConnectionError, ProtocolDecodeError, TransientReadError};
pub use events::{ChannelFault, ConnectionEvent};
pub use media::MediaReceiver;
pub use message::{ControlMessage, Dispatch, FnDispatch, decode_record};
pub use packet::{Keepalive, MediaPacket, Packet, PeerId};
pub use stats::{ReceiveStats, StatsSnapshot};
pub use supervisor::{
    ConnectionState, Dialer, FaultReporter, Supervisor, TcpDialer, fault_channel,
};

//! A STOMP 1.2 client for reliable ordered byte streams.
//!
//! The crate keeps a session with a broker alive: it frames and unframes
//! STOMP wire traffic, exchanges heart-beats in both directions, fans
//! incoming MESSAGE frames out to per-subscription queues, and when the link
//! drops it re-dials, replays the CONNECT handshake and re-issues every
//! subscription under a configurable retry policy, without disturbing the
//! application-facing message streams.
//!
//! ```ignore
//! use osmium_stomp::{options, AckMode, Conn};
//!
//! let conn = Conn::dial(
//!     "localhost:61613",
//!     vec![options::authenticate("guest", "guest"), options::heartbeat(0, 1000)],
//! )
//! .await?;
//!
//! let mut sub = conn.subscribe("/queue/test", vec![options::ack(AckMode::Client)]).await?;
//! conn.send("/queue/test", "text/plain", b"hello".to_vec(), vec![]).await?;
//!
//! while let Some(msg) = sub.recv().await {
//!     println!("<- {:?}", msg.body());
//!     conn.ack(&msg, vec![]).await?;
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod options;
pub mod subscription;
pub mod transport;

pub use codec::{StompCodec, StompItem};
pub use connection::{negotiate_heartbeats, parse_heartbeat_header, Conn, ConnectConfig};
pub use error::{exponential_backoff, RetryPolicy, StompError};
pub use frame::{BrokerError, Connected, Frame, Message};
pub use options::Opt;
pub use subscription::{AckMode, Subscription};
pub use transport::{BoxedTransport, Connector, TcpConnector, Transport};

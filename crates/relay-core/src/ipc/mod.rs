//! Local IPC with a running runtime process.
//!
//! Length-prefixed JSON frames over a Unix socket or Windows named pipe.
//! The client sends correlated action requests; the runtime answers with
//! replies and pushes unsolicited events.
//!
//! # Architecture
//!
//! - **Protocol**: frame types, identities and framing
//! - **Transport**: correlation table and the ordered reader task
//! - **Router**: subscription registry with wildcard source matching
//! - **Connection**: subscribe / publish / send on top of both
//! - **Connect**: channel rendezvous with a launched runtime

pub mod connect;
pub mod connection;
pub mod protocol;
pub mod router;
pub mod transport;

pub use connect::{channel_path, connect_channel};
pub use connection::{Actions, Connection, MESSAGE_EVENT_TYPE};
pub use protocol::{ActionRequest, CorrelationId, Event, FrameKind, Identity, InboundFrame};
pub use router::{EventRouter, Listener, ListenerId, SubscriptionKey};
pub use transport::TransportConnection;

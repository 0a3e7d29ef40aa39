//! Remote call channel to the management service.
//!
//! - [`protocol`]: wire envelopes (`Call`, `Reply`) and error codes
//! - [`RpcChannel`]: one exclusive connection, one call at a time
//! - [`Connector`]: produces fresh channels (Unix socket or TCP)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ RemoteAdapter                                                │
//! │  ┌──────────────┐   connect()   ┌──────────────────────────┐ │
//! │  │  Connector   │──────────────▶│  RpcChannel              │ │
//! │  └──────────────┘               │  call / call_streaming   │ │
//! │         ▲                       │  upgrade ─▶ RawConnection│ │
//! │         │  reconnect after      └────────────┬─────────────┘ │
//! │         │  upgrade or poison                 │ JSON lines    │
//! └─────────┼────────────────────────────────────┼───────────────┘
//!           │                                    ▼
//!                                        management service
//! ```

mod channel;
mod connector;
pub mod protocol;

pub use channel::{Connection, RawConnection, ReplyStream, RpcChannel};
#[cfg(unix)]
pub use connector::UnixConnector;
pub use connector::{Connector, TcpConnector};
pub use protocol::{Call, RemoteError, RemoteErrorCode, Reply};

//! Message transport for the debuggee bind protocol.
//!
//! One [`Connection`] carries whole [`Message`]s in both directions: requests
//! from the driver, replies and redirected output lines from the server. The
//! wire format is a `Content-Length` header followed by a JSON body, one frame
//! per message.

pub mod bindings;
pub mod codec;
mod connection;
pub mod requests;
pub mod responses;

use serde::{Deserialize, Serialize};

pub use connection::{
    attach_stream, Connection, Listener, CONNECT_TIMEOUT, CONNECT_TRY_DELAY,
};

/// Version number exchanged in the `Ok` handshake a BindServer sends to every
/// admitted client. Clients built against a different version must not
/// proceed past the handshake.
pub const PROTOCOL_VERSION: i32 = 2;

/// Default port a BindServer listens on when neither the bind file nor the
/// command line overrides it.
pub const DEFAULT_BIND_PORT: u16 = 9045;

/// Default port for the driver/debuggee synchronization pipe. Always distinct
/// from the bind port: the pipe never goes through the BindServer.
pub const DEFAULT_PIPE_PORT: u16 = 9046;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Request(requests::Request),
    Response(responses::Response),
}

pub mod error;
pub mod hub;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{HandlerError, RealtimeError};
pub use hub::{ChannelKey, RealtimeHub};
pub use protocol::{ClientFrame, ControlFrame, DataFrame, HandshakeParams, ServerFrame};
pub use session::{ChannelHandler, ConnectionState, RealtimeSession, Subscription};
pub use transport::{Connection, CredentialProvider, CredentialStore, Credentials, ScopedCredentials, Transport};
pub use ws::WsTransport;

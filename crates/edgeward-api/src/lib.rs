// edgeward-api: control-plane wire protocol, persistent control channel,
// and shared HTTP transport configuration.
//
// Nothing in this crate knows about firewall rules or routes. Desired state
// travels as raw JSON and is interpreted by `edgeward-core`.

pub mod backoff;
pub mod channel;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use backoff::{BackoffPolicy, FailureCause};
pub use channel::{
    ChannelConfig, ChannelEvent, ChannelHandle, Connection, ConnectionMachine, ConnectionState,
    Connector, ControlChannel, FrameSink, FrameStream,
};
pub use error::Error;
pub use protocol::{
    DomainReport, Hello, Inbound, InterfaceReport, MetricsReport, OperationFailure, Outbound,
    OutcomeReport, StatusReport,
};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::WebSocketConnector;

//! WebSocket transport for the control channel.
//!
//! Text frames carry protocol JSON. Pings are answered by tungstenite
//! automatically; a close frame ends the session and lets the channel back
//! off and reconnect.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use edgeward_api::{ChannelConfig, ControlChannel, WebSocketConnector};
//! use tokio_util::sync::CancellationToken;
//!
//! let connector = WebSocketConnector::new(Url::parse("wss://cp.example.net/agent")?);
//! let config = ChannelConfig::new("edge-01", token);
//! let (handle, mut inbound, _task) =
//!     ControlChannel::spawn(Arc::new(connector), config, CancellationToken::new());
//!
//! while let Some(frame) = inbound.recv().await {
//!     println!("{}", frame.kind());
//! }
//! ```

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use url::Url;

use crate::channel::{Connection, Connector};
use crate::error::Error;

/// Opens control-channel sessions over `ws://` or `wss://`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Connection, Error> {
        tracing::info!(url = %self.url, "connecting to control plane");

        let uri: tungstenite::http::Uri = self
            .url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::Connection(e.to_string()))?;

        let request = ClientRequestBuilder::new(uri).with_header(
            "User-Agent",
            concat!("edgeward/", env!("CARGO_PKG_VERSION")),
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        tracing::debug!("WebSocket transport established");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| Error::Connection(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, Error>(Message::text(text))));

        let stream = read.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = frame.map_or((1005, String::new()), |cf| {
                        (u16::from(cf.code), cf.reason.as_str().to_owned())
                    });
                    Some(Err(Error::Closed { code, reason }))
                }
                Ok(Message::Ping(_)) => {
                    tracing::trace!("WebSocket ping");
                    None
                }
                // Binary, Pong, Frame -- ignore
                Ok(_) => None,
                Err(e) => Some(Err(Error::Connection(e.to_string()))),
            })
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

//! Game socket client and the clock sync session that runs over it.

mod sync;

pub use sync::{run_sync, SyncEvent, SyncSession};

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::config::SessionContext;
use crate::protocol::{ClientEvent, ServerEvent};

/// Socket connection to the game server
pub struct SocketConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl SocketConnection {
    /// Connect with the session credentials appended to the URL
    pub async fn connect(socket_url: &str, session: &SessionContext) -> Result<Self> {
        let url = socket_url_with_session(socket_url, session)?;
        info!(url = %socket_url, "Connecting to game socket");

        // Nagle off: sync requests go out back to back and are timing sensitive
        let (ws, _) = connect_async_with_config(url.as_str(), None, true)
            .await
            .map_err(|e| anyhow!("Failed to connect to game socket: {}", e))?;
        Ok(Self { ws })
    }

    pub async fn send_event(&mut self, event: &ClientEvent) -> Result<()> {
        let json = event.to_json()?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }

    /// Wait for the next server event, skipping non-text frames
    pub async fn next_event(&mut self) -> Result<ServerEvent> {
        loop {
            let Some(msg) = self.ws.next().await else {
                return Err(anyhow!("Game socket closed"));
            };
            match msg? {
                Message::Text(text) => match ServerEvent::from_json(&text) {
                    Ok(event) => return Ok(event),
                    Err(e) => warn!(error = %e, "Ignoring undecodable server event"),
                },
                Message::Close(frame) => {
                    debug!(?frame, "Close frame received");
                    return Err(anyhow!("Game socket closed"));
                }
                _ => {}
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

fn socket_url_with_session(socket_url: &str, session: &SessionContext) -> Result<Url> {
    let mut url =
        Url::parse(socket_url).with_context(|| format!("Invalid socket URL {}", socket_url))?;
    url.query_pairs_mut().extend_pairs(session.query());
    Ok(url)
}

//! WebSocket client connection to a single Nostr relay.
//!
//! One [`RelayConn`] is owned by exactly one broadcast or fetch task for the
//! duration of that operation; connections are never shared or pooled, so a
//! misbehaving relay can only ever hurt its own task.

use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async, tungstenite::Message, WebSocketStream};
use url::Url;

use crate::event::{Event, Filter};

/// Network timeouts and proxy settings shared by all relay operations.
#[derive(Debug, Clone)]
pub struct NetOpts {
    /// Budget for TCP connect plus WebSocket handshake.
    pub connect_timeout: Duration,
    /// Budget for a publish acknowledgment after the event is sent.
    pub ack_timeout: Duration,
    /// Optional SOCKS5 proxy (host:port), e.g. a local Tor daemon.
    pub tor_socks: Option<String>,
}

impl Default for NetOpts {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(10),
            tor_socks: None,
        }
    }
}

/// Parsed relay-to-client message.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["EVENT", sub_id, {...}]`
    Event { sub_id: String, event: Event },
    /// `["OK", event_id, accepted, message]`
    Ok {
        id: String,
        accepted: bool,
        message: String,
    },
    /// `["EOSE", sub_id]` — end of stored results, informational only.
    Eose { sub_id: String },
    /// `["NOTICE", message]`
    Notice(String),
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// A live client connection to one relay.
pub struct RelayConn {
    url: String,
    ws: WebSocketStream<Box<dyn AsyncReadWrite + Unpin + Send>>,
}

impl RelayConn {
    /// Establish a WebSocket connection, optionally via a SOCKS5 proxy,
    /// bounded by the configured connect timeout.
    pub async fn connect(relay: &str, opts: &NetOpts) -> Result<Self> {
        let fut = async {
            let url = Url::parse(relay)?;
            let host = url.host_str().ok_or_else(|| anyhow!("missing host"))?;
            let port = url
                .port_or_known_default()
                .ok_or_else(|| anyhow!("missing port"))?;
            let req = relay.into_client_request()?;
            let stream: Box<dyn AsyncReadWrite + Unpin + Send> =
                if let Some(proxy) = opts.tor_socks.as_deref() {
                    Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
                } else {
                    Box::new(TcpStream::connect((host, port)).await?)
                };
            let (ws, _) = client_async(req, stream).await?;
            Ok::<_, anyhow::Error>(ws)
        };
        let ws = timeout(opts.connect_timeout, fut)
            .await
            .map_err(|_| anyhow!("connect timed out"))??;
        Ok(Self {
            url: relay.to_string(),
            ws,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one signed event and wait for the relay's `OK` acknowledgment.
    ///
    /// A negative acknowledgment, a closed connection, or silence past
    /// `ack_timeout` all surface as errors carrying the cause.
    pub async fn publish(&mut self, ev: &Event, ack_timeout: Duration) -> Result<()> {
        let msg = json!(["EVENT", ev]);
        self.ws.send(Message::Text(msg.to_string())).await?;
        let deadline = tokio::time::Instant::now() + ack_timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, self.next_message())
                .await
                .map_err(|_| anyhow!("no acknowledgment within {:?}", ack_timeout))?;
            match next {
                Some(Ok(RelayMessage::Ok {
                    id,
                    accepted,
                    message,
                })) if id == ev.id => {
                    if accepted {
                        return Ok(());
                    }
                    return Err(anyhow!("rejected by relay: {message}"));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e),
                None => return Err(anyhow!("connection closed before acknowledgment")),
            }
        }
    }

    /// Open a subscription for `filter` under `sub_id`.
    pub async fn subscribe(&mut self, sub_id: &str, filter: &Filter) -> Result<()> {
        let msg = json!(["REQ", sub_id, filter.to_json()]);
        self.ws.send(Message::Text(msg.to_string())).await?;
        Ok(())
    }

    /// Read the next parseable relay message, skipping anything malformed.
    /// Returns `None` once the connection is closed.
    pub async fn next_message(&mut self) -> Option<Result<RelayMessage>> {
        while let Some(msg) = self.ws.next().await {
            match msg {
                Ok(Message::Text(txt)) => {
                    if let Some(parsed) = parse_message(&txt) {
                        return Some(Ok(parsed));
                    }
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }

    /// Close the connection, ignoring errors from an already-dead peer.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Parse a relay-to-client frame. Unknown or malformed frames yield `None`.
fn parse_message(txt: &str) -> Option<RelayMessage> {
    let val: Value = serde_json::from_str(txt).ok()?;
    let arr = val.as_array()?;
    match arr.first().and_then(|v| v.as_str())? {
        "EVENT" if arr.len() >= 3 => {
            let sub_id = arr[1].as_str()?.to_string();
            let event = serde_json::from_value::<Event>(arr[2].clone()).ok()?;
            Some(RelayMessage::Event { sub_id, event })
        }
        "OK" if arr.len() >= 3 => Some(RelayMessage::Ok {
            id: arr[1].as_str()?.to_string(),
            accepted: arr[2].as_bool()?,
            message: arr
                .get(3)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        "EOSE" if arr.len() >= 2 => Some(RelayMessage::Eose {
            sub_id: arr[1].as_str()?.to_string(),
        }),
        "NOTICE" if arr.len() >= 2 => Some(RelayMessage::Notice(arr[1].as_str()?.to_string())),
        _ => None,
    }
}

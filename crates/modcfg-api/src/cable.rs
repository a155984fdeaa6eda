//! Cable channel client over WebSocket.
//!
//! Connects to the UI backend's cable endpoint, subscribes to one or more
//! named channels (e.g. `GroupResourceChannel` filtered by
//! `groupResource`), and streams channel messages through a
//! [`tokio::sync::broadcast`] channel.
//!
//! A handle owns exactly one connection. [`ChannelHandle::connect`] returns
//! only after the upgrade and the subscribe commands went through. When the
//! server drops the connection the reader task ends, subscribers observe a
//! closed channel and [`ChannelHandle::closed`] resolves. Retrying is left to
//! the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use modcfg_api::cable::{ChannelHandle, ChannelIdentifier};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let cancel = CancellationToken::new();
//! let url = Url::parse("wss://dash.example.com/cable")?;
//! let ident = ChannelIdentifier::new("GroupResourceChannel")
//!     .with_param("groupResource", "moduleconfigs.deckhouse.io");
//!
//! let handle = ChannelHandle::connect(url, vec![ident], cancel.clone(), None).await?;
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{}: {}", event.channel, event.message);
//! }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── ChannelIdentifier ────────────────────────────────────────────────

/// Identifies one channel subscription: channel name plus filter params.
///
/// Serialized as the JSON string the cable protocol expects in its
/// `identifier` field, e.g.
/// `{"channel":"GroupResourceChannel","groupResource":"moduleconfigs.deckhouse.io"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelIdentifier {
    pub channel: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, String>,
}

impl ChannelIdentifier {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Encode as the identifier string sent on the wire.
    pub fn to_wire(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Deserialization {
            message: format!("cannot encode channel identifier: {e}"),
            body: String::new(),
        })
    }

    /// The `subscribe` command frame for this identifier.
    pub fn subscribe_command(&self) -> Result<String, Error> {
        let command = serde_json::json!({
            "command": "subscribe",
            "identifier": self.to_wire()?,
        });
        Ok(command.to_string())
    }
}

// ── ChannelEvent ─────────────────────────────────────────────────────

/// A message delivered on a subscribed channel.
///
/// The payload is opaque to the transport; only the channel name and the
/// identifier params take part in routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    /// Channel name, e.g. `"GroupResourceChannel"`.
    pub channel: String,
    /// Identifier params the subscription was made with.
    pub params: BTreeMap<String, String>,
    /// Raw message body.
    pub message: serde_json::Value,
}

// ── ChannelHandle ────────────────────────────────────────────────────

/// Handle to a running cable connection.
///
/// Call [`shutdown`](Self::shutdown) to tear down the background task.
pub struct ChannelHandle {
    event_rx: broadcast::Receiver<Arc<ChannelEvent>>,
    cancel: CancellationToken,
    /// `None` while the reader runs; then `Err(reason)` or `Ok(())`.
    ended: watch::Receiver<Option<Result<(), String>>>,
}

type CableStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl ChannelHandle {
    /// Connect to the cable endpoint, subscribe, and spawn the reader task.
    ///
    /// Fails with [`Error::ChannelConnect`] when the upgrade or a subscribe
    /// command fails. `token`, when given, is sent as a bearer
    /// `Authorization` header on the upgrade request.
    pub async fn connect(
        url: Url,
        identifiers: Vec<ChannelIdentifier>,
        cancel: CancellationToken,
        token: Option<SecretString>,
    ) -> Result<Self, Error> {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (ended_tx, ended) = watch::channel(None);

        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(Error::ChannelConnect("cancelled before connecting".into()));
            }
            opened = open_session(&url, &identifiers, token.as_ref()) => opened?,
        };

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = read_frames(read, &event_tx, &task_cancel).await;
            if let Err(ref e) = outcome {
                tracing::warn!(error = %e, "cable session ended with error");
            }
            tracing::debug!("cable session exiting");
            ended_tx.send_replace(Some(outcome.map_err(|e| match e {
                Error::ChannelClosed { reason } => reason,
                other => other.to_string(),
            })));
        });

        Ok(Self {
            event_rx,
            cancel,
            ended,
        })
    }

    /// Get a new broadcast receiver for channel events.
    ///
    /// If a consumer falls behind, it receives
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChannelEvent>> {
        self.event_rx.resubscribe()
    }

    /// Resolves once the reader task has stopped.
    ///
    /// `Ok(())` after a close frame, end of stream or shutdown;
    /// [`Error::ChannelClosed`] when the session failed.
    pub fn closed(&self) -> impl Future<Output = Result<(), Error>> + Send + 'static {
        let mut ended = self.ended.clone();
        async move {
            let outcome = ended
                .wait_for(Option::is_some)
                .await
                .map(|outcome| outcome.clone());
            match outcome {
                Ok(Some(Err(reason))) => Err(Error::ChannelClosed { reason }),
                Ok(_) => Ok(()),
                Err(_) => Err(Error::ChannelClosed {
                    reason: "cable task stopped unexpectedly".into(),
                }),
            }
        }
    }

    /// Signal the background task to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Perform the upgrade and send one subscribe command per identifier.
async fn open_session(
    url: &Url,
    identifiers: &[ChannelIdentifier],
    token: Option<&SecretString>,
) -> Result<CableStream, Error> {
    tracing::info!(url = %url, "connecting to cable");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::ChannelConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(token) = token {
        request = request.with_header("Authorization", format!("Bearer {}", token.expose_secret()));
    }

    let (mut ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::ChannelConnect(e.to_string()))?;

    tracing::info!("cable connected");

    for ident in identifiers {
        let command = ident.subscribe_command()?;
        ws_stream
            .send(tungstenite::Message::text(command))
            .await
            .map_err(|e| Error::ChannelConnect(e.to_string()))?;
        tracing::debug!(channel = %ident.channel, params = ?ident.params, "subscribe sent");
    }

    Ok(ws_stream)
}

/// Read frames until the connection drops or `cancel` fires.
async fn read_frames(
    mut read: CableStream,
    event_tx: &broadcast::Sender<Arc<ChannelEvent>>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Frame::Disconnect { reason } = parse_frame(&text, event_tx) {
                            return Err(Error::ChannelClosed { reason });
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let reason = frame.map_or_else(
                            || "no close payload".to_owned(),
                            |cf| format!("{}: {}", cf.code, cf.reason),
                        );
                        tracing::info!(%reason, "cable close frame received");
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(Error::ChannelConnect(e.to_string())),
                    None => {
                        tracing::info!("cable stream ended");
                        return Ok(());
                    }
                    Some(Ok(_)) => {
                        // Binary, Ping, Pong, Frame -- tungstenite answers pings itself
                    }
                }
            }
        }
    }
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Raw frame the cable server sends. Control frames carry `type`,
/// channel messages carry `identifier` + `message`.
#[derive(Debug, Deserialize)]
struct CableFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default)]
    message: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<String>,
}

/// What a text frame turned out to be.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Control,
    Event,
    Disconnect { reason: String },
    Ignored,
}

/// Parse a text frame and broadcast any channel message found inside.
fn parse_frame(text: &str, event_tx: &broadcast::Sender<Arc<ChannelEvent>>) -> Frame {
    let frame: CableFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse cable frame");
            return Frame::Ignored;
        }
    };

    match frame.kind.as_deref() {
        Some("ping") => {
            tracing::trace!("cable ping");
            return Frame::Control;
        }
        Some("welcome") => {
            tracing::debug!("cable welcome");
            return Frame::Control;
        }
        Some("confirm_subscription") => {
            tracing::info!(identifier = ?frame.identifier, "channel subscription confirmed");
            return Frame::Control;
        }
        Some("reject_subscription") => {
            tracing::warn!(identifier = ?frame.identifier, "channel subscription rejected");
            return Frame::Control;
        }
        Some("disconnect") => {
            let reason = frame.reason.unwrap_or_else(|| "unspecified".into());
            tracing::info!(%reason, "cable disconnect requested by server");
            return Frame::Disconnect { reason };
        }
        _ => {}
    }

    let (Some(identifier), Some(message)) = (frame.identifier, frame.message) else {
        return Frame::Ignored;
    };

    let Some((channel, params)) = decode_identifier(&identifier) else {
        tracing::debug!(%identifier, "unrecognised channel identifier");
        return Frame::Ignored;
    };

    // Ignore send errors -- just means no active subscribers right now
    let _ = event_tx.send(Arc::new(ChannelEvent {
        channel,
        params,
        message,
    }));
    Frame::Event
}

/// Split an identifier string into the channel name and its params.
///
/// Non-string param values are kept in their JSON text form.
fn decode_identifier(identifier: &str) -> Option<(String, BTreeMap<String, String>)> {
    let value: serde_json::Value = serde_json::from_str(identifier).ok()?;
    let object = value.as_object()?;
    let channel = object.get("channel")?.as_str()?.to_owned();

    let params = object
        .iter()
        .filter(|(key, _)| key.as_str() != "channel")
        .map(|(key, value)| {
            let text = value
                .as_str()
                .map_or_else(|| value.to_string(), str::to_owned);
            (key.clone(), text)
        })
        .collect();

    Some((channel, params))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn module_configs() -> ChannelIdentifier {
        ChannelIdentifier::new("GroupResourceChannel")
            .with_param("groupResource", "moduleconfigs.deckhouse.io")
    }

    #[test]
    fn identifier_wire_format() {
        let wire = module_configs().to_wire().unwrap();
        assert_eq!(
            wire,
            r#"{"channel":"GroupResourceChannel","groupResource":"moduleconfigs.deckhouse.io"}"#
        );
    }

    #[test]
    fn subscribe_command_embeds_identifier_as_string() {
        let command: serde_json::Value =
            serde_json::from_str(&module_configs().subscribe_command().unwrap()).unwrap();
        assert_eq!(command["command"], "subscribe");
        assert!(command["identifier"].is_string());
    }

    #[test]
    fn channel_message_is_broadcast() {
        let (tx, mut rx) = broadcast::channel(16);
        let raw = serde_json::json!({
            "identifier": module_configs().to_wire().unwrap(),
            "message": { "type": "MODIFIED", "object": { "metadata": { "uid": "uid-1" } } }
        });

        assert_eq!(parse_frame(&raw.to_string(), &tx), Frame::Event);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.channel, "GroupResourceChannel");
        assert_eq!(
            event.params.get("groupResource").map(String::as_str),
            Some("moduleconfigs.deckhouse.io")
        );
        assert_eq!(event.message["object"]["metadata"]["uid"], "uid-1");
    }

    #[test]
    fn control_frames_are_not_broadcast() {
        let (tx, mut rx) = broadcast::channel::<Arc<ChannelEvent>>(16);

        assert_eq!(parse_frame(r#"{"type":"welcome"}"#, &tx), Frame::Control);
        assert_eq!(
            parse_frame(r#"{"type":"ping","message":1739180000}"#, &tx),
            Frame::Control
        );
        assert_eq!(
            parse_frame(
                r#"{"type":"confirm_subscription","identifier":"{\"channel\":\"GroupResourceChannel\"}"}"#,
                &tx
            ),
            Frame::Control
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnect_frame_carries_reason() {
        let (tx, _rx) = broadcast::channel::<Arc<ChannelEvent>>(16);
        let frame = parse_frame(r#"{"type":"disconnect","reason":"unauthorized"}"#, &tx);
        assert_eq!(
            frame,
            Frame::Disconnect {
                reason: "unauthorized".into()
            }
        );
    }

    #[test]
    fn malformed_json_is_ignored() {
        let (tx, mut rx) = broadcast::channel::<Arc<ChannelEvent>>(16);
        assert_eq!(parse_frame("not json at all", &tx), Frame::Ignored);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn non_string_identifier_params_are_stringified() {
        let (channel, params) =
            decode_identifier(r#"{"channel":"GroupResourceChannel","namespaced":false}"#).unwrap();
        assert_eq!(channel, "GroupResourceChannel");
        assert_eq!(params.get("namespaced").map(String::as_str), Some("false"));
    }
}

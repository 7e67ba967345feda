//! A postbridge channel over a WebSocket.

use futures_util::{SinkExt, StreamExt};
use postbridge_core::Message;
use postbridge_rpc::{Channel, ChannelError, Listener, ListenerId, ListenerSet, MessageEvent};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as Frame;

/// Carries protocol messages as JSON text frames.
///
/// Sending only queues the frame; a writer task drains the queue. A reader
/// task decodes incoming text frames and hands them to the listeners.
pub struct WsChannel {
    listeners: Arc<ListenerSet>,
    outbound: mpsc::UnboundedSender<String>,
}

impl WsChannel {
    pub fn spawn<S>(ws: WebSocketStream<S>) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = queue.recv().await {
                if let Err(e) = sink.send(Frame::Text(text.into())).await {
                    tracing::debug!("WebSocket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let listeners = Arc::new(ListenerSet::new());
        let dispatch_to = listeners.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                };
                match frame {
                    Frame::Text(text) => match MessageEvent::from_text(text.as_str()) {
                        Ok(event) => dispatch_to.dispatch(&event),
                        Err(e) => tracing::warn!("Invalid message: {}", e),
                    },
                    Frame::Close(_) => break,
                    _ => {}
                }
            }
            tracing::debug!("WebSocket closed");
        });

        Arc::new(Self { listeners, outbound })
    }
}

impl Channel for WsChannel {
    fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let text =
            serde_json::to_string(message).map_err(|e| ChannelError::Rejected(e.to_string()))?;
        self.outbound.send(text).map_err(|_| ChannelError::Closed)
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

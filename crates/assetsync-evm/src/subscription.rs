//! Push-based delivery of newly mined matching events.
//!
//! The WebSocket subscription is a latency optimization over the backfill
//! cycle, never the sole source of truth: connections drop silently, and
//! anything missed here is recovered by the next backfill pass. Delivered
//! logs feed the same normalize/persist path, so the duplicate effort is
//! absorbed by the ledger's idempotent writes.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use assetsync_core::SyncError;

use crate::reader::RawLog;
use crate::topics::EventKind;

/// A stream of raw logs pushed by the node as they are mined.
#[async_trait]
pub trait LogStream: Send + Sync {
    /// Open the subscription. The receiver closes when the underlying
    /// connection drops; callers resubscribe.
    async fn subscribe(&self) -> Result<mpsc::Receiver<RawLog>, SyncError>;
}

/// `eth_subscribe("logs", …)` over a WebSocket endpoint, filtered to the
/// contract's two event signatures.
pub struct EvmWsSubscription {
    ws_url: String,
    contract_address: String,
}

impl EvmWsSubscription {
    pub fn new(ws_url: impl Into<String>, contract_address: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            contract_address: contract_address.into().to_ascii_lowercase(),
        }
    }

    fn filter(&self) -> Value {
        json!({
            "address": self.contract_address,
            // topics[0] matching either signature (OR semantics).
            "topics": [[
                EventKind::Registration.topic0(),
                EventKind::Transfer.topic0(),
            ]],
        })
    }
}

#[async_trait]
impl LogStream for EvmWsSubscription {
    async fn subscribe(&self) -> Result<mpsc::Receiver<RawLog>, SyncError> {
        let (ws, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| SyncError::NodeUnavailable(format!("ws connect: {e}")))?;
        tracing::info!(url = %self.ws_url, "websocket connected");

        let (mut write, mut read) = ws.split();

        let sub_msg = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["logs", self.filter()],
        });
        write
            .send(Message::Text(sub_msg.to_string()))
            .await
            .map_err(|e| SyncError::NodeUnavailable(format!("eth_subscribe: {e}")))?;

        let (tx, rx) = mpsc::channel::<RawLog>(512);

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(log) = parse_subscription_log(&text) {
                            if tx.send(log).await.is_err() {
                                // Receiver dropped; tear the task down.
                                break;
                            }
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("websocket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
            // Dropping tx closes the receiver, signalling resubscribe.
        });

        Ok(rx)
    }
}

/// Extract a `RawLog` from an `eth_subscription` notification, ignoring the
/// subscription-confirmation response and anything else.
fn parse_subscription_log(text: &str) -> Option<RawLog> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("method")?.as_str()? != "eth_subscription" {
        return None;
    }
    let result = value.get("params")?.get("result")?;
    match serde_json::from_value::<RawLog>(result.clone()) {
        Ok(log) => Some(log),
        Err(e) => {
            tracing::warn!(error = %e, "undecodable subscription payload");
            None
        }
    }
}

//! HTTP JSON-RPC implementation of the chain reader port, backed by
//! `reqwest` with a bounded request timeout. A timeout is reported as the
//! node being unavailable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use assetsync_core::SyncError;

use crate::reader::{parse_hex_u64, ChainReader, RawLog};
use crate::topics::EventKind;

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: &'static str,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

// ─── HttpChainReader ──────────────────────────────────────────────────────────

/// Chain reader over an HTTP JSON-RPC endpoint, filtered to one contract.
pub struct HttpChainReader {
    url: String,
    contract_address: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpChainReader {
    pub fn new(
        url: impl Into<String>,
        contract_address: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Other(format!("failed to build http client: {e}")))?;

        Ok(Self {
            url: url.into(),
            contract_address: contract_address.into().to_ascii_lowercase(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    async fn call(&self, method: &'static str, params: Vec<Value>) -> Result<Value, SyncError> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::NodeUnavailable(format!("{method} timed out"))
                } else {
                    SyncError::NodeUnavailable(format!("{method}: {e}"))
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(SyncError::NodeUnavailable(format!("{method}: HTTP {status}")));
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::NodeUnavailable(format!("{method}: bad response: {e}")))?;

        if let Some(err) = body.error {
            return Err(SyncError::NodeUnavailable(format!(
                "{method}: rpc error {}: {}",
                err.code, err.message
            )));
        }

        body.result
            .ok_or_else(|| SyncError::NodeUnavailable(format!("{method}: empty result")))
    }
}

/// Map a node-side `eth_getLogs` rejection to the sync error taxonomy.
///
/// Providers cap range size with varying codes and wording: Infura uses
/// -32005, others return -32602/-32000 with a "block range" message. The
/// match is deliberately narrow; misreading a throttling error as
/// `RangeTooLarge` would answer a rate limit with a bisection cascade of
/// extra requests. Anything unrecognized is treated as the node being
/// unavailable so that the next cycle retries.
fn classify_logs_error(code: i64, message: &str, from: u64, to: u64) -> SyncError {
    let msg = message.to_ascii_lowercase();
    let range_limited = code == -32005
        || msg.contains("block range")
        || msg.contains("range is too")
        || msg.contains("too many results")
        || msg.contains("too many logs");
    if range_limited {
        SyncError::RangeTooLarge { from, to }
    } else {
        SyncError::NodeUnavailable(format!("eth_getLogs: rpc error {code}: {message}"))
    }
}

#[async_trait]
impl ChainReader for HttpChainReader {
    async fn current_height(&self) -> Result<u64, SyncError> {
        let result = self.call("eth_blockNumber", vec![]).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| SyncError::NodeUnavailable("eth_blockNumber: non-string result".into()))?;
        Ok(parse_hex_u64(hex))
    }

    async fn get_logs(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, SyncError> {
        let filter = json!({
            "address": self.contract_address,
            "topics": [kind.topic0()],
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
        });

        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            method: "eth_getLogs",
            params: vec![filter],
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::NodeUnavailable("eth_getLogs timed out".into())
                } else {
                    SyncError::NodeUnavailable(format!("eth_getLogs: {e}"))
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(SyncError::NodeUnavailable(format!("eth_getLogs: HTTP {status}")));
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::NodeUnavailable(format!("eth_getLogs: bad response: {e}")))?;

        if let Some(err) = body.error {
            return Err(classify_logs_error(err.code, &err.message, from, to));
        }

        let result = body
            .result
            .ok_or_else(|| SyncError::NodeUnavailable("eth_getLogs: empty result".into()))?;

        serde_json::from_value(result)
            .map_err(|e| SyncError::NodeUnavailable(format!("eth_getLogs: malformed logs: {e}")))
    }

    async fn block_timestamp(&self, number: u64) -> Result<i64, SyncError> {
        let result = self
            .call(
                "eth_getBlockByNumber",
                vec![json!(format!("0x{number:x}")), json!(false)],
            )
            .await?;

        let ts = result
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SyncError::NodeUnavailable(format!("block {number}: missing timestamp"))
            })?;
        Ok(parse_hex_u64(ts) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_errors_are_classified() {
        let e = classify_logs_error(-32005, "query returned more than 10000 results", 1, 50_000);
        assert!(matches!(e, SyncError::RangeTooLarge { from: 1, to: 50_000 }));

        let e = classify_logs_error(-32602, "eth_getLogs block range too large", 10, 20);
        assert!(matches!(e, SyncError::RangeTooLarge { .. }));

        let e = classify_logs_error(-32000, "query returned too many results", 10, 20);
        assert!(matches!(e, SyncError::RangeTooLarge { .. }));

        let e = classify_logs_error(-32000, "internal error", 10, 20);
        assert!(matches!(e, SyncError::NodeUnavailable(_)));
    }

    #[test]
    fn throttling_errors_are_not_range_errors() {
        // A throttled node must surface as unavailable; bisecting would only
        // multiply requests against it.
        let e = classify_logs_error(-32000, "rate limit exceeded", 10, 20);
        assert!(matches!(e, SyncError::NodeUnavailable(_)));

        let e = classify_logs_error(-32029, "daily request limit reached", 10, 20);
        assert!(matches!(e, SyncError::NodeUnavailable(_)));
    }

    #[test]
    fn contract_address_is_lowercased() {
        let reader = HttpChainReader::new(
            "http://localhost:8545",
            "0xABCDEF0123456789abcdef0123456789ABCDEF01",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            reader.contract_address(),
            "0xabcdef0123456789abcdef0123456789abcdef01"
        );
    }
}

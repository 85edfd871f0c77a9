use crate::erc20::transfer_event_topic0;
use crate::errors::Error;
use async_trait::async_trait;
use awc::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// One ERC-20 `Transfer` log matching a monitored wallet's address.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferLog {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub value: i64,
    pub block_number: u64,
}

/// The pieces of a submitted transaction the correlation layer needs:
/// whether it succeeded, its ERC-20 call-data, and the address that signed
/// and paid for it - the correlation layer's sole source of a payable
/// on-chain address for a chat-reported transaction reference, since the
/// chat transport's sender identity is not itself guaranteed to be an
/// address.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTransaction {
    pub status: TxStatus,
    pub input_data: Vec<u8>,
    pub from: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Failed,
    Pending,
    NotFound,
}

/// The minimal EVM JSON-RPC surface the watcher and correlation layer
/// need. Kept as a trait so tests can substitute an in-memory fake instead
/// of a live node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn current_block_number(&self) -> Result<u64, Error>;
    async fn get_transfer_logs(
        &self,
        to_address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferLog>, Error>;
    async fn get_transaction(&self, tx_hash: &str) -> Result<ChainTransaction, Error>;
}

/// Reference implementation speaking plain JSON-RPC over HTTP, the same
/// shape as an HTTP-polling chain client that walks a node's block range
/// looking for transactions of interest, generalized to an EVM node's
/// JSON-RPC surface. Uses `alloy-primitives` for address/topic encoding,
/// the idiomatic choice for EVM types.
pub struct JsonRpcChainClient {
    client: Client,
    rpc_url: String,
    stablecoin_address: String,
}

impl JsonRpcChainClient {
    pub fn new(rpc_url: &str, stablecoin_address: &str) -> Self {
        let client = Client::builder().timeout(Duration::from_secs(15)).finish();
        JsonRpcChainClient {
            client,
            rpc_url: rpc_url.to_owned(),
            stablecoin_address: stablecoin_address.to_owned(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let mut resp = self
            .client
            .post(&self.rpc_url)
            .insert_header(("Content-Type", "application/json"))
            .send_json(&body)
            .await
            .map_err(|e| Error::Internal(format!("rpc transport error calling {}: {}", method, e)))?;
        let parsed: RpcResponse = resp
            .json()
            .await
            .map_err(|e| Error::Internal(format!("rpc decode error calling {}: {}", method, e)))?;
        if let Some(err) = parsed.error {
            return Err(Error::Internal(format!("rpc error from {}: {}", method, err.message)));
        }
        parsed
            .result
            .ok_or_else(|| Error::Internal(format!("rpc response for {} had no result", method)))
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    message: String,
}

fn parse_hex_u64(s: &str) -> Result<u64, Error> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| Error::Internal(format!("invalid hex quantity {}: {}", s, e)))
}

fn parse_hex_i64(s: &str) -> Result<i64, Error> {
    i64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| Error::Internal(format!("invalid hex quantity {}: {}", s, e)))
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn current_block_number(&self) -> Result<u64, Error> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| Error::Internal("eth_blockNumber did not return a string".into()))?;
        parse_hex_u64(hex)
    }

    async fn get_transfer_logs(
        &self,
        to_address: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferLog>, Error> {
        let topic0 = format!("0x{}", hex::encode(transfer_event_topic0()));
        let topic_to = format!("0x{:0>64}", to_address.trim_start_matches("0x").to_lowercase());
        let filter = json!({
            "address": self.stablecoin_address,
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
            "topics": [topic0, Value::Null, topic_to],
        });
        let result = self.call("eth_getLogs", json!([filter])).await?;
        let entries = result
            .as_array()
            .ok_or_else(|| Error::Internal("eth_getLogs did not return an array".into()))?;
        let mut logs = Vec::with_capacity(entries.len());
        for entry in entries {
            let tx_hash = entry["transactionHash"]
                .as_str()
                .ok_or_else(|| Error::Internal("log missing transactionHash".into()))?
                .to_owned();
            let topics = entry["topics"]
                .as_array()
                .ok_or_else(|| Error::Internal("log missing topics".into()))?;
            let from = topic_to_address(topics.get(1))?;
            let to = topic_to_address(topics.get(2))?;
            let data = entry["data"]
                .as_str()
                .ok_or_else(|| Error::Internal("log missing data".into()))?;
            let value = parse_hex_i64(data)?;
            let block_number = parse_hex_u64(
                entry["blockNumber"]
                    .as_str()
                    .ok_or_else(|| Error::Internal("log missing blockNumber".into()))?,
            )?;
            logs.push(TransferLog {
                tx_hash,
                from,
                to,
                value,
                block_number,
            });
        }
        Ok(logs)
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<ChainTransaction, Error> {
        let tx = self
            .call("eth_getTransactionByHash", json!([tx_hash]))
            .await?;
        if tx.is_null() {
            return Ok(ChainTransaction {
                status: TxStatus::NotFound,
                input_data: vec![],
                from: String::new(),
            });
        }
        let input_hex = tx["input"].as_str().unwrap_or("0x");
        let input_data = hex::decode(input_hex.trim_start_matches("0x")).unwrap_or_default();
        let from = tx["from"].as_str().unwrap_or("").to_owned();

        let receipt = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        let status = if receipt.is_null() {
            TxStatus::Pending
        } else {
            match receipt["status"].as_str() {
                Some("0x1") => TxStatus::Success,
                Some("0x0") => TxStatus::Failed,
                _ => TxStatus::Pending,
            }
        };
        Ok(ChainTransaction { status, input_data, from })
    }
}

fn topic_to_address(topic: Option<&Value>) -> Result<String, Error> {
    let topic = topic
        .and_then(|t| t.as_str())
        .ok_or_else(|| Error::Internal("log topic missing".into()))?;
    let hex_addr = &topic[topic.len() - 40..];
    Ok(format!("0x{}", hex_addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_hex_u64("0x1a").unwrap(), 26);
        assert_eq!(parse_hex_i64("0xf4240").unwrap(), 1_000_000);
    }

    #[test]
    fn topic_to_address_takes_low_20_bytes() {
        let topic = Value::String(format!("0x{:0>64}", "aa".repeat(20)));
        assert_eq!(topic_to_address(Some(&topic)).unwrap(), format!("0x{}", "aa".repeat(20)));
    }
}

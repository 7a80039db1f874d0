//! [`LedgerRpc`] over an Ethereum JSON-RPC HTTP endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

use super::types::{Address, Receipt, TxDetail, TxHash};
use super::{LedgerError, LedgerRpc};

/// HTTP JSON-RPC client.
pub struct JsonRpcLedger {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcBlock {
    transactions: Vec<String>,
}

#[derive(Deserialize)]
struct RpcTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    nonce: String,
    input: String,
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    block_number: Option<String>,
    status: Option<String>,
}

fn quantity(s: &str) -> Result<u128, LedgerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| LedgerError::InvalidResponse(format!("quantity {s}: {e}")))
}

fn quantity_u64(s: &str) -> Result<u64, LedgerError> {
    u64::try_from(quantity(s)?).map_err(|_| LedgerError::InvalidResponse(format!("quantity {s} overflows u64")))
}

fn data(s: &str) -> Result<Vec<u8>, LedgerError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| LedgerError::InvalidResponse(format!("data: {e}")))
}

impl JsonRpcLedger {
    pub fn new(url: impl Into<String>) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder().use_rustls_tls().build()?;
        Ok(Self {
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Performs one call; `Ok(None)` when the node answers `null`.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(method, id, "rpc call");

        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response: RpcResponse<T> = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result)
    }

    async fn call_required<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        self.call(method, params)
            .await?
            .ok_or_else(|| LedgerError::InvalidResponse(format!("{method} returned null")))
    }
}

#[async_trait]
impl LedgerRpc for JsonRpcLedger {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        let n: String = self.call_required("eth_blockNumber", json!([])).await?;
        quantity_u64(&n)
    }

    async fn block_transactions(&self, number: u64) -> Result<Option<Vec<TxHash>>, LedgerError> {
        let block: Option<RpcBlock> = self
            .call("eth_getBlockByNumber", json!([format!("0x{number:x}"), false]))
            .await?;
        block
            .map(|b| {
                b.transactions
                    .iter()
                    .map(|h| h.parse::<TxHash>().map_err(LedgerError::from))
                    .collect()
            })
            .transpose()
    }

    async fn transaction(&self, hash: TxHash) -> Result<Option<TxDetail>, LedgerError> {
        let tx: Option<RpcTransaction> = self
            .call("eth_getTransactionByHash", json!([hash.to_string()]))
            .await?;
        let Some(tx) = tx else {
            return Ok(None);
        };

        Ok(Some(TxDetail {
            hash: tx.hash.parse()?,
            from: tx.from.parse()?,
            to: tx.to.as_deref().map(str::parse::<Address>).transpose()?,
            nonce: quantity_u64(&tx.nonce)?,
            input: data(&tx.input)?,
            value: quantity(&tx.value)?,
        }))
    }

    async fn balance(&self, address: Address) -> Result<u128, LedgerError> {
        let wei: String = self
            .call_required("eth_getBalance", json!([address.to_string(), "latest"]))
            .await?;
        quantity(&wei)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, LedgerError> {
        let count: String = self
            .call_required("eth_getTransactionCount", json!([address.to_string(), "pending"]))
            .await?;
        quantity_u64(&count)
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        let price: String = self.call_required("eth_gasPrice", json!([])).await?;
        quantity(&price)
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        let id: String = self.call_required("eth_chainId", json!([])).await?;
        quantity_u64(&id)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, LedgerError> {
        let hash: String = self
            .call_required("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(raw))]))
            .await?;
        Ok(hash.parse()?)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, LedgerError> {
        let receipt: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await?;
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        // Some nodes return a receipt shell for pending transactions.
        let Some(block) = receipt.block_number else {
            return Ok(None);
        };

        Ok(Some(Receipt {
            block_number: quantity_u64(&block)?,
            success: receipt.status.as_deref().map(quantity).transpose()?.map_or(true, |s| s == 1),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_parsing() {
        assert_eq!(quantity("0x0").unwrap(), 0);
        assert_eq!(quantity("0x").unwrap(), 0);
        assert_eq!(quantity("0x1a").unwrap(), 26);
        assert!(quantity("0xzz").is_err());
        assert!(quantity_u64("0x1ffffffffffffffff").is_err());
    }

    #[test]
    fn test_transaction_json_shape() {
        let raw = r#"{
            "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "from": "0x2222222222222222222222222222222222222222",
            "to": null,
            "nonce": "0x5",
            "input": "0x2199d5cd",
            "value": "0x0",
            "gas": "0x5208"
        }"#;
        let tx: RpcTransaction = serde_json::from_str(raw).unwrap();
        assert!(tx.to.is_none());
        assert_eq!(quantity_u64(&tx.nonce).unwrap(), 5);
        assert_eq!(data(&tx.input).unwrap(), vec![0x21, 0x99, 0xd5, 0xcd]);
    }

    #[test]
    fn test_null_result_is_none() {
        let response: RpcResponse<RpcReceipt> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert!(response.result.is_none());
        assert!(response.error.is_none());
    }
}

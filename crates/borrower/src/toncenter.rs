//! # HTTP Chain Client
//!
//! [`ChainClient`] over a toncenter-compatible v2 JSON API.
//!
//! | Operation                | Endpoint                         |
//! |--------------------------|----------------------------------|
//! | `current_chain_head`     | `GET  /getMasterchainInfo`       |
//! | `get_account`            | `GET  /getAddressInformation`    |
//! | `run_get_method`         | `POST /runGetMethod`             |
//! | `get_chain_parameter`    | `GET  /getConfigParam`           |
//! | `send_external_message`  | `POST /sendBoc`                  |
//!
//! Every response is wrapped as `{"ok": bool, "result": ..., "error": ...}`.
//! Reads go through [`retry_read`]; `sendBoc` is attempted once.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use borrower_common::{boc, message, Address, Cell, Coins};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::chain::{AccountState, AccountStatus, BlockRef, ChainClient, ChainError, StackEntry};
use crate::retry::{retry_read, RetryConfig};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

pub struct HttpChainClient {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl std::fmt::Debug for HttpChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChainClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("retry", &self.retry)
            .finish()
    }
}

impl HttpChainClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            client,
            retry,
        })
    }

    fn map_reqwest(e: reqwest::Error) -> ChainError {
        if e.is_timeout() {
            ChainError::Timeout
        } else {
            ChainError::Transport(format!("request failed: {}", e))
        }
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<Value, ChainError> {
        let request = match &self.api_key {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        };
        let response = request.send().await.map_err(Self::map_reqwest)?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ChainError::Transport(format!("failed to read response: {}", e)))?;

        // Rate limits and gateway errors are transport failures; other
        // statuses still carry a JSON error body worth reporting.
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ChainError::Transport(format!("HTTP {}: {}", status, body)));
        }
        let parsed: ApiResponse = serde_json::from_str(&body)
            .map_err(|e| ChainError::Response(format!("HTTP {}: {}", status, e)))?;
        unwrap_api(parsed)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ChainError> {
        let url = format!("{}/{}", self.endpoint, path);
        retry_read(&self.retry, path, || self.call(self.client.get(&url).query(query))).await
    }

    async fn post_read(&self, path: &str, body: &Value) -> Result<Value, ChainError> {
        let url = format!("{}/{}", self.endpoint, path);
        retry_read(&self.retry, path, || self.call(self.client.post(&url).json(body))).await
    }
}

fn unwrap_api(response: ApiResponse) -> Result<Value, ChainError> {
    if !response.ok {
        let message = response.error.unwrap_or_else(|| "unknown error".to_string());
        return Err(ChainError::Response(match response.code {
            Some(code) => format!("{} (code {})", message, code),
            None => message,
        }));
    }
    response
        .result
        .ok_or_else(|| ChainError::Response("missing result".to_string()))
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn current_chain_head(&self) -> Result<BlockRef, ChainError> {
        let result = self.get("getMasterchainInfo", &[]).await?;
        parse_block_ref(&result["last"])
    }

    async fn get_account(&self, _block: &BlockRef, address: &Address) -> Result<AccountState, ChainError> {
        let result = self
            .get("getAddressInformation", &[("address", address.to_raw())])
            .await?;
        parse_account(&result)
    }

    async fn run_get_method(
        &self,
        block: &BlockRef,
        address: &Address,
        method: &str,
        args: &[StackEntry],
    ) -> Result<Vec<StackEntry>, ChainError> {
        let stack = args
            .iter()
            .map(encode_arg)
            .collect::<Result<Vec<_>, _>>()?;
        let body = json!({
            "address": address.to_raw(),
            "method": method,
            "stack": stack,
            "seqno": block.seqno,
        });
        let result = self.post_read("runGetMethod", &body).await?;

        let exit_code = result["exit_code"].as_i64().unwrap_or(0);
        if exit_code != 0 && exit_code != 1 {
            return Err(ChainError::GetMethod { method: method.to_string(), exit_code });
        }
        let entries = result["stack"]
            .as_array()
            .ok_or_else(|| ChainError::Response(format!("{}: stack is not an array", method)))?;
        let stack = entries
            .iter()
            .enumerate()
            .map(|(i, e)| parse_stack_entry(e).map_err(|msg| ChainError::stack(method, i, msg)))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(method, depth = stack.len(), "get-method returned");
        Ok(stack)
    }

    async fn get_chain_parameter(&self, block: &BlockRef, id: u32) -> Result<Cell, ChainError> {
        let result = self
            .get(
                "getConfigParam",
                &[("config_id", id.to_string()), ("seqno", block.seqno.to_string())],
            )
            .await?;
        let bytes = result["config"]["bytes"]
            .as_str()
            .ok_or_else(|| ChainError::Response(format!("config param {} has no bytes", id)))?;
        Ok(boc::from_base64(bytes)?)
    }

    async fn send_external_message(&self, dest: &Address, body: Cell) -> Result<(), ChainError> {
        let msg = message::external_in(dest, body)?;
        let encoded = boc::to_base64(&msg)?;
        let url = format!("{}/sendBoc", self.endpoint);
        self.call(self.client.post(&url).json(&json!({ "boc": encoded })))
            .await
            .map(|_| ())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// JSON <-> TYPES
// ════════════════════════════════════════════════════════════════════════════

fn value_as_i64(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn parse_block_ref(v: &Value) -> Result<BlockRef, ChainError> {
    let field = |name: &str| {
        value_as_i64(&v[name]).ok_or_else(|| ChainError::Response(format!("block id has no {}", name)))
    };
    Ok(BlockRef {
        workchain: field("workchain")? as i32,
        shard: field("shard")?,
        seqno: field("seqno")? as u32,
    })
}

fn parse_account(v: &Value) -> Result<AccountState, ChainError> {
    let balance = match &v["balance"] {
        Value::String(s) => s
            .parse::<u128>()
            .map_err(|_| ChainError::Response(format!("bad balance '{}'", s)))?,
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ChainError::Response(format!("bad balance {}", n)))? as u128,
        _ => 0,
    };
    let status = match v["state"].as_str().unwrap_or("") {
        "active" => AccountStatus::Active,
        "frozen" => AccountStatus::Frozen,
        "uninitialized" | "uninit" => AccountStatus::Uninit,
        _ => AccountStatus::Nonexist,
    };
    Ok(AccountState { status, balance: Coins::from_nano(balance) })
}

fn encode_arg(arg: &StackEntry) -> Result<Value, ChainError> {
    Ok(match arg {
        StackEntry::Int(n) => json!(["num", n.to_string()]),
        StackEntry::Slice(c) => json!(["tvm.Slice", boc::to_base64(c)?]),
        StackEntry::Cell(c) => json!(["tvm.Cell", boc::to_base64(c)?]),
        other => {
            return Err(ChainError::Response(format!(
                "{} arguments are not supported",
                other.kind()
            )))
        }
    })
}

fn parse_num(s: &str) -> Result<i128, String> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let value = match digits.strip_prefix("0x") {
        Some(hex) => i128::from_str_radix(hex, 16),
        None => digits.parse::<i128>(),
    }
    .map_err(|e| format!("bad number '{}': {}", s, e))?;
    Ok(if negative { -value } else { value })
}

fn parse_cell_bytes(v: &Value) -> Result<Cell, String> {
    let bytes = v["bytes"].as_str().ok_or("cell without bytes")?;
    boc::from_base64(bytes).map_err(|e| e.to_string())
}

fn parse_elements(v: &Value) -> Result<Vec<StackEntry>, String> {
    v["elements"]
        .as_array()
        .ok_or("tuple without elements")?
        .iter()
        .map(parse_typed_entry)
        .collect()
}

/// `["num", "0x.."]`, `["cell", {"bytes": ..}]`, `["list", {"elements": ..}]`...
fn parse_stack_entry(v: &Value) -> Result<StackEntry, String> {
    let pair = v.as_array().ok_or("entry is not a pair")?;
    let kind = pair.first().and_then(|k| k.as_str()).ok_or("entry without type")?;
    let payload = pair.get(1).unwrap_or(&Value::Null);
    match kind {
        "num" | "int" => {
            let s = payload.as_str().ok_or("number is not a string")?;
            parse_num(s).map(StackEntry::Int)
        }
        "null" => Ok(StackEntry::Null),
        "cell" => parse_cell_bytes(payload).map(StackEntry::Cell),
        "slice" => parse_cell_bytes(payload).map(StackEntry::Slice),
        "list" | "tuple" => parse_elements(payload).map(StackEntry::Tuple),
        other => Err(format!("unknown entry type '{}'", other)),
    }
}

/// Nested tuple elements use the `tvm.stackEntry*` object form.
fn parse_typed_entry(v: &Value) -> Result<StackEntry, String> {
    match v["@type"].as_str().unwrap_or("") {
        "tvm.stackEntryNumber" => {
            let s = v["number"]["number"].as_str().ok_or("number without value")?;
            parse_num(s).map(StackEntry::Int)
        }
        "tvm.stackEntryCell" => parse_cell_bytes(&v["cell"]).map(StackEntry::Cell),
        "tvm.stackEntrySlice" => parse_cell_bytes(&v["slice"]).map(StackEntry::Slice),
        "tvm.stackEntryTuple" => parse_elements(&v["tuple"]).map(StackEntry::Tuple),
        "tvm.stackEntryList" => parse_elements(&v["list"]).map(StackEntry::Tuple),
        "tvm.stackEntryNull" | "tvm.stackEntryUnsupported" => Ok(StackEntry::Null),
        other => Err(format!("unknown element type '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use borrower_common::CellBuilder;

    #[test]
    fn test_parse_num_forms() {
        assert_eq!(parse_num("0x1a").unwrap(), 26);
        assert_eq!(parse_num("-0x1").unwrap(), -1);
        assert_eq!(parse_num("12345").unwrap(), 12345);
        assert!(parse_num("0xZZ").is_err());
    }

    #[test]
    fn test_parse_stack_entries() {
        let cell = CellBuilder::new().store_uint(0xAB, 8).unwrap().build();
        let b64 = boc::to_base64(&cell).unwrap();
        let stack = json!([
            ["num", "0x0"],
            ["cell", {"bytes": b64, "object": {}}],
            ["slice", {"bytes": b64}],
            ["list", {"@type": "tvm.list", "elements": [
                {"@type": "tvm.stackEntryNumber", "number": {"number": "7"}}
            ]}],
            ["null"]
        ]);
        let parsed: Vec<StackEntry> = stack
            .as_array()
            .unwrap()
            .iter()
            .map(|e| parse_stack_entry(e).unwrap())
            .collect();
        assert_eq!(parsed[0], StackEntry::Int(0));
        assert_eq!(parsed[1], StackEntry::Cell(cell.clone()));
        assert_eq!(parsed[2], StackEntry::Slice(cell));
        assert_eq!(parsed[3], StackEntry::Tuple(vec![StackEntry::Int(7)]));
        assert_eq!(parsed[4], StackEntry::Null);
    }

    #[test]
    fn test_parse_block_and_account() {
        let block = parse_block_ref(&json!({
            "workchain": -1, "shard": "-9223372036854775808", "seqno": 31337
        }))
        .unwrap();
        assert_eq!(block.seqno, 31337);
        assert_eq!(block.shard, i64::MIN);

        let acc = parse_account(&json!({"balance": "1500000000", "state": "active"})).unwrap();
        assert!(acc.is_active());
        assert_eq!(acc.balance, Coins::from_nano(1_500_000_000));

        let frozen = parse_account(&json!({"balance": 0, "state": "frozen"})).unwrap();
        assert_eq!(frozen.status, AccountStatus::Frozen);
    }

    #[test]
    fn test_encode_args() {
        let cell = CellBuilder::new().store_uint(1, 2).unwrap().build();
        assert_eq!(encode_arg(&StackEntry::Int(-5)).unwrap(), json!(["num", "-5"]));
        let slice = encode_arg(&StackEntry::Slice(cell)).unwrap();
        assert_eq!(slice[0], "tvm.Slice");
        assert!(encode_arg(&StackEntry::Null).is_err());
    }

    #[test]
    fn test_api_error_is_response_error() {
        let err = unwrap_api(ApiResponse {
            ok: false,
            result: None,
            error: Some("LITE_SERVER_UNKNOWN".to_string()),
            code: Some(500),
        })
        .unwrap_err();
        assert!(matches!(err, ChainError::Response(ref m) if m.contains("code 500")));
    }
}

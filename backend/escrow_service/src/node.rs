//! Node REST adapters: contract compilation and the node's built-in wallet.

use async_trait::async_trait;
use escrow_protocol::{Address, ProgramCompiler, ProtocolError};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::errors::{Result, ServiceError, WalletError};
use crate::tx::{LedgerBox, SignedTransaction, UnsignedTransaction};
use crate::wallet::WalletSigner;

/// Error body the node returns on 4xx/5xx.
#[derive(Debug, Default, Deserialize)]
struct NodeError {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    detail: Option<String>,
}

impl NodeError {
    fn message(&self) -> String {
        match &self.detail {
            Some(d) if !d.is_empty() => d.clone(),
            _ => self.reason.clone(),
        }
    }
}

async fn error_message(resp: Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let parsed: NodeError = serde_json::from_str(&body).unwrap_or_default();
    let message = parsed.message();
    if message.is_empty() {
        format!("node returned {status}: {body}")
    } else {
        message
    }
}

#[derive(Clone)]
pub struct NodeClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl NodeClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.get(format!("{}{path}", self.base_url)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.post(format!("{}{path}", self.base_url)))
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("api_key", key),
            None => req,
        }
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(resp: Response) -> Result<T> {
        if !resp.status().is_success() {
            return Err(ServiceError::Network(error_message(resp).await));
        }
        Ok(resp.json().await?)
    }
}

// ─────────────────────────────────────────────────────────
// Compiler
// ─────────────────────────────────────────────────────────

/// [`ProgramCompiler`] backed by `POST /script/p2sAddress`.
pub struct NodeCompiler {
    node: NodeClient,
}

impl NodeCompiler {
    pub fn new(node: NodeClient) -> Self {
        Self { node }
    }
}

#[derive(Deserialize)]
struct P2sAddress {
    address: String,
}

#[async_trait]
impl ProgramCompiler for NodeCompiler {
    async fn compile(&self, source: &str) -> escrow_protocol::Result<Vec<u8>> {
        let resp = self
            .node
            .post("/script/p2sAddress")
            .json(&json!({ "source": source }))
            .send()
            .await
            .map_err(|e| ProtocolError::Compilation(format!("node unreachable: {e}")))?;
        if !resp.status().is_success() {
            return Err(ProtocolError::Compilation(error_message(resp).await));
        }
        let body: P2sAddress = resp
            .json()
            .await
            .map_err(|e| ProtocolError::Compilation(format!("unexpected response: {e}")))?;
        Address::parse(&body.address)?.to_program_bytes()
    }
}

// ─────────────────────────────────────────────────────────
// Wallet
// ─────────────────────────────────────────────────────────

/// [`WalletSigner`] over the node's wallet endpoints.
pub struct NodeWallet {
    node: NodeClient,
}

impl NodeWallet {
    pub fn new(node: NodeClient) -> Self {
        Self { node }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeInfo {
    full_height: Option<u32>,
}

#[derive(Deserialize)]
struct WalletBox {
    #[serde(rename = "box")]
    ledger_box: LedgerBox,
}

#[async_trait]
impl WalletSigner for NodeWallet {
    async fn get_current_height(&self) -> Result<u32> {
        let info: NodeInfo = NodeClient::read_json(self.node.get("/info").send().await?).await?;
        info.full_height
            .ok_or_else(|| ServiceError::Network("node has not synced a full block yet".into()))
    }

    async fn get_change_address(&self) -> Result<Address> {
        let addresses: Vec<String> =
            NodeClient::read_json(self.node.get("/wallet/addresses").send().await?).await?;
        let first = addresses
            .first()
            .ok_or_else(|| WalletError::Other("wallet has no addresses".into()))?;
        Ok(Address::parse(first)?)
    }

    async fn get_utxos(&self) -> Result<Vec<LedgerBox>> {
        let resp = self
            .node
            .get("/wallet/boxes/unspent")
            .query(&[("minConfirmations", "0")])
            .send()
            .await?;
        let boxes: Vec<WalletBox> = NodeClient::read_json(resp).await?;
        debug!("wallet holds {} unspent boxes", boxes.len());
        Ok(boxes.into_iter().map(|b| b.ledger_box).collect())
    }

    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction> {
        let resp = self
            .node
            .post("/wallet/transaction/sign")
            .json(&json!({ "tx": tx }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(WalletError::classify(error_message(resp).await).into());
        }
        Ok(resp.json().await?)
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<String> {
        let resp = self.node.post("/transactions").json(tx).send().await?;
        if !resp.status().is_success() {
            return Err(WalletError::classify(error_message(resp).await).into());
        }
        Ok(resp.json().await?)
    }
}

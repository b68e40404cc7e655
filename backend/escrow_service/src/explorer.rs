//! Explorer REST client: unspent-box search by program template, token
//! metadata and transaction status.
//!
//! ## Resilience
//!
//! The client never retries.  Failures surface as
//! [`ServiceError::Network`] and the listing loop in
//! [`crate::service`] decides whether to back off and try the page again.

use std::time::Duration;

use async_trait::async_trait;
use escrow_protocol::TokenId;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::errors::{Result, ServiceError};
use crate::reservation::ConfirmationWatcher;
use crate::tx::LedgerBox;

// ─────────────────────────────────────────────────────────
// Port
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// Boxes must hold every one of these tokens.
    pub assets: Vec<TokenId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub id: TokenId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub decimals: Option<u32>,
    /// Total supply minted.
    #[serde(default)]
    pub emission_amount: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub items: Vec<LedgerBox>,
    #[serde(default)]
    pub total: u64,
}

#[async_trait]
pub trait LedgerSearch: Send + Sync {
    async fn search_unspent_by_program_hash(
        &self,
        template_hash: &[u8; 32],
        filters: &SearchFilters,
        offset: u64,
        limit: u32,
    ) -> Result<SearchPage>;

    async fn get_token_metadata(&self, token_id: &TokenId) -> Result<TokenMetadata>;

    /// Confirmations of `tx_id`, `None` while the ledger does not know it.
    async fn get_transaction_status(&self, tx_id: &str) -> Result<Option<u64>>;
}

// ─────────────────────────────────────────────────────────
// Explorer v1 client
// ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ExplorerClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionInfo {
    num_confirmations: u64,
}

impl ExplorerClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }
}

fn unexpected(status: StatusCode, url: &str) -> ServiceError {
    ServiceError::Network(format!("explorer returned {status} for {url}"))
}

#[async_trait]
impl LedgerSearch for ExplorerClient {
    async fn search_unspent_by_program_hash(
        &self,
        template_hash: &[u8; 32],
        filters: &SearchFilters,
        offset: u64,
        limit: u32,
    ) -> Result<SearchPage> {
        let url = self.url("/boxes/unspent/search");
        let mut body = json!({ "ergoTreeTemplateHash": hex::encode(template_hash) });
        if !filters.assets.is_empty() {
            body["assets"] = json!(filters.assets);
        }

        let resp = self
            .client
            .post(&url)
            .query(&[("offset", offset.to_string()), ("limit", limit.to_string())])
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(unexpected(resp.status(), &url));
        }
        let page: SearchPage = resp.json().await?;
        debug!(
            "Fetched {} boxes at offset {offset} (total={})",
            page.items.len(),
            page.total
        );
        Ok(page)
    }

    async fn get_token_metadata(&self, token_id: &TokenId) -> Result<TokenMetadata> {
        let url = self.url(&format!("/tokens/{token_id}"));
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(unexpected(resp.status(), &url));
        }
        Ok(resp.json().await?)
    }

    async fn get_transaction_status(&self, tx_id: &str) -> Result<Option<u64>> {
        let url = self.url(&format!("/transactions/{tx_id}"));
        let resp = self.client.get(&url).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let info: TransactionInfo = resp.json().await?;
                Ok(Some(info.num_confirmations))
            }
            s => Err(unexpected(s, &url)),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Confirmation polling
// ─────────────────────────────────────────────────────────

/// Polls [`LedgerSearch::get_transaction_status`] until the transaction has
/// at least one confirmation.  Transient lookup failures are logged and
/// polled through; the reservation timeout bounds the wait.
pub struct PollingConfirmationWatcher<S: ?Sized> {
    search: std::sync::Arc<S>,
    interval: Duration,
}

impl<S: LedgerSearch + ?Sized> PollingConfirmationWatcher<S> {
    pub fn new(search: std::sync::Arc<S>, interval: Duration) -> Self {
        Self { search, interval }
    }
}

#[async_trait]
impl<S: LedgerSearch + ?Sized + 'static> ConfirmationWatcher for PollingConfirmationWatcher<S> {
    async fn wait_for_confirmation(&self, tx_id: &str) -> Result<()> {
        loop {
            match self.search.get_transaction_status(tx_id).await {
                Ok(Some(n)) if n >= 1 => return Ok(()),
                Ok(_) => debug!("transaction {tx_id} not confirmed yet"),
                Err(e) => tracing::warn!("status lookup for {tx_id} failed: {e}"),
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

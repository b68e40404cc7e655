//! Wallet port.

use async_trait::async_trait;
use escrow_protocol::{Address, ChainTime};

use crate::errors::Result;
use crate::tx::{LedgerBox, SignedTransaction, UnsignedTransaction};

/// Signing wallet of the user driving an operation.
///
/// `sign` fails with [`WalletError`](crate::errors::WalletError) sub-kinds
/// (`UserRejected`, `InsufficientFunds`, ...); `submit` returns the id the
/// network assigned.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    async fn get_current_height(&self) -> Result<u32>;
    async fn get_change_address(&self) -> Result<Address>;
    async fn get_utxos(&self) -> Result<Vec<LedgerBox>>;
    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction>;
    async fn submit(&self, tx: &SignedTransaction) -> Result<String>;
}

/// Height from the wallet, wall-clock time from the local clock.
pub async fn chain_time(wallet: &dyn WalletSigner) -> Result<ChainTime> {
    let height = wallet.get_current_height().await?;
    Ok(ChainTime {
        height: u64::from(height),
        timestamp_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
    })
}

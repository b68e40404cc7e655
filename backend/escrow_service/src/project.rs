//! Read-only project view reconstructed from an escrow box.

use escrow_protocol::{
    BoxId, ChainTime, Deadline, EscrowSnapshot, ProjectContent, ProtocolVersion, TokenId,
};
use serde::Serialize;

use crate::explorer::TokenMetadata;
use crate::tx::LedgerBox;

/// One escrow box as observed at a point in time.  Never updated in place;
/// a changed box yields a new `Project`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// Identity token id, stable across every replication of the box.
    pub token_id: TokenId,
    pub escrow_box: LedgerBox,
    pub snapshot: EscrowSnapshot,
    pub content: ProjectContent,
    pub reward_token: Option<TokenMetadata>,
    /// Recovered from the identity holdings and counters when decoded.
    pub total_reward_supply: u64,
}

impl Project {
    pub fn box_id(&self) -> BoxId {
        self.escrow_box.box_id
    }

    pub fn version(&self) -> ProtocolVersion {
        self.snapshot.state.version
    }

    /// Base asset raised and held, without the reserved minimum box value.
    pub fn current_value(&self) -> u64 {
        self.snapshot.raised_balance()
    }

    pub fn is_ended(&self, now: &ChainTime) -> bool {
        self.snapshot.state.is_ended(now)
    }

    pub fn is_successful(&self, now: &ChainTime) -> bool {
        self.is_ended(now) && self.snapshot.state.minimum_reached()
    }

    pub fn net_contributed(&self) -> u64 {
        self.snapshot.state.counters.net_contributed()
    }

    pub fn total_reward_supply(&self) -> u64 {
        self.total_reward_supply
    }

    pub fn unsold_reward_amount(&self) -> u64 {
        self.snapshot.unsold_reward_amount()
    }

    pub fn view(&self, now: &ChainTime) -> ProjectView {
        let state = &self.snapshot.state;
        ProjectView {
            token_id: self.token_id,
            box_id: self.box_id(),
            version: state.version,
            deadline: state.deadline,
            minimum_threshold: state.minimum_threshold,
            unit_price: state.unit_price,
            sold: state.counters.sold,
            refunded: state.counters.refunded,
            exchanged: state.counters.exchanged,
            net_contributed: self.net_contributed(),
            total_reward_supply: self.total_reward_supply(),
            current_value: self.current_value(),
            reward_amount: self.snapshot.reward_amount,
            unsold_reward_amount: self.unsold_reward_amount(),
            is_ended: self.is_ended(now),
            is_successful: self.is_successful(now),
            owner: hex::encode(&state.constants.owner_authorization),
            dev_fee_bps: state.constants.dev_fee_bps,
            reward_token_id: state.constants.reward_token_id,
            reward_token_name: self.reward_token.as_ref().and_then(|m| m.name.clone()),
            reward_token_decimals: self.reward_token.as_ref().and_then(|m| m.decimals),
            base_asset_id: state.constants.base_asset_id,
            content: self.content.clone(),
        }
    }
}

/// JSON shape served by the REST host.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectView {
    pub token_id: TokenId,
    pub box_id: BoxId,
    pub version: ProtocolVersion,
    pub deadline: Deadline,
    pub minimum_threshold: u64,
    pub unit_price: u64,
    pub sold: u64,
    pub refunded: u64,
    pub exchanged: u64,
    pub net_contributed: u64,
    pub total_reward_supply: u64,
    pub current_value: u64,
    pub reward_amount: u64,
    pub unsold_reward_amount: u64,
    pub is_ended: bool,
    pub is_successful: bool,
    pub owner: String,
    pub dev_fee_bps: u32,
    pub reward_token_id: TokenId,
    pub reward_token_name: Option<String>,
    pub reward_token_decimals: Option<u32>,
    pub base_asset_id: Option<TokenId>,
    pub content: ProjectContent,
}

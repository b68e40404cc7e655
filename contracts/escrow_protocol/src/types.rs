//! # Types
//!
//! Shared data structures used across the protocol crate.
//!
//! ## State / holdings split
//!
//! An escrow box is described by two layers:
//!
//! - [`EscrowState`]: everything that lives in the registers R4..R9.
//! - [`EscrowSnapshot`]: the state plus the box's native value and token
//!   holdings, which is what the transition rules operate on.
//!
//! Derived quantities (net contributed, outstanding receipts, unsold reward
//! tokens) are computed, never stored.
//!
//! ## Receipts and the identity token
//!
//! The identity token is minted once with `total_reward_supply + 1` units.
//! One unit always stays in the escrow box as the project marker; the others
//! are handed out to contributors as receipts and flow back on refund or
//! exchange:
//!
//! ```text
//! identity held + (sold - refunded - exchanged) == total_reward_supply + 1
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ProtocolError, Result};
use crate::params::{BPS_DENOMINATOR, MIN_BOX_VALUE};

// ── 32-byte identifiers ──────────────────────────────────────────────

macro_rules! digest32 {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self> {
                let mut out = [0u8; 32];
                hex::decode_to_slice(s, &mut out).map_err(|e| {
                    ProtocolError::malformed(stringify!($name), format!("{s:?}: {e}"))
                })?;
                Ok(Self(out))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

digest32!(
    /// Identifier of a fungible token (the id of the box it was minted from).
    TokenId
);
digest32!(
    /// Identifier of a ledger box.
    BoxId
);

impl From<BoxId> for TokenId {
    fn from(id: BoxId) -> Self {
        TokenId(id.0)
    }
}

// ── Protocol versions ────────────────────────────────────────────────

/// On-chain contract generations.  Each one has its own register layout
/// (see [`crate::registers::layout`]) and program template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    V1_0,
    V1_1,
    V2_0,
}

impl ProtocolVersion {
    pub const ALL: [ProtocolVersion; 3] = [Self::V1_0, Self::V1_1, Self::V2_0];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1_0 => "v1_0",
            Self::V1_1 => "v1_1",
            Self::V2_0 => "v2_0",
        }
    }

    pub fn latest() -> Self {
        Self::V2_0
    }
}

impl FromStr for ProtocolVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v1_0" => Ok(Self::V1_0),
            "v1_1" => Ok(Self::V1_1),
            "v2_0" => Ok(Self::V2_0),
            other => Err(ProtocolError::UnsupportedVersion(other.to_string())),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Time ─────────────────────────────────────────────────────────────

/// Point in chain time the rules are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTime {
    pub height: u64,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

/// Campaign deadline, either a block height or a millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Deadline {
    BlockHeight(u64),
    Timestamp(u64),
}

impl Deadline {
    pub fn is_reached(&self, now: &ChainTime) -> bool {
        match *self {
            Deadline::BlockHeight(h) => now.height >= h,
            Deadline::Timestamp(t) => now.timestamp_ms >= t,
        }
    }

    pub fn raw(&self) -> u64 {
        match *self {
            Deadline::BlockHeight(v) | Deadline::Timestamp(v) => v,
        }
    }
}

// ── Counters ─────────────────────────────────────────────────────────

/// The counters triple stored in R6.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub sold: u64,
    pub refunded: u64,
    pub exchanged: u64,
}

impl Counters {
    pub fn new(sold: u64, refunded: u64, exchanged: u64) -> Self {
        Self {
            sold,
            refunded,
            exchanged,
        }
    }

    /// Receipts sold and not refunded.  This is what the minimum threshold
    /// is measured against.
    pub fn net_contributed(&self) -> u64 {
        self.sold.saturating_sub(self.refunded)
    }

    /// Receipts still in circulation (neither refunded nor exchanged).
    pub fn outstanding(&self) -> u64 {
        self.sold
            .saturating_sub(self.refunded)
            .saturating_sub(self.exchanged)
    }

    /// `refunded + exchanged <= sold`.
    pub fn is_consistent(&self) -> bool {
        self.refunded
            .checked_add(self.exchanged)
            .is_some_and(|spent| spent <= self.sold)
    }
}

// ── Constants blob (R8) ──────────────────────────────────────────────

/// Values baked into the escrow program and mirrored in R8 for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractConstants {
    /// Program bytes that must authorize owner-only actions.
    pub owner_authorization: Vec<u8>,
    /// Program bytes receiving the developer fee share.
    pub dev_authorization: Vec<u8>,
    pub dev_fee_bps: u32,
    pub reward_token_id: TokenId,
    /// `None` means contributions are paid in the native coin.
    pub base_asset_id: Option<TokenId>,
}

/// Wire shape of the constants blob.
#[derive(Serialize, Deserialize)]
struct ConstantsBlob {
    owner: String,
    dev: String,
    dev_fee_bps: u32,
    reward_token_id: String,
    #[serde(default)]
    base_token_id: String,
}

impl ContractConstants {
    pub fn validate(&self) -> Result<()> {
        if u64::from(self.dev_fee_bps) > BPS_DENOMINATOR {
            return Err(ProtocolError::precondition(format!(
                "dev fee of {} bps exceeds 100%",
                self.dev_fee_bps
            )));
        }
        if self.owner_authorization.is_empty() {
            return Err(ProtocolError::precondition("owner authorization is empty"));
        }
        if self.base_asset_id == Some(self.reward_token_id) {
            return Err(ProtocolError::precondition(
                "base asset and reward token must differ",
            ));
        }
        Ok(())
    }

    pub fn to_blob(&self) -> Vec<u8> {
        let blob = ConstantsBlob {
            owner: hex::encode(&self.owner_authorization),
            dev: hex::encode(&self.dev_authorization),
            dev_fee_bps: self.dev_fee_bps,
            reward_token_id: self.reward_token_id.to_hex(),
            base_token_id: self
                .base_asset_id
                .map(|id| id.to_hex())
                .unwrap_or_default(),
        };
        // A struct of strings and integers always serializes.
        serde_json::to_vec(&blob).unwrap_or_default()
    }

    pub fn from_blob(bytes: &[u8]) -> Result<Self> {
        let blob: ConstantsBlob = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::malformed("R8", format!("constants JSON: {e}")))?;
        let owner_authorization = hex::decode(&blob.owner)
            .map_err(|e| ProtocolError::malformed("R8", format!("owner: {e}")))?;
        let dev_authorization = hex::decode(&blob.dev)
            .map_err(|e| ProtocolError::malformed("R8", format!("dev: {e}")))?;
        let reward_token_id = blob
            .reward_token_id
            .parse()
            .map_err(|e: ProtocolError| e.in_register("R8"))?;
        let base_asset_id = if blob.base_token_id.is_empty() {
            None
        } else {
            Some(
                blob.base_token_id
                    .parse()
                    .map_err(|e: ProtocolError| e.in_register("R8"))?,
            )
        };
        Ok(Self {
            owner_authorization,
            dev_authorization,
            dev_fee_bps: blob.dev_fee_bps,
            reward_token_id,
            base_asset_id,
        })
    }
}

// ── Content blob (R9) ────────────────────────────────────────────────

pub const PLACEHOLDER_DESCRIPTION: &str =
    "No description available: the project metadata could not be read.";

/// Owner-editable project metadata stored as UTF-8 JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectContent {
    pub title: String,
    pub description: String,
    pub image: String,
    pub link: String,
}

impl ProjectContent {
    pub fn to_blob(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::malformed("R9", format!("content JSON: {e}")))
    }

    /// Parse, falling back to placeholder content keyed by `identifier`.
    pub fn parse_or_placeholder(bytes: &[u8], identifier: &str) -> Self {
        Self::parse(bytes).unwrap_or_else(|e| {
            tracing::debug!("content of {identifier} unreadable ({e}), using placeholder");
            Self::placeholder(identifier)
        })
    }

    pub fn placeholder(identifier: &str) -> Self {
        let short: String = identifier.chars().take(8).collect();
        Self {
            title: format!("Project {short}"),
            description: PLACEHOLDER_DESCRIPTION.to_string(),
            image: String::new(),
            link: String::new(),
        }
    }
}

// ── Escrow state ─────────────────────────────────────────────────────

/// Everything the registers of an escrow box carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowState {
    pub version: ProtocolVersion,
    pub deadline: Deadline,
    pub minimum_threshold: u64,
    pub counters: Counters,
    pub unit_price: u64,
    pub constants: ContractConstants,
    pub content_blob: Vec<u8>,
}

impl EscrowState {
    pub fn is_native_base(&self) -> bool {
        self.constants.base_asset_id.is_none()
    }

    /// Tokens the escrow box holds once contributions have arrived.
    pub fn token_slots(&self) -> usize {
        if self.is_native_base() {
            2
        } else {
            3
        }
    }

    pub fn is_ended(&self, now: &ChainTime) -> bool {
        self.deadline.is_reached(now)
    }

    pub fn minimum_reached(&self) -> bool {
        self.counters.net_contributed() >= self.minimum_threshold
    }

    /// Fields that must survive every self-replication unchanged.
    pub fn same_immutable_fields(&self, other: &EscrowState) -> bool {
        self.version == other.version
            && self.deadline == other.deadline
            && self.minimum_threshold == other.minimum_threshold
            && self.unit_price == other.unit_price
            && self.constants == other.constants
    }
}

/// Escrow state together with the box's value and token holdings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowSnapshot {
    pub state: EscrowState,
    /// Native value of the box.
    pub value: u64,
    pub identity_amount: u64,
    pub reward_amount: u64,
    /// Base-asset tokens held; always zero for native-coin projects.
    pub base_amount: u64,
}

impl EscrowSnapshot {
    /// Base asset raised and currently held (the protocol-reserved minimum
    /// box value is not counted for native-coin projects).
    pub fn raised_balance(&self) -> u64 {
        if self.state.is_native_base() {
            self.value.saturating_sub(MIN_BOX_VALUE)
        } else {
            self.base_amount
        }
    }

    /// Total receipts the project can ever issue, recovered from the
    /// identity-token conservation law.  `None` when the holdings and the
    /// counters cannot belong to one minted supply.
    pub fn total_reward_supply(&self) -> Option<u64> {
        self.identity_amount
            .checked_add(self.state.counters.outstanding())
            .map(|minted| minted.saturating_sub(1))
    }

    /// Reward tokens not needed to back outstanding receipts.
    pub fn unsold_reward_amount(&self) -> u64 {
        self.reward_amount
            .saturating_sub(self.state.counters.outstanding())
    }

    /// Receipts the box can still hand out.
    pub fn receipts_available(&self) -> u64 {
        self.identity_amount.saturating_sub(1)
    }
}

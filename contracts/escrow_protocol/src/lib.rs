// contracts/escrow_protocol/src/lib.rs
//
// Off-chain mirror of the token-escrow contract family.

//! # Escrow Protocol
//!
//! Pure protocol core of the token-escrow fundraising system.  A project lives
//! in one self-replicating escrow box whose registers R4..R9 carry the whole
//! contract state; every operation spends that box and produces its successor.
//!
//! | Concern            | Entry point(s)                                        |
//! |--------------------|-------------------------------------------------------|
//! | Register codec     | [`registers::encode`], [`registers::decode`]          |
//! | Contract variants  | [`ContractResolver::resolve`], `resolve_mint`, `template_hash` |
//! | Box feasibility    | [`FeasibilityValidator::validate`]                    |
//! | Transition rules   | [`rules::contribute`], `refund`, `exchange`, `withdraw_funds`, `rebalance`, `withdraw_unsold` |
//! | Addresses          | [`Address::parse`], [`Address::from_program`]         |
//!
//! ## Architecture
//!
//! Nothing in this crate performs I/O except through the injected
//! [`ProgramCompiler`].  Transaction assembly, wallet access and ledger search
//! live in the `escrow_service` crate, which feeds [`EscrowSnapshot`]s into
//! [`rules`] and turns the resulting successor states back into boxes.

pub mod address;
pub mod error;
pub mod feasibility;
pub mod registers;
pub mod rules;
pub mod sigma;
pub mod templates;
pub mod types;
pub mod variants;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod test_feasibility;
#[cfg(test)]
mod test_lifecycle;
#[cfg(test)]
mod test_registers;

pub use address::{blake2b256, Address, AddressKind, Network};
pub use error::{ProtocolError, Result};
pub use feasibility::{BoxSizeModel, FeasibilityValidator, ValidationReport};
pub use registers::Registers;
pub use rules::{Withdrawal, WithdrawalOutcome};
pub use types::{
    BoxId, ChainTime, ContractConstants, Counters, Deadline, EscrowSnapshot, EscrowState,
    ProjectContent, ProtocolVersion, TokenId,
};
pub use variants::{ContractResolver, ProgramCompiler, ResolvedProgram};

/// Ledger parameters the contracts and builders agree on.
pub mod params {
    /// Smallest native value a box may carry.
    pub const MIN_BOX_VALUE: u64 = 1_000_000;
    /// Miner fee attached to every transaction.
    pub const TX_FEE: u64 = 1_100_000;
    /// Hard cap on a serialized box, in bytes.
    pub const MAX_BOX_SIZE: usize = 4096;
    pub const BPS_DENOMINATOR: u64 = 10_000;
}

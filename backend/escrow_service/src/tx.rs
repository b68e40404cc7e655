//! Transaction model in the node's JSON shape, plus coin selection and the
//! builder that balances inputs against outputs.
//!
//! ## Balancing
//!
//! `inputs = outputs + fee + change`, token by token.  The only token allowed
//! to appear in outputs without being in inputs is the one minted under the
//! id of the first input.

use std::collections::{BTreeMap, HashSet};

use escrow_protocol::params::{MIN_BOX_VALUE, TX_FEE};
use escrow_protocol::{BoxId, TokenId};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{Result, ServiceError};
use crate::reservation::ReservationGuard;

/// Program of the miner fee box.
pub const FEE_PROGRAM_HEX: &str = "1005040004000e36100204a00b08cd0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798ea02d192a39a8cc7a701730073011001020402d19683030193a38cc7b2a57300000193c2b2a57301007473027303830108cdeeac93b1a57304";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub token_id: TokenId,
    pub amount: u64,
}

impl Token {
    pub fn new(token_id: TokenId, amount: u64) -> Self {
        Self { token_id, amount }
    }
}

/// An unspent box as the node wallet and the explorer report it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerBox {
    pub box_id: BoxId,
    pub value: u64,
    #[serde(with = "hex::serde")]
    pub ergo_tree: Vec<u8>,
    #[serde(default)]
    pub assets: Vec<Token>,
    #[serde(default, deserialize_with = "registers_either")]
    pub additional_registers: BTreeMap<String, String>,
    #[serde(default)]
    pub creation_height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u16>,
}

impl LedgerBox {
    pub fn token_amount(&self, id: &TokenId) -> u64 {
        self.assets
            .iter()
            .filter(|t| t.token_id == *id)
            .map(|t| t.amount)
            .sum()
    }
}

/// Registers arrive either as `{"R4": "<hex>"}` (node) or as
/// `{"R4": {"serializedValue": "<hex>", ...}}` (explorer).
fn registers_either<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Slot {
        Hex(String),
        Rendered {
            #[serde(rename = "serializedValue")]
            serialized_value: String,
        },
    }

    let raw: BTreeMap<String, Slot> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| match v {
            Slot::Hex(h) | Slot::Rendered { serialized_value: h } => (k, h),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputCandidate {
    pub value: u64,
    #[serde(with = "hex::serde")]
    pub ergo_tree: Vec<u8>,
    pub assets: Vec<Token>,
    pub additional_registers: BTreeMap<String, String>,
    pub creation_height: u32,
}

impl OutputCandidate {
    pub fn new(value: u64, ergo_tree: Vec<u8>, creation_height: u32) -> Self {
        Self {
            value,
            ergo_tree,
            assets: Vec::new(),
            additional_registers: BTreeMap::new(),
            creation_height,
        }
    }

    pub fn with_token(mut self, token_id: TokenId, amount: u64) -> Self {
        if amount > 0 {
            self.assets.push(Token::new(token_id, amount));
        }
        self
    }

    pub fn with_registers(mut self, registers: BTreeMap<String, String>) -> Self {
        self.additional_registers = registers;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedInput {
    pub box_id: BoxId,
    #[serde(default)]
    pub extension: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataInput {
    pub box_id: BoxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub inputs: Vec<UnsignedInput>,
    pub data_inputs: Vec<DataInput>,
    pub outputs: Vec<OutputCandidate>,
}

impl UnsignedTransaction {
    pub fn input_ids(&self) -> Vec<BoxId> {
        self.inputs.iter().map(|i| i.box_id).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingProof {
    pub proof_bytes: String,
    #[serde(default)]
    pub extension: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedInput {
    pub box_id: BoxId,
    pub spending_proof: SpendingProof,
}

/// Either a wallet-signed transaction, with its outputs as boxes carrying
/// ids, or an unproven one ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub inputs: Vec<SignedInput>,
    #[serde(default)]
    pub data_inputs: Vec<DataInput>,
    pub outputs: Vec<SignedOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignedOutput {
    Box(LedgerBox),
    Candidate(OutputCandidate),
}

impl SignedTransaction {
    /// Inputs whose program needs no signature (empty proofs).
    pub fn from_unproven(tx: UnsignedTransaction) -> Self {
        Self {
            id: String::new(),
            inputs: tx
                .inputs
                .into_iter()
                .map(|i| SignedInput {
                    box_id: i.box_id,
                    spending_proof: SpendingProof {
                        proof_bytes: String::new(),
                        extension: i.extension,
                    },
                })
                .collect(),
            data_inputs: tx.data_inputs,
            outputs: tx.outputs.into_iter().map(SignedOutput::Candidate).collect(),
        }
    }

    /// Output `index` with its id, as only signed outputs carry.
    pub fn output_box(&self, index: usize) -> Result<LedgerBox> {
        match self.outputs.get(index) {
            Some(SignedOutput::Box(b)) => Ok(b.clone()),
            Some(SignedOutput::Candidate(_)) => Err(ServiceError::Network(format!(
                "signed transaction {} reports output {index} without a box id",
                self.id
            ))),
            None => Err(ServiceError::Network(format!(
                "signed transaction {} has no output {index}",
                self.id
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Coin selection
// ─────────────────────────────────────────────────────────

/// Pick wallet boxes, skipping reserved ones and `exclude`, until `value`
/// and every `(token, amount)` in `tokens` are covered.
pub fn select_inputs(
    wallet: &[LedgerBox],
    guard: &ReservationGuard,
    exclude: &HashSet<BoxId>,
    value: u64,
    tokens: &[(TokenId, u64)],
) -> Result<Vec<LedgerBox>> {
    let mut picked: Vec<LedgerBox> = Vec::new();
    let mut have_value = 0u64;
    let mut missing: BTreeMap<TokenId, u64> = tokens
        .iter()
        .filter(|(_, amount)| *amount > 0)
        .map(|(id, amount)| (*id, *amount))
        .collect();

    let candidates = wallet
        .iter()
        .filter(|b| !exclude.contains(&b.box_id) && !guard.is_reserved(&b.box_id));

    // Token holders first so one box can satisfy both needs.
    let (with_tokens, plain): (Vec<&LedgerBox>, Vec<&LedgerBox>) = candidates
        .partition(|b| b.assets.iter().any(|t| missing.contains_key(&t.token_id)));

    for candidate in with_tokens.into_iter().chain(plain) {
        let value_short = have_value < value;
        let useful = value_short
            || candidate
                .assets
                .iter()
                .any(|t| missing.get(&t.token_id).is_some_and(|m| *m > 0));
        if !useful {
            continue;
        }
        have_value = have_value.saturating_add(candidate.value);
        for t in &candidate.assets {
            if let Some(m) = missing.get_mut(&t.token_id) {
                *m = m.saturating_sub(t.amount);
            }
        }
        picked.push(candidate.clone());
        if have_value >= value && missing.values().all(|m| *m == 0) {
            return Ok(picked);
        }
    }

    if let Some((id, short)) = missing.iter().find(|(_, m)| **m > 0) {
        return Err(ServiceError::precondition(format!(
            "wallet lacks {short} units of token {id}"
        )));
    }
    if value == 0 {
        return Ok(picked);
    }
    Err(ServiceError::precondition(format!(
        "insufficient base-asset balance: wallet holds {have_value} spendable, {value} needed"
    )))
}

// ─────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────

pub struct TxBuilder {
    height: u32,
    change_program: Vec<u8>,
    inputs: Vec<LedgerBox>,
    outputs: Vec<OutputCandidate>,
    fee: u64,
}

impl TxBuilder {
    pub fn new(height: u32, change_program: Vec<u8>) -> Self {
        Self {
            height,
            change_program,
            inputs: Vec::new(),
            outputs: Vec::new(),
            fee: TX_FEE,
        }
    }

    pub fn input(mut self, input: LedgerBox) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, output: OutputCandidate) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    fn minted_id(&self) -> Option<TokenId> {
        self.inputs.first().map(|b| TokenId::from(b.box_id))
    }

    /// Value and tokens the outputs and fee need beyond the current inputs.
    fn shortfall(&self) -> (u64, Vec<(TokenId, u64)>) {
        let spent: u64 = self.outputs.iter().map(|o| o.value).sum::<u64>() + self.fee;
        let held: u64 = self.inputs.iter().map(|b| b.value).sum();

        let minted = self.minted_id();
        let mut needed: BTreeMap<TokenId, u64> = BTreeMap::new();
        for t in self.outputs.iter().flat_map(|o| &o.assets) {
            if Some(t.token_id) != minted {
                *needed.entry(t.token_id).or_default() += t.amount;
            }
        }
        let tokens = needed
            .into_iter()
            .filter_map(|(id, amount)| {
                let have: u64 = self.inputs.iter().map(|b| b.token_amount(&id)).sum();
                (amount > have).then(|| (id, amount - have))
            })
            .collect();
        (spent.saturating_sub(held), tokens)
    }

    /// Whether adding `extra` balances the transaction with nothing left for
    /// a change box.
    fn settles_exactly(&self, extra: &LedgerBox) -> bool {
        let (value, _) = self.shortfall();
        if value == 0 || extra.value != value {
            return false;
        }
        let minted = self.minted_id();
        let mut balance: BTreeMap<TokenId, i128> = BTreeMap::new();
        for t in self.inputs.iter().chain([extra]).flat_map(|b| &b.assets) {
            *balance.entry(t.token_id).or_default() += i128::from(t.amount);
        }
        for t in self.outputs.iter().flat_map(|o| &o.assets) {
            *balance.entry(t.token_id).or_default() -= i128::from(t.amount);
        }
        balance
            .iter()
            .all(|(id, left)| *left == 0 || (*left < 0 && Some(*id) == minted))
    }

    /// Add wallet boxes until the transaction balances, exactly with a single
    /// box when the wallet has one, otherwise with room for a change box.
    /// `at_least_one` forces a wallet input even when none is needed.
    pub fn fund_from(
        mut self,
        wallet: &[LedgerBox],
        guard: &ReservationGuard,
        at_least_one: bool,
    ) -> Result<Self> {
        let (value, tokens) = self.shortfall();
        if value == 0 && tokens.is_empty() && !at_least_one {
            return Ok(self);
        }
        let exclude: HashSet<BoxId> = self.inputs.iter().map(|b| b.box_id).collect();
        let exact = wallet.iter().find(|b| {
            !exclude.contains(&b.box_id) && !guard.is_reserved(&b.box_id) && self.settles_exactly(b)
        });
        if let Some(exact) = exact {
            self.inputs.push(exact.clone());
            return Ok(self);
        }
        let target = if value == 0 { 0 } else { value + MIN_BOX_VALUE };
        let mut picked = select_inputs(wallet, guard, &exclude, target, &tokens)?;
        if picked.is_empty() && at_least_one {
            picked = select_inputs(wallet, guard, &exclude, MIN_BOX_VALUE, &[])?;
        }
        self.inputs.extend(picked);
        Ok(self)
    }

    pub fn build(self) -> Result<UnsignedTransaction> {
        if self.inputs.is_empty() {
            return Err(ServiceError::precondition("transaction has no inputs"));
        }
        if let Some(low) = self.outputs.iter().find(|o| o.value < MIN_BOX_VALUE) {
            return Err(ServiceError::precondition(format!(
                "amount too small relative to fee minimums: an output of {} is below {MIN_BOX_VALUE}",
                low.value
            )));
        }

        let minted = self.minted_id();
        let mut balance: BTreeMap<TokenId, i128> = BTreeMap::new();
        for t in self.inputs.iter().flat_map(|b| &b.assets) {
            *balance.entry(t.token_id).or_default() += i128::from(t.amount);
        }
        for t in self.outputs.iter().flat_map(|o| &o.assets) {
            *balance.entry(t.token_id).or_default() -= i128::from(t.amount);
        }
        let mut change_tokens = Vec::new();
        for (id, left) in balance {
            if left < 0 && Some(id) != minted {
                return Err(ServiceError::precondition(format!(
                    "inputs lack {} units of token {id}",
                    -left
                )));
            }
            if left > 0 {
                change_tokens.push(Token::new(id, left as u64));
            }
        }

        let held: u64 = self.inputs.iter().map(|b| b.value).sum();
        let spent: u64 = self.outputs.iter().map(|o| o.value).sum::<u64>() + self.fee;
        let change = held.checked_sub(spent).ok_or_else(|| {
            ServiceError::precondition(format!(
                "insufficient base-asset balance: inputs hold {held}, outputs and fee need {spent}"
            ))
        })?;

        let mut outputs = self.outputs;
        if change > 0 || !change_tokens.is_empty() {
            if change < MIN_BOX_VALUE {
                return Err(ServiceError::precondition(format!(
                    "change of {change} is below the minimum box value {MIN_BOX_VALUE}"
                )));
            }
            outputs.push(OutputCandidate {
                value: change,
                ergo_tree: self.change_program,
                assets: change_tokens,
                additional_registers: BTreeMap::new(),
                creation_height: self.height,
            });
        }
        if self.fee > 0 {
            let fee_program = hex::decode(FEE_PROGRAM_HEX)
                .map_err(|e| ServiceError::Config(format!("fee program: {e}")))?;
            outputs.push(OutputCandidate::new(self.fee, fee_program, self.height));
        }

        Ok(UnsignedTransaction {
            inputs: self
                .inputs
                .iter()
                .map(|b| UnsignedInput {
                    box_id: b.box_id,
                    extension: BTreeMap::new(),
                })
                .collect(),
            data_inputs: Vec::new(),
            outputs,
        })
    }
}

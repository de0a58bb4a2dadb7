use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::collections::BTreeMap;

use super::amount::{Amount, AmountError};
use super::crypto::Address;

/// An indivisible piece of spendable value owned by one address.
///
/// Outputs are never mutated: they are created by a transfer and removed
/// when a later transfer consumes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UnspentOutput {
    /// Producing transfer id plus a ledger-wide counter
    pub id: String,

    /// Address allowed to spend this output
    pub owner_address: Address,

    /// Strictly positive value
    #[schema(value_type = String, example = "50.00000000")]
    pub amount: Amount,
}

impl UnspentOutput {
    pub fn new(id: String, owner_address: Address, amount: Amount) -> Self {
        debug_assert!(!amount.is_zero(), "outputs must carry value");

        UnspentOutput {
            id,
            owner_address,
            amount,
        }
    }

    /// Canonical encoding used as hashing input by transfers
    pub fn canonical(&self) -> serde_json::Value {
        serde_json::json!({
            "amount": self.amount,
            "id": self.id,
            "owner_address": self.owner_address,
        })
    }
}

/// The live UTXO set, keyed by output id.
///
/// The set keeps a running total and refuses outputs that would push it past
/// `u64::MAX` minor units, so the total and every per-owner sum are exact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtxoSet {
    outputs: BTreeMap<String, UnspentOutput>,

    /// Sum of all live outputs
    total: Amount,

    /// Next output counter; never decreases, even when outputs are removed
    next_output: u64,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a fresh output id for an output produced by `txid`
    pub fn next_output_id(&mut self, txid: &str) -> String {
        let id = format!("{}:{}", txid, self.next_output);
        self.next_output += 1;
        id
    }

    /// Adds an output, failing if the set's total would overflow
    pub fn insert(&mut self, output: UnspentOutput) -> Result<(), AmountError> {
        let mut total = self
            .total
            .checked_add(output.amount)
            .ok_or(AmountError::Overflow)?;
        if let Some(replaced) = self.outputs.get(&output.id) {
            total = total
                .checked_sub(replaced.amount)
                .ok_or(AmountError::Overflow)?;
        }

        self.total = total;
        self.outputs.insert(output.id.clone(), output);
        Ok(())
    }

    /// Whether minting `amount` more keeps the total representable
    pub fn can_hold(&self, amount: Amount) -> bool {
        self.total.checked_add(amount).is_some()
    }

    pub fn remove(&mut self, id: &str) -> Option<UnspentOutput> {
        let output = self.outputs.remove(id)?;
        // removed value is always part of the running total
        self.total = self
            .total
            .checked_sub(output.amount)
            .unwrap_or(Amount::ZERO);
        Some(output)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.outputs.contains_key(id)
    }

    /// Outputs owned by `address`, ordered by id
    pub fn owned_by(&self, address: &Address) -> Vec<UnspentOutput> {
        self.outputs
            .values()
            .filter(|output| &output.owner_address == address)
            .cloned()
            .collect()
    }

    /// Value owned by `address`, or `None` if it does not fit in an amount
    pub fn balance_of(&self, address: &Address) -> Option<Amount> {
        self.outputs
            .values()
            .filter(|output| &output.owner_address == address)
            .map(|output| output.amount)
            .sum()
    }

    /// Total value in circulation
    pub fn total(&self) -> Amount {
        self.total
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnspentOutput> {
        self.outputs.values()
    }
}

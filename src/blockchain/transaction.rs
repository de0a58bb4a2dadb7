use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::account::Account;
use super::amount::Amount;
use super::crypto::{
    hash_canonical, public_key_from_hex, verify_signature, Address, CryptoError, DigitalSignature,
};
use super::utxo::{UnspentOutput, UtxoSet};

/// Reasons a transfer is rejected. None of them leaves a trace in the UTXO set.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid sender address: {0}")]
    InvalidSenderAddress(String),

    #[error("Transaction not signed")]
    NotSigned,

    #[error("Transaction already signed")]
    AlreadySigned,

    #[error("Transaction already applied")]
    AlreadyApplied,

    #[error("Input {0} is no longer unspent")]
    StaleInput(String),

    #[error("Amount overflow")]
    Overflow,

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// Distinguishes minting transfers from value movements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Coinbase,
    Standard,
}

/// The spending side of a standard transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub address: Address,

    /// Hex-encoded public key, needed to check the signature
    pub public_key: String,
}

/// Mutable engine state a transfer touches while it is applied
pub struct ApplyContext<'a> {
    pub utxos: &'a mut UtxoSet,
    pub fee_ledger: &'a mut Vec<Amount>,
}

/// A single value movement and its effect on the UTXO set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Ledger-assigned sequence number
    pub id: u64,

    /// `None` for coinbase transfers
    pub sender: Option<Sender>,

    pub receiver: Address,

    pub amount: Amount,

    pub fee: Amount,

    /// The sender's outputs when the transfer was built
    pub inputs: Vec<UnspentOutput>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<DigitalSignature>,

    /// Hash of the canonical pre-signature data
    pub txid: String,

    /// Ids of the inputs consumed by `apply`
    #[serde(default)]
    pub spent: Vec<String>,

    /// Outputs created by `apply`
    #[serde(default)]
    pub outputs: Vec<UnspentOutput>,
}

/// Serialized transfer as carried by the mempool and by blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransactionRecord {
    pub kind: TransferKind,

    pub id: u64,

    pub sender: Option<Address>,

    pub receiver: Address,

    #[schema(value_type = String, example = "50.00000000")]
    pub amount: Amount,

    #[schema(value_type = String, example = "0.50000000")]
    pub fee: Amount,

    pub inputs: Vec<UnspentOutput>,

    pub txid: String,
}

impl TransactionRecord {
    /// Fee owed to the miner; coinbase records carry none
    pub fn miner_fee(&self) -> Amount {
        match self.kind {
            TransferKind::Coinbase => Amount::ZERO,
            TransferKind::Standard => self.fee,
        }
    }
}

impl Transaction {
    /// Creates a coinbase transfer minting `amount` to `receiver`
    pub fn coinbase(id: u64, receiver: Address, amount: Amount) -> Self {
        let mut transaction = Transaction {
            id,
            sender: None,
            receiver,
            amount,
            fee: Amount::ZERO,
            inputs: Vec::new(),
            signature: None,
            txid: String::new(),
            spent: Vec::new(),
            outputs: Vec::new(),
        };
        transaction.txid = transaction.compute_id();
        transaction
    }

    /// Creates an unsigned standard transfer from `sender` to `receiver`.
    ///
    /// The sender's currently owned outputs are captured as candidate inputs.
    pub fn new(
        id: u64,
        sender: &Account,
        receiver: Address,
        amount: Amount,
        fee: Amount,
        utxos: &UtxoSet,
    ) -> Self {
        let mut transaction = Transaction {
            id,
            sender: Some(Sender {
                address: sender.address().clone(),
                public_key: sender.public_key_hex(),
            }),
            receiver,
            amount,
            fee,
            inputs: utxos.owned_by(sender.address()),
            signature: None,
            txid: String::new(),
            spent: Vec::new(),
            outputs: Vec::new(),
        };
        transaction.txid = transaction.compute_id();
        transaction
    }

    pub fn kind(&self) -> TransferKind {
        match self.sender {
            Some(_) => TransferKind::Standard,
            None => TransferKind::Coinbase,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.kind() == TransferKind::Coinbase
    }

    pub fn sender_address(&self) -> Option<&Address> {
        self.sender.as_ref().map(|sender| &sender.address)
    }

    /// Canonical pre-signature data; the signature never influences the id
    fn canonical_data(&self) -> serde_json::Value {
        let inputs: Vec<serde_json::Value> =
            self.inputs.iter().map(UnspentOutput::canonical).collect();

        serde_json::json!({
            "amount": self.amount,
            "fee": self.fee,
            "id": self.id,
            "inputs": inputs,
            "receiver": self.receiver,
            "sender": self.sender_address(),
        })
    }

    /// Deterministic hash over the canonical pre-signature data
    pub fn compute_id(&self) -> String {
        hash_canonical(&self.canonical_data())
    }

    /// Amount plus fee
    pub fn total_required(&self) -> Result<Amount, TransactionError> {
        self.amount
            .checked_add(self.fee)
            .ok_or(TransactionError::Overflow)
    }

    /// Value held by the captured sender outputs
    pub fn available(&self) -> Result<Amount, TransactionError> {
        self.inputs
            .iter()
            .map(|input| input.amount)
            .sum::<Option<Amount>>()
            .ok_or(TransactionError::Overflow)
    }

    /// Signs the transfer id with the sender's key
    pub fn sign(&mut self, account: &Account) -> Result<(), TransactionError> {
        let sender = match &self.sender {
            Some(sender) => sender,
            None => return Ok(()),
        };

        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        if account.address() != &sender.address {
            return Err(TransactionError::InvalidSenderAddress(
                "Signing account does not match sender address".to_string(),
            ));
        }

        self.signature = Some(account.sign(self.txid.as_bytes()));
        Ok(())
    }

    /// Checks an attached signature against the transfer id.
    ///
    /// An unsigned transfer passes: the signature is only checked once one is
    /// present. `apply` signs before it validates.
    fn verify_signature(&self) -> Result<(), TransactionError> {
        let (sender, signature) = match (&self.sender, &self.signature) {
            (Some(sender), Some(signature)) => (sender, signature),
            _ => return Ok(()),
        };

        let public_key = public_key_from_hex(&sender.public_key)?;
        if Address::from_public_key(&public_key) != sender.address {
            return Err(TransactionError::InvalidSenderAddress(
                "Public key does not hash to sender address".to_string(),
            ));
        }

        match verify_signature(self.txid.as_bytes(), signature, &public_key) {
            Ok(true) => Ok(()),
            _ => Err(TransactionError::InvalidSignature),
        }
    }

    /// Checks amount, funds and any attached signature
    pub fn validate(&self) -> Result<(), TransactionError> {
        if self.amount.is_zero() {
            return Err(TransactionError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        if self.is_coinbase() {
            return Ok(());
        }

        let required = self.total_required()?;
        let available = self.available()?;
        if available < required {
            return Err(TransactionError::InsufficientFunds {
                required,
                available,
            });
        }

        self.verify_signature()
    }

    /// Picks inputs smallest-first until they cover amount plus fee.
    ///
    /// Returns the selected outputs and their total.
    pub fn select_inputs(&self) -> Result<(Vec<UnspentOutput>, Amount), TransactionError> {
        let required = self.total_required()?;
        let mut candidates = self.inputs.clone();
        candidates.sort_by_key(|input| input.amount);

        let mut selected = Vec::new();
        let mut total = Amount::ZERO;
        for input in candidates {
            total = total.checked_add(input.amount).ok_or(TransactionError::Overflow)?;
            selected.push(input);
            if total >= required {
                return Ok((selected, total));
            }
        }

        Err(TransactionError::InsufficientFunds {
            required,
            available: total,
        })
    }

    /// Applies the transfer to the UTXO set, all or nothing.
    ///
    /// Coinbase transfers mint one output for the receiver. Standard transfers
    /// are signed by `signer` (unless a signature is already attached),
    /// validated, and then consume their selected inputs, paying the receiver
    /// and returning any change to the sender.
    ///
    /// # Arguments
    ///
    /// * `signer` - The sender's account, used when no signature is attached
    /// * `ctx` - The UTXO set and fee ledger to update
    ///
    /// # Returns
    ///
    /// `Ok(())` once outputs are created, or the reason the transfer was
    /// refused with nothing changed
    pub fn apply(
        &mut self,
        signer: Option<&Account>,
        ctx: ApplyContext<'_>,
    ) -> Result<(), TransactionError> {
        if !self.outputs.is_empty() {
            return Err(TransactionError::AlreadyApplied);
        }

        let sender_address = match self.sender_address() {
            Some(address) => address.clone(),
            None => {
                self.validate()?;
                if !ctx.utxos.can_hold(self.amount) {
                    return Err(TransactionError::Overflow);
                }
                let id = ctx.utxos.next_output_id(&self.txid);
                let output = UnspentOutput::new(id, self.receiver.clone(), self.amount);
                ctx.utxos
                    .insert(output.clone())
                    .map_err(|_| TransactionError::Overflow)?;
                self.outputs.push(output);
                return Ok(());
            }
        };

        if self.signature.is_none() {
            let account = signer.ok_or(TransactionError::NotSigned)?;
            self.sign(account)?;
        }
        self.validate()?;

        let (selected, total_input) = self.select_inputs()?;
        if let Some(stale) = selected.iter().find(|input| !ctx.utxos.contains(&input.id)) {
            return Err(TransactionError::StaleInput(stale.id.clone()));
        }

        let required = self.total_required()?;
        let change = total_input
            .checked_sub(required)
            .ok_or(TransactionError::Overflow)?;

        for input in &selected {
            ctx.utxos.remove(&input.id);
        }

        let receiver_id = ctx.utxos.next_output_id(&self.txid);
        let mut created = vec![UnspentOutput::new(
            receiver_id,
            self.receiver.clone(),
            self.amount,
        )];
        if !change.is_zero() {
            let change_id = ctx.utxos.next_output_id(&self.txid);
            created.push(UnspentOutput::new(change_id, sender_address, change));
        }

        // inputs cover every created output, so the total only shrinks
        for output in &created {
            ctx.utxos
                .insert(output.clone())
                .map_err(|_| TransactionError::Overflow)?;
        }
        ctx.fee_ledger.push(self.fee);

        debug!(
            "Transaction {} consumed {} inputs, created {} outputs",
            self.id,
            selected.len(),
            created.len()
        );

        self.spent = selected.into_iter().map(|input| input.id).collect();
        self.outputs = created;
        Ok(())
    }

    /// Serialized form carried by the mempool and blocks
    pub fn to_record(&self) -> TransactionRecord {
        TransactionRecord {
            kind: self.kind(),
            id: self.id,
            sender: self.sender_address().cloned(),
            receiver: self.receiver.clone(),
            amount: self.amount,
            fee: self.fee,
            inputs: self.inputs.clone(),
            txid: self.txid.clone(),
        }
    }
}

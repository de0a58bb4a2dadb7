// Blockchain module
//
// This module contains the ledger core:
// - Fixed-point amounts
// - Accounts and cryptography utilities
// - Unspent outputs and the live UTXO set
// - Transfers (coinbase and standard)
// - Block structure and proof of work
// - The ledger engine tying them together

pub mod account;
pub mod amount;
pub mod block;
pub mod config;
pub mod crypto;
pub mod ledger;
pub mod pow;
pub mod transaction;
pub mod utxo;

// Re-export main components for easier access
pub use account::AccountId;
pub use amount::Amount;
pub use block::Block;
pub use config::LedgerConfig;
pub use crypto::Address;
pub use ledger::{AccountBalance, CirculationPoint, Ledger, LedgerError};
pub use transaction::{TransactionRecord, TransferKind};
pub use utxo::UnspentOutput;

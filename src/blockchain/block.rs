use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::time::Duration;

use super::amount::Amount;
use super::crypto::hash_canonical;
use super::transaction::TransactionRecord;

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Timestamp when the block was assembled
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Serialized transfers, coinbase first
    pub transactions: Vec<TransactionRecord>,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Proof of work
    pub nonce: u64,

    /// Hash of the current block (calculated)
    pub hash: String,

    /// Wall-clock time spent searching for the nonce
    #[schema(value_type = Object)]
    pub mining_time: Duration,

    /// Base reward plus collected fees paid to the miner
    #[schema(value_type = String, example = "3.50000000")]
    pub miner_reward: Amount,
}

impl Block {
    /// Assembles a candidate block with nonce 0
    ///
    /// # Arguments
    ///
    /// * `index` - Position of the block in the chain
    /// * `transactions` - Serialized transfers, coinbase first
    /// * `previous_hash` - Hash of the preceding block, `"0"` for genesis
    /// * `miner_reward` - Value paid to the miner by the coinbase transfer
    ///
    /// # Returns
    ///
    /// A block whose hash matches its contents but may not meet any difficulty yet
    pub fn new(
        index: u64,
        transactions: Vec<TransactionRecord>,
        previous_hash: String,
        miner_reward: Amount,
    ) -> Self {
        let mut block = Block {
            index,
            timestamp: Utc::now(),
            transactions,
            previous_hash,
            nonce: 0,
            hash: String::new(),
            mining_time: Duration::ZERO,
            miner_reward,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Calculates the SHA-256 hash of the block's canonical encoding
    pub fn calculate_hash(&self) -> String {
        let block_data = serde_json::json!({
            "index": self.index,
            "nonce": self.nonce,
            "previous_hash": self.previous_hash,
            "timestamp": self.timestamp,
            "transactions": self.transactions,
        });

        hash_canonical(&block_data)
    }

    /// Sets the nonce and recomputes the hash
    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
        self.hash = self.calculate_hash();
    }

    /// Whether the stored hash has `difficulty` leading zero hex digits
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        hash_meets_difficulty(&self.hash, difficulty)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == GENESIS_PREVIOUS_HASH
    }
}

/// Accepts a hex hash iff its first `difficulty` characters are `'0'`
pub fn hash_meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

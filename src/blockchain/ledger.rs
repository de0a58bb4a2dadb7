use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::collections::BTreeMap;

use super::account::{Account, AccountId};
use super::amount::Amount;
use super::block::{Block, GENESIS_PREVIOUS_HASH};
use super::config::{ConfigError, LedgerConfig};
use super::crypto::Address;
use super::pow::{NonceSource, ProofOfWork, UniformNonces};
use super::transaction::{ApplyContext, Transaction, TransactionError, TransactionRecord};
use super::utxo::UtxoSet;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Transfer rejected: {0}")]
    Rejected(#[from] TransactionError),

    #[error("Unknown account: {0}")]
    UnknownAccount(AccountId),

    #[error("Chain is empty: no genesis block")]
    EmptyChain,

    #[error("Mempool is empty: nothing to mine")]
    EmptyMempool,

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Amount overflow while totalling {0}")]
    Overflow(&'static str),
}

impl LedgerError {
    /// Whether the error is an ordinary transfer rejection rather than a
    /// violated precondition
    pub fn is_rejection(&self) -> bool {
        matches!(self, LedgerError::Rejected(_))
    }
}

/// Value in circulation right after a block was committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CirculationPoint {
    pub block_index: u64,

    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    #[schema(value_type = String, example = "1003.00000000")]
    pub total: Amount,
}

/// An account's identity and its balance in the live UTXO set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccountBalance {
    #[schema(value_type = u64)]
    pub id: AccountId,

    pub address: Address,

    #[schema(value_type = String, example = "949.50000000")]
    pub balance: Amount,
}

/// The ledger engine.
///
/// Owns the accounts, the live UTXO set, the mempool and the chain. Every
/// mutation goes through `&mut self`, so a caller sharing a ledger across
/// threads has to serialize access (the HTTP layer keeps it behind a mutex).
/// The whole state is serde-serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    config: LedgerConfig,

    accounts: Vec<Account>,

    utxos: UtxoSet,

    /// Serialized transfers applied since the last mined block
    mempool: Vec<TransactionRecord>,

    /// Every applied transfer, coinbase included
    transactions: Vec<Transaction>,

    /// Coinbase transfers paid to miners
    rewards: Vec<Transaction>,

    /// Fee of every applied standard transfer
    fee_ledger: Vec<Amount>,

    chain: Vec<Block>,

    circulation: Vec<CirculationPoint>,

    next_account: AccountId,

    next_transaction: u64,
}

impl Ledger {
    /// Creates a ledger and mines its genesis block
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        Self::with_nonce_source(config, &mut UniformNonces::new())
    }

    /// Creates a ledger, drawing genesis nonces from `nonces`
    pub fn with_nonce_source(
        config: LedgerConfig,
        nonces: &mut dyn NonceSource,
    ) -> Result<Self, LedgerError> {
        config.validate()?;

        let mut ledger = Ledger {
            config,
            accounts: Vec::new(),
            utxos: UtxoSet::new(),
            mempool: Vec::new(),
            transactions: Vec::new(),
            rewards: Vec::new(),
            fee_ledger: Vec::new(),
            chain: Vec::new(),
            circulation: Vec::new(),
            next_account: 0,
            next_transaction: 0,
        };
        ledger.genesis(nonces)?;

        Ok(ledger)
    }

    /// Creates the first account and the block minting its endowment
    fn genesis(&mut self, nonces: &mut dyn NonceSource) -> Result<(), LedgerError> {
        let founder = self.create_account().address().clone();
        let amount = self.config.genesis_amount;

        let mut endowment = Transaction::coinbase(self.next_transaction, founder, amount);
        endowment.apply(
            None,
            ApplyContext {
                utxos: &mut self.utxos,
                fee_ledger: &mut self.fee_ledger,
            },
        )?;
        self.next_transaction += 1;

        let mut block = Block::new(
            0,
            vec![endowment.to_record()],
            GENESIS_PREVIOUS_HASH.to_string(),
            amount,
        );
        ProofOfWork::new(self.config.difficulty).mine(&mut block, nonces);

        info!("Genesis block created with hash {}", block.hash);
        self.transactions.push(endowment);
        self.commit(block);

        Ok(())
    }

    /// Registers a new account with a fresh keypair
    pub fn create_account(&mut self) -> &Account {
        let account = Account::generate(self.next_account);
        self.next_account += 1;

        info!("Account {} created with address {}", account.id(), account.address());
        self.accounts.push(account);
        &self.accounts[self.accounts.len() - 1]
    }

    /// Moves `amount` from `sender` to `receiver`.
    ///
    /// The transfer is signed, validated and applied to the UTXO set at once;
    /// on success its serialized form joins the mempool. A rejected transfer
    /// leaves the ledger untouched.
    ///
    /// # Arguments
    ///
    /// * `sender` - The paying account
    /// * `receiver` - The account credited with `amount`
    /// * `amount` - The value to move, excluding the configured fee
    ///
    /// # Returns
    ///
    /// The serialized transfer as it sits in the mempool, or the reason it
    /// was refused
    pub fn submit_transfer(
        &mut self,
        sender: AccountId,
        receiver: AccountId,
        amount: Amount,
    ) -> Result<TransactionRecord, LedgerError> {
        let sender = find_account(&self.accounts, sender)?;
        let receiver = find_account(&self.accounts, receiver)?.address().clone();

        let mut transaction = Transaction::new(
            self.next_transaction,
            sender,
            receiver,
            amount,
            self.config.fee,
            &self.utxos,
        );

        let applied = transaction.apply(
            Some(sender),
            ApplyContext {
                utxos: &mut self.utxos,
                fee_ledger: &mut self.fee_ledger,
            },
        );
        if let Err(err) = applied {
            warn!(
                "Transaction from {} to {} rejected: {}",
                sender.address(),
                transaction.receiver,
                err
            );
            return Err(err.into());
        }

        self.next_transaction += 1;
        let record = transaction.to_record();
        info!(
            "Transaction {} processed: {} sent {} to {}",
            record.id,
            sender.address(),
            record.amount,
            record.receiver
        );

        self.mempool.push(record.clone());
        self.transactions.push(transaction);
        Ok(record)
    }

    /// Mines the mempool into a new block, paying `miner` with random nonces
    pub fn mine(&mut self, miner: AccountId) -> Result<Block, LedgerError> {
        self.mine_with(miner, &mut UniformNonces::new())
    }

    /// Mines the mempool into a new block, drawing nonces from `nonces`.
    ///
    /// The miner receives the base reward plus the fees of every standard
    /// transfer in the mempool through a coinbase transfer placed first in the
    /// block. A reward that would push the minted total past the largest
    /// representable amount is refused before anything changes.
    ///
    /// # Arguments
    ///
    /// * `miner` - The account paid by the coinbase transfer
    /// * `nonces` - Where the proof-of-work search draws candidate nonces
    ///
    /// # Returns
    ///
    /// The committed block
    pub fn mine_with(
        &mut self,
        miner: AccountId,
        nonces: &mut dyn NonceSource,
    ) -> Result<Block, LedgerError> {
        let previous_hash = self.chain.last().ok_or(LedgerError::EmptyChain)?.hash.clone();
        let index = self.chain.len() as u64;
        if self.mempool.is_empty() {
            return Err(LedgerError::EmptyMempool);
        }
        let miner_address = find_account(&self.accounts, miner)?.address().clone();

        let fees = self
            .mempool
            .iter()
            .map(TransactionRecord::miner_fee)
            .sum::<Option<Amount>>()
            .ok_or(TransactionError::Overflow)?;
        let reward = self
            .config
            .base_reward
            .checked_add(fees)
            .ok_or(TransactionError::Overflow)?;
        self.total_minted()?
            .checked_add(reward)
            .ok_or(TransactionError::Overflow)?;

        let mut coinbase = Transaction::coinbase(self.next_transaction, miner_address, reward);
        coinbase.apply(
            None,
            ApplyContext {
                utxos: &mut self.utxos,
                fee_ledger: &mut self.fee_ledger,
            },
        )?;
        self.next_transaction += 1;

        let mut records = Vec::with_capacity(self.mempool.len() + 1);
        records.push(coinbase.to_record());
        records.append(&mut self.mempool);

        let mut block = Block::new(index, records, previous_hash, reward);
        let report = ProofOfWork::new(self.config.difficulty).mine(&mut block, nonces);

        info!(
            "Block {} mined: {} by {} in {:?} ({} attempts)",
            block.index, block.hash, coinbase.receiver, report.elapsed, report.attempts
        );

        self.transactions.push(coinbase.clone());
        self.rewards.push(coinbase);
        self.commit(block.clone());

        Ok(block)
    }

    /// Appends a mined block and snapshots the money in circulation
    fn commit(&mut self, block: Block) {
        let point = CirculationPoint {
            block_index: block.index,
            timestamp: block.timestamp,
            total: self.utxos.total(),
        };
        debug!(
            "Block {} committed, {} in circulation",
            block.index, point.total
        );

        self.circulation.push(point);
        self.chain.push(block);
        self.mempool.clear();
    }

    /// Balance of every account against the live UTXO set
    pub fn balances(&self) -> Result<BTreeMap<AccountId, AccountBalance>, LedgerError> {
        self.accounts
            .iter()
            .map(|account| {
                let balance = AccountBalance {
                    id: account.id(),
                    address: account.address().clone(),
                    balance: account
                        .balance(&self.utxos)
                        .ok_or(LedgerError::Overflow("balance"))?,
                };
                Ok::<_, LedgerError>((account.id(), balance))
            })
            .collect()
    }

    pub fn balance_of(&self, id: AccountId) -> Result<Amount, LedgerError> {
        find_account(&self.accounts, id)?
            .balance(&self.utxos)
            .ok_or(LedgerError::Overflow("balance"))
    }

    /// Checks hashes, proof of work, indices and linkage of the whole chain
    pub fn validate_chain(&self) -> Result<(), LedgerError> {
        verify_chain(&self.chain, self.config.difficulty)
    }

    pub fn is_valid(&self) -> bool {
        self.validate_chain().is_ok()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        find_account(&self.accounts, id).ok()
    }

    pub fn account_by_address(&self, address: &Address) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|account| account.address() == address)
    }

    /// The account endowed by the genesis block
    pub fn first_account(&self) -> Option<&Account> {
        self.accounts.first()
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.chain.last()
    }

    pub fn mempool(&self) -> &[TransactionRecord] {
        &self.mempool
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.len()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn rewards(&self) -> &[Transaction] {
        &self.rewards
    }

    pub fn fees_collected(&self) -> &[Amount] {
        &self.fee_ledger
    }

    pub fn circulation(&self) -> &[CirculationPoint] {
        &self.circulation
    }

    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }

    /// Sum of all live outputs
    pub fn circulating_supply(&self) -> Amount {
        self.utxos.total()
    }

    /// Value minted by every coinbase transfer so far
    pub fn total_minted(&self) -> Result<Amount, LedgerError> {
        self.transactions
            .iter()
            .filter(|transaction| transaction.is_coinbase())
            .map(|transaction| transaction.amount)
            .sum::<Option<Amount>>()
            .ok_or(LedgerError::Overflow("minted value"))
    }

    /// Fees paid by every applied standard transfer so far
    pub fn total_fees(&self) -> Result<Amount, LedgerError> {
        self.fee_ledger
            .iter()
            .sum::<Option<Amount>>()
            .ok_or(LedgerError::Overflow("fees"))
    }
}

fn find_account(accounts: &[Account], id: AccountId) -> Result<&Account, LedgerError> {
    accounts
        .iter()
        .find(|account| account.id() == id)
        .ok_or(LedgerError::UnknownAccount(id))
}

/// Checks a sequence of blocks as a chain mined at `difficulty`
pub fn verify_chain(blocks: &[Block], difficulty: u32) -> Result<(), LedgerError> {
    let genesis = blocks.first().ok_or(LedgerError::EmptyChain)?;
    if !genesis.is_genesis() {
        return Err(LedgerError::InvalidChain(
            "first block is not a genesis block".to_string(),
        ));
    }

    for (position, block) in blocks.iter().enumerate() {
        if block.hash != block.calculate_hash() {
            return Err(LedgerError::InvalidChain(format!(
                "block {} hash does not match its contents",
                block.index
            )));
        }

        if !block.meets_difficulty(difficulty) {
            return Err(LedgerError::InvalidChain(format!(
                "block {} does not meet difficulty {}",
                block.index, difficulty
            )));
        }

        if position == 0 {
            continue;
        }

        let previous = &blocks[position - 1];
        if block.index != previous.index + 1 {
            return Err(LedgerError::InvalidChain(format!(
                "block {} follows block {}",
                block.index, previous.index
            )));
        }
        if block.previous_hash != previous.hash {
            return Err(LedgerError::InvalidChain(format!(
                "block {} does not link to block {}",
                block.index, previous.index
            )));
        }
    }

    Ok(())
}

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use super::amount::Amount;
use super::crypto::{public_key_from_hex, verify_signature, Address, CryptoError, DigitalSignature};
use super::utxo::UtxoSet;

/// Identifier handed out by the ledger, never reused
pub type AccountId = u64;

/// A participant in the ledger: an ed25519 keypair and the address derived from it.
///
/// Accounts are immutable once generated. They serialize as
/// `{ id, private_key, public_key, address }` with hex keys so that a ledger
/// snapshot can rebuild them exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "AccountRecord", into = "AccountRecord")]
pub struct Account {
    id: AccountId,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    address: Address,
}

impl Account {
    /// Generates a new account with a random keypair
    pub fn generate(id: AccountId) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(id, signing_key)
    }

    /// Restores an account from a hex-encoded private key
    pub fn from_private_key(id: AccountId, private_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(private_hex)
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(Self::from_signing_key(id, SigningKey::from_bytes(&bytes)))
    }

    fn from_signing_key(id: AccountId, signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let address = Address::from_public_key(&verifying_key);

        Account {
            id,
            signing_key,
            verifying_key,
            address,
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key.as_bytes())
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Signs a message with the account's private key
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        DigitalSignature::from_signature(&self.signing_key.sign(message))
    }

    /// Checks a signature made by this account. Malformed input is simply invalid.
    pub fn verify(&self, message: &[u8], signature: &DigitalSignature) -> bool {
        verify_signature(message, signature, &self.verifying_key).unwrap_or(false)
    }

    /// Sum of the live outputs owned by this account
    pub fn balance(&self, utxos: &UtxoSet) -> Option<Amount> {
        utxos.balance_of(&self.address)
    }
}

/// Serialized form of an [`Account`]
#[derive(Serialize, Deserialize)]
struct AccountRecord {
    id: AccountId,
    private_key: String,
    public_key: String,
    address: Address,
}

impl From<Account> for AccountRecord {
    fn from(account: Account) -> Self {
        AccountRecord {
            id: account.id,
            private_key: account.private_key_hex(),
            public_key: account.public_key_hex(),
            address: account.address,
        }
    }
}

impl TryFrom<AccountRecord> for Account {
    type Error = CryptoError;

    fn try_from(record: AccountRecord) -> Result<Self, Self::Error> {
        let account = Account::from_private_key(record.id, &record.private_key)?;

        if public_key_from_hex(&record.public_key)? != account.verifying_key {
            return Err(CryptoError::InvalidPublicKey(
                "Public key does not match private key".to_string(),
            ));
        }
        if record.address != account.address {
            return Err(CryptoError::InvalidAddress(record.address.0));
        }

        Ok(account)
    }
}

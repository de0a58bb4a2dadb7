use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Length of a hex-encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Hashes bytes with SHA-256 and returns the lowercase hex digest
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hashes the canonical encoding of a JSON value.
///
/// `serde_json` objects keep their keys in lexicographic order, so equal
/// field sets always produce the same bytes.
pub fn hash_canonical(value: &serde_json::Value) -> String {
    sha256_hex(value.to_string().as_bytes())
}

/// An account address: hex SHA-256 of the hex-encoded public key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Derives the address of a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        let public_hex = hex::encode(public_key.as_bytes());
        Address(sha256_hex(public_hex.as_bytes()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let is_hex = s.bytes().all(|b| b.is_ascii_hexdigit());
        if s.len() != HASH_HEX_LEN || !is_hex {
            return Err(CryptoError::InvalidAddress(s.to_string()));
        }

        Ok(Address(s.to_ascii_lowercase()))
    }
}

/// A detached signature, base58 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(bs58::encode(signature.to_bytes()).into_string())
    }

    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }
}

/// Parses a hex-encoded ed25519 public key
pub fn public_key_from_hex(public_hex: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = hex::decode(public_hex).map_err(|e| CryptoError::DecodingError(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey("Invalid public key length".to_string()))?;

    VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Verifies a signature against a message and public key.
///
/// A well-formed signature that does not match yields `Ok(false)`; only a
/// malformed encoding is an error.
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    public_key: &VerifyingKey,
) -> Result<bool, CryptoError> {
    let signature = signature.to_signature()?;
    Ok(public_key.verify(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_canonical_hash_ignores_construction_order() {
        let a = serde_json::json!({ "b": 1, "a": "x" });
        let mut map = serde_json::Map::new();
        map.insert("a".to_string(), serde_json::json!("x"));
        map.insert("b".to_string(), serde_json::json!(1));
        let b = serde_json::Value::Object(map);

        assert_eq!(hash_canonical(&a), hash_canonical(&b));
        assert_eq!(serde_json::to_string(&a).unwrap(), r#"{"a":"x","b":1}"#);
    }

    #[test]
    fn test_address_is_hash_of_hex_public_key() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let address = Address::from_public_key(&verifying_key);

        let expected = sha256_hex(hex::encode(verifying_key.as_bytes()).as_bytes());
        assert_eq!(address.0, expected);
        assert_eq!(address.0.len(), HASH_HEX_LEN);
        assert_eq!(address.0.parse::<Address>().unwrap(), address);
    }

    #[test]
    fn test_address_parse_rejects_non_hash() {
        assert!("abc".parse::<Address>().is_err());
        assert!("z".repeat(HASH_HEX_LEN).parse::<Address>().is_err());
    }

    #[test]
    fn test_signing_and_verification() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let message = b"Hello, world!";
        let signature = DigitalSignature::from_signature(&signing_key.sign(message));

        let public_key = public_key_from_hex(&hex::encode(signing_key.verifying_key().as_bytes()))
            .unwrap();
        assert!(verify_signature(message, &signature, &public_key).unwrap());
        assert!(!verify_signature(b"Wrong message", &signature, &public_key).unwrap());
    }

    #[test]
    fn test_malformed_signature_is_error() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let garbage = DigitalSignature("0OIl".to_string());
        assert!(verify_signature(b"msg", &garbage, &signing_key.verifying_key()).is_err());

        let short = DigitalSignature(bs58::encode([1u8; 10]).into_string());
        assert!(matches!(
            short.to_signature(),
            Err(CryptoError::InvalidSignature(_))
        ));
    }
}

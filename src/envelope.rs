#![allow(clippy::module_name_repetitions)]

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Version string carried by every query and transaction envelope.
pub const PROTOCOL_VERSION: &str = "1";

/// Failures encoding, decoding, or signing wire envelopes.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("failed to encode envelope: {0}")]
    Encode(serde_json::Error),
    #[error("failed to decode envelope: {0}")]
    Decode(serde_json::Error),
    #[error("unknown command byte {value:#04x}")]
    UnknownCommand { value: u8 },
    #[error("transaction payload is not valid hex")]
    PayloadEncoding,
}

/// Read commands understood by the directory state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum QueryCommand {
    GetEpoch,
    GetConsensus,
}

impl From<QueryCommand> for u8 {
    fn from(command: QueryCommand) -> Self {
        match command {
            QueryCommand::GetEpoch => 0x01,
            QueryCommand::GetConsensus => 0x02,
        }
    }
}

impl TryFrom<u8> for QueryCommand {
    type Error = EnvelopeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::GetEpoch),
            0x02 => Ok(Self::GetConsensus),
            other => Err(EnvelopeError::UnknownCommand { value: other }),
        }
    }
}

/// Write commands understood by the directory state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TxCommand {
    PublishMixDescriptor,
    AddConsensusDocument,
}

impl From<TxCommand> for u8 {
    fn from(command: TxCommand) -> Self {
        match command {
            TxCommand::PublishMixDescriptor => 0x01,
            TxCommand::AddConsensusDocument => 0x02,
        }
    }
}

impl TryFrom<u8> for TxCommand {
    type Error = EnvelopeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::PublishMixDescriptor),
            0x02 => Ok(Self::AddConsensusDocument),
            other => Err(EnvelopeError::UnknownCommand { value: other }),
        }
    }
}

/// Read envelope. Constructed fresh per call and discarded after the round
/// trip; reads never carry a payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub version: String,
    pub epoch: u64,
    pub command: QueryCommand,
    pub payload: String,
}

impl Query {
    #[must_use]
    pub fn new(epoch: u64, command: QueryCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            epoch,
            command,
            payload: String::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Encode)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(raw).map_err(EnvelopeError::Decode)
    }
}

/// Write envelope. Must carry a valid signature before it may be broadcast;
/// signing consumes the unsigned value, so a signed transaction is never
/// mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: String,
    pub epoch: u64,
    pub command: TxCommand,
    /// Hex-encoded payload bytes.
    pub payload: String,
    /// Hex-encoded ed25519 public key of the signer; empty until signed.
    #[serde(default)]
    pub public_key: String,
    /// Hex-encoded ed25519 signature over the unsigned fields; empty until
    /// signed.
    #[serde(default)]
    pub signature: String,
}

#[derive(Serialize)]
struct TxSigningView<'a> {
    version: &'a str,
    epoch: u64,
    command: TxCommand,
    payload: &'a str,
}

impl Transaction {
    #[must_use]
    pub fn new(epoch: u64, command: TxCommand, payload: &[u8]) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            epoch,
            command,
            payload: hex::encode(payload),
            public_key: String::new(),
            signature: String::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Encode)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(raw).map_err(EnvelopeError::Decode)
    }

    /// Raw payload bytes, decoded from the hex field.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        hex::decode(&self.payload).map_err(|_| EnvelopeError::PayloadEncoding)
    }

    /// Canonical byte string the signature covers: the deterministic JSON
    /// form of the envelope without its signature fields.
    pub fn signing_message(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(&TxSigningView {
            version: &self.version,
            epoch: self.epoch,
            command: self.command,
            payload: &self.payload,
        })
        .map_err(EnvelopeError::Encode)
    }

    /// Signs the envelope, consuming the unsigned value.
    pub fn sign(mut self, key: &SigningKey) -> Result<Self, EnvelopeError> {
        let message = self.signing_message()?;
        let signature = key.sign(&message);
        self.public_key = hex::encode(key.verifying_key().to_bytes());
        self.signature = hex::encode(signature.to_bytes());
        Ok(self)
    }

    /// Whether the envelope carries a valid signature from the embedded
    /// public key. Broadcast precondition.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        if self.public_key.is_empty() || self.signature.is_empty() {
            return false;
        }
        let Ok(key_bytes) = hex::decode(&self.public_key) else {
            return false;
        };
        let Ok(key_array) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_array) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(&self.signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        let Ok(message) = self.signing_message() else {
            return false;
        };
        key.verify(&message, &signature).is_ok()
    }
}

/// SHA-256 digest of an encoded transaction, used as its ledger identifier.
#[must_use]
pub fn tx_hash(encoded: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(encoded);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    #[test]
    fn query_round_trip() {
        let query = Query::new(42, QueryCommand::GetConsensus);
        assert!(query.payload.is_empty());
        let encoded = query.encode().expect("encode");
        assert_eq!(Query::decode(&encoded).expect("decode"), query);

        // Deterministic encoding.
        assert_eq!(encoded, query.encode().expect("encode"));
    }

    #[test]
    fn transaction_round_trip() {
        let tx = Transaction::new(9, TxCommand::PublishMixDescriptor, b"descriptor bytes")
            .sign(&test_key())
            .expect("sign");
        let encoded = tx.encode().expect("encode");
        let decoded = Transaction::decode(&encoded).expect("decode");
        assert_eq!(decoded, tx);
        assert_eq!(decoded.payload_bytes().expect("payload"), b"descriptor bytes");
    }

    #[test]
    fn unsigned_transaction_is_not_verified() {
        let tx = Transaction::new(1, TxCommand::AddConsensusDocument, b"doc");
        assert!(!tx.is_verified());
    }

    #[test]
    fn signed_transaction_verifies() {
        let tx = Transaction::new(1, TxCommand::AddConsensusDocument, b"doc")
            .sign(&test_key())
            .expect("sign");
        assert!(tx.is_verified());
    }

    #[test]
    fn tampering_breaks_verification() {
        let mut tx = Transaction::new(3, TxCommand::PublishMixDescriptor, b"original")
            .sign(&test_key())
            .expect("sign");
        tx.payload = hex::encode(b"tampered");
        assert!(!tx.is_verified());
    }

    #[test]
    fn rejects_unknown_command_byte() {
        let raw = br#"{"version":"1","epoch":1,"command":9,"payload":""}"#;
        assert!(matches!(
            Query::decode(raw),
            Err(EnvelopeError::Decode(_))
        ));
    }

    #[test]
    fn rejects_bad_payload_hex() {
        let mut tx = Transaction::new(1, TxCommand::PublishMixDescriptor, b"x");
        tx.payload = "zz".to_string();
        assert!(matches!(
            tx.payload_bytes(),
            Err(EnvelopeError::PayloadEncoding)
        ));
    }

    #[test]
    fn hash_is_stable() {
        let tx = Transaction::new(2, TxCommand::PublishMixDescriptor, b"payload")
            .sign(&test_key())
            .expect("sign");
        let encoded = tx.encode().expect("encode");
        assert_eq!(tx_hash(&encoded), tx_hash(&encoded));
        assert_ne!(tx_hash(&encoded), tx_hash(b"other"));
    }
}

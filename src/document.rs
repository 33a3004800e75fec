// This file is part of Kuasha and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

use std::collections::HashSet;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest accepted node name, in bytes.
pub const MAX_NODE_NAME_LEN: usize = 64;

/// Failures validating, signing, or verifying directory content.
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("descriptor name must not be empty")]
    EmptyName,
    #[error("descriptor name is {length} bytes, limit {MAX_NODE_NAME_LEN}")]
    NameTooLong { length: usize },
    #[error("descriptor is for epoch {descriptor}, publication is for epoch {requested}")]
    WrongEpoch { descriptor: u64, requested: u64 },
    #[error("descriptor lists no addresses")]
    NoAddresses,
    #[error("descriptor identity key is not a valid ed25519 key")]
    InvalidIdentityKey,
    #[error("descriptor link key is not 32 hex-encoded bytes")]
    InvalidLinkKey,
    #[error("layer {layer} is invalid for provider={provider}; layer 0 is reserved for providers")]
    InvalidLayer { layer: u8, provider: bool },
    #[error("signing key does not match the descriptor identity key")]
    KeyMismatch,
    #[error("failed to serialize directory content: {0}")]
    Serialize(serde_json::Error),
    #[error("failed to decode directory content: {0}")]
    Decode(serde_json::Error),
    #[error("malformed authority signature entry")]
    InvalidSignatureEncoding,
    #[error("authority {public_key} produced an invalid document signature")]
    AuthoritySignature { public_key: String },
    #[error("document carries {found} valid authority signatures, {required} required")]
    InsufficientSignatures { found: usize, required: usize },
    #[error("descriptor for {name} carries an invalid signature")]
    DescriptorSignature { name: String },
    #[error("invalid authority threshold {threshold} for {total} trusted keys")]
    InvalidThreshold { threshold: usize, total: usize },
}

/// One node's routing and identity record for a specific epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixDescriptor {
    pub name: String,
    pub epoch: u64,
    /// Mix layer; 0 is reserved for providers.
    pub layer: u8,
    /// Hex-encoded ed25519 identity key.
    pub identity_key: String,
    /// Hex-encoded transport link key.
    pub link_key: String,
    pub addresses: Vec<String>,
    #[serde(default)]
    pub provider: bool,
}

/// A descriptor together with its node's signature over it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDescriptor {
    pub descriptor: MixDescriptor,
    /// Hex-encoded ed25519 public key; must equal the descriptor identity key.
    pub public_key: String,
    /// Hex-encoded signature over the canonical descriptor form.
    pub signature: String,
}

/// The aggregate directory content for one epoch.
///
/// `epoch` here is an untrusted embedded field until the enclosing signed
/// form has been verified; only the directory client compares it against the
/// epoch a caller asked for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub epoch: u64,
    #[serde(default)]
    pub mix_nodes: Vec<SignedDescriptor>,
    #[serde(default)]
    pub providers: Vec<SignedDescriptor>,
}

impl Document {
    /// Whether any descriptor set in the document contains `signed`.
    #[must_use]
    pub fn contains(&self, signed: &SignedDescriptor) -> bool {
        self.mix_nodes.contains(signed) || self.providers.contains(signed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct AuthoritySignature {
    public_key: String,
    signature: String,
}

#[derive(Serialize, Deserialize)]
struct SignedDocument {
    document: Document,
    signatures: Vec<AuthoritySignature>,
}

/// Validation, signing, and verify-and-parse seam for directory content.
pub trait DocumentVerifier: Send + Sync {
    /// Checks that `descriptor` is well formed for publication under `epoch`.
    fn validate_descriptor(
        &self,
        descriptor: &MixDescriptor,
        epoch: u64,
    ) -> Result<(), VerifierError>;

    /// Signs a descriptor with the node's identity key, returning the
    /// serialized signed form suitable for a publication payload.
    fn sign_descriptor(
        &self,
        key: &SigningKey,
        descriptor: &MixDescriptor,
    ) -> Result<Vec<u8>, VerifierError>;

    /// Verifies a serialized signed document and returns its content.
    /// Performs no epoch-equality checking.
    fn verify_and_parse(&self, raw: &[u8]) -> Result<Document, VerifierError>;
}

fn descriptor_signing_message(descriptor: &MixDescriptor) -> Result<Vec<u8>, VerifierError> {
    serde_json::to_vec(descriptor).map_err(VerifierError::Serialize)
}

fn document_signing_message(document: &Document) -> Result<Vec<u8>, VerifierError> {
    serde_json::to_vec(document).map_err(VerifierError::Serialize)
}

fn decode_verifying_key(encoded: &str) -> Option<VerifyingKey> {
    let bytes = hex::decode(encoded).ok()?;
    let array = <[u8; 32]>::try_from(bytes.as_slice()).ok()?;
    VerifyingKey::from_bytes(&array).ok()
}

fn decode_signature(encoded: &str) -> Option<Signature> {
    let bytes = hex::decode(encoded).ok()?;
    Signature::from_slice(&bytes).ok()
}

/// Produces the serialized signed form of a document, signed by each of the
/// given authority keys. Counterpart of [`Ed25519Verifier::verify_and_parse`];
/// the payload of an `AddConsensusDocument` transaction.
pub fn sign_document(document: &Document, keys: &[SigningKey]) -> Result<Vec<u8>, VerifierError> {
    let message = document_signing_message(document)?;
    let signatures = keys
        .iter()
        .map(|key| AuthoritySignature {
            public_key: hex::encode(key.verifying_key().to_bytes()),
            signature: hex::encode(key.sign(&message).to_bytes()),
        })
        .collect();
    serde_json::to_vec(&SignedDocument {
        document: document.clone(),
        signatures,
    })
    .map_err(VerifierError::Serialize)
}

/// Concrete verifier trusting a fixed set of directory authority keys, of
/// which a threshold must have signed a document.
#[derive(Clone, Debug)]
pub struct Ed25519Verifier {
    authorities: Vec<VerifyingKey>,
    threshold: usize,
}

impl Ed25519Verifier {
    pub fn new(authorities: Vec<VerifyingKey>, threshold: usize) -> Result<Self, VerifierError> {
        if threshold == 0 || threshold > authorities.len() {
            return Err(VerifierError::InvalidThreshold {
                threshold,
                total: authorities.len(),
            });
        }
        Ok(Self {
            authorities,
            threshold,
        })
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn verify_signed_descriptor(&self, signed: &SignedDescriptor) -> Result<(), VerifierError> {
        if signed.public_key != signed.descriptor.identity_key {
            return Err(VerifierError::KeyMismatch);
        }
        let key = decode_verifying_key(&signed.public_key)
            .ok_or(VerifierError::InvalidIdentityKey)?;
        let signature = decode_signature(&signed.signature).ok_or_else(|| {
            VerifierError::DescriptorSignature {
                name: signed.descriptor.name.clone(),
            }
        })?;
        let message = descriptor_signing_message(&signed.descriptor)?;
        key.verify(&message, &signature)
            .map_err(|_| VerifierError::DescriptorSignature {
                name: signed.descriptor.name.clone(),
            })
    }
}

impl DocumentVerifier for Ed25519Verifier {
    fn validate_descriptor(
        &self,
        descriptor: &MixDescriptor,
        epoch: u64,
    ) -> Result<(), VerifierError> {
        if descriptor.name.is_empty() {
            return Err(VerifierError::EmptyName);
        }
        if descriptor.name.len() > MAX_NODE_NAME_LEN {
            return Err(VerifierError::NameTooLong {
                length: descriptor.name.len(),
            });
        }
        if descriptor.epoch != epoch {
            return Err(VerifierError::WrongEpoch {
                descriptor: descriptor.epoch,
                requested: epoch,
            });
        }
        if descriptor.addresses.is_empty() {
            return Err(VerifierError::NoAddresses);
        }
        if decode_verifying_key(&descriptor.identity_key).is_none() {
            return Err(VerifierError::InvalidIdentityKey);
        }
        let link = hex::decode(&descriptor.link_key).map_err(|_| VerifierError::InvalidLinkKey)?;
        if link.len() != 32 {
            return Err(VerifierError::InvalidLinkKey);
        }
        if descriptor.provider != (descriptor.layer == 0) {
            return Err(VerifierError::InvalidLayer {
                layer: descriptor.layer,
                provider: descriptor.provider,
            });
        }
        Ok(())
    }

    fn sign_descriptor(
        &self,
        key: &SigningKey,
        descriptor: &MixDescriptor,
    ) -> Result<Vec<u8>, VerifierError> {
        let public_key = hex::encode(key.verifying_key().to_bytes());
        if public_key != descriptor.identity_key {
            return Err(VerifierError::KeyMismatch);
        }
        let message = descriptor_signing_message(descriptor)?;
        let signature = key.sign(&message);
        serde_json::to_vec(&SignedDescriptor {
            descriptor: descriptor.clone(),
            public_key,
            signature: hex::encode(signature.to_bytes()),
        })
        .map_err(VerifierError::Serialize)
    }

    fn verify_and_parse(&self, raw: &[u8]) -> Result<Document, VerifierError> {
        let signed: SignedDocument =
            serde_json::from_slice(raw).map_err(VerifierError::Decode)?;
        let message = document_signing_message(&signed.document)?;

        let mut signers: HashSet<[u8; 32]> = HashSet::with_capacity(signed.signatures.len());
        for entry in &signed.signatures {
            let key = decode_verifying_key(&entry.public_key)
                .ok_or(VerifierError::InvalidSignatureEncoding)?;
            if !self.authorities.contains(&key) {
                // Signatures from unknown parties carry no weight.
                continue;
            }
            let signature = decode_signature(&entry.signature)
                .ok_or(VerifierError::InvalidSignatureEncoding)?;
            key.verify(&message, &signature)
                .map_err(|_| VerifierError::AuthoritySignature {
                    public_key: entry.public_key.clone(),
                })?;
            signers.insert(key.to_bytes());
        }
        if signers.len() < self.threshold {
            return Err(VerifierError::InsufficientSignatures {
                found: signers.len(),
                required: self.threshold,
            });
        }

        for descriptor in signed
            .document
            .mix_nodes
            .iter()
            .chain(signed.document.providers.iter())
        {
            self.verify_signed_descriptor(descriptor)?;
        }

        Ok(signed.document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn descriptor(key: &SigningKey, epoch: u64) -> MixDescriptor {
        MixDescriptor {
            name: "mix-node".to_string(),
            epoch,
            layer: 1,
            identity_key: hex::encode(key.verifying_key().to_bytes()),
            link_key: hex::encode([0x11u8; 32]),
            addresses: vec!["tcp://192.0.2.1:30001".to_string()],
            provider: false,
        }
    }

    fn verifier(authorities: &[SigningKey], threshold: usize) -> Ed25519Verifier {
        let keys = authorities.iter().map(SigningKey::verifying_key).collect();
        Ed25519Verifier::new(keys, threshold).expect("verifier")
    }

    fn signed_descriptor(key: &SigningKey, epoch: u64) -> SignedDescriptor {
        let verifier = verifier(&[node_key(99)], 1);
        let raw = verifier
            .sign_descriptor(key, &descriptor(key, epoch))
            .expect("sign");
        serde_json::from_slice(&raw).expect("signed descriptor")
    }

    #[test]
    fn accepts_well_formed_descriptor() {
        let key = node_key(1);
        let verifier = verifier(&[node_key(99)], 1);
        verifier
            .validate_descriptor(&descriptor(&key, 7), 7)
            .expect("well formed");
    }

    #[test]
    fn rejects_malformed_descriptors() {
        let key = node_key(1);
        let verifier = verifier(&[node_key(99)], 1);
        let base = descriptor(&key, 7);

        let mut unnamed = base.clone();
        unnamed.name.clear();
        assert!(matches!(
            verifier.validate_descriptor(&unnamed, 7),
            Err(VerifierError::EmptyName)
        ));

        assert!(matches!(
            verifier.validate_descriptor(&base, 8),
            Err(VerifierError::WrongEpoch {
                descriptor: 7,
                requested: 8
            })
        ));

        let mut unreachable_node = base.clone();
        unreachable_node.addresses.clear();
        assert!(matches!(
            verifier.validate_descriptor(&unreachable_node, 7),
            Err(VerifierError::NoAddresses)
        ));

        let mut bad_identity = base.clone();
        bad_identity.identity_key = "feed".to_string();
        assert!(matches!(
            verifier.validate_descriptor(&bad_identity, 7),
            Err(VerifierError::InvalidIdentityKey)
        ));

        let mut bad_link = base.clone();
        bad_link.link_key = hex::encode([0u8; 16]);
        assert!(matches!(
            verifier.validate_descriptor(&bad_link, 7),
            Err(VerifierError::InvalidLinkKey)
        ));

        let mut provider_on_mix_layer = base.clone();
        provider_on_mix_layer.provider = true;
        assert!(matches!(
            verifier.validate_descriptor(&provider_on_mix_layer, 7),
            Err(VerifierError::InvalidLayer {
                layer: 1,
                provider: true
            })
        ));
    }

    #[test]
    fn sign_descriptor_requires_matching_key() {
        let key = node_key(1);
        let verifier = verifier(&[node_key(99)], 1);
        let desc = descriptor(&key, 7);
        assert!(matches!(
            verifier.sign_descriptor(&node_key(2), &desc),
            Err(VerifierError::KeyMismatch)
        ));
    }

    #[test]
    fn document_round_trip_with_threshold() {
        let authorities = [node_key(40), node_key(41), node_key(42)];
        let verifier = verifier(&authorities, 2);
        let document = Document {
            epoch: 11,
            mix_nodes: vec![signed_descriptor(&node_key(1), 11)],
            providers: vec![],
        };
        let raw = sign_document(&document, &authorities[..2]).expect("sign");
        let parsed = verifier.verify_and_parse(&raw).expect("verify");
        assert_eq!(parsed, document);
    }

    #[test]
    fn rejects_insufficient_authority_signatures() {
        let authorities = [node_key(40), node_key(41)];
        let verifier = verifier(&authorities, 2);
        let document = Document {
            epoch: 11,
            mix_nodes: vec![],
            providers: vec![],
        };
        let raw = sign_document(&document, &authorities[..1]).expect("sign");
        assert!(matches!(
            verifier.verify_and_parse(&raw),
            Err(VerifierError::InsufficientSignatures {
                found: 1,
                required: 2
            })
        ));
    }

    #[test]
    fn duplicate_authority_signatures_count_once() {
        let authorities = [node_key(40), node_key(41)];
        let verifier = verifier(&authorities, 2);
        let document = Document {
            epoch: 3,
            mix_nodes: vec![],
            providers: vec![],
        };
        let duplicated = [node_key(40), node_key(40)];
        let raw = sign_document(&document, &duplicated).expect("sign");
        assert!(matches!(
            verifier.verify_and_parse(&raw),
            Err(VerifierError::InsufficientSignatures {
                found: 1,
                required: 2
            })
        ));
    }

    #[test]
    fn ignores_untrusted_signers() {
        let authorities = [node_key(40)];
        let verifier = verifier(&authorities, 1);
        let document = Document {
            epoch: 5,
            mix_nodes: vec![],
            providers: vec![],
        };
        let mixed = [node_key(77), node_key(40)];
        let raw = sign_document(&document, &mixed).expect("sign");
        verifier.verify_and_parse(&raw).expect("verify");
    }

    #[test]
    fn rejects_tampered_document() {
        let authorities = [node_key(40)];
        let verifier = verifier(&authorities, 1);
        let document = Document {
            epoch: 5,
            mix_nodes: vec![],
            providers: vec![],
        };
        let raw = sign_document(&document, &authorities).expect("sign");
        let mut signed: SignedDocument = serde_json::from_slice(&raw).expect("decode");
        signed.document.epoch = 6;
        let tampered = serde_json::to_vec(&signed).expect("encode");
        assert!(matches!(
            verifier.verify_and_parse(&tampered),
            Err(VerifierError::AuthoritySignature { .. })
        ));
    }

    #[test]
    fn rejects_tampered_descriptor() {
        let authorities = [node_key(40)];
        let verifier = verifier(&authorities, 1);
        let mut signed = signed_descriptor(&node_key(1), 9);
        signed.descriptor.addresses = vec!["tcp://203.0.113.9:1".to_string()];
        let document = Document {
            epoch: 9,
            mix_nodes: vec![signed],
            providers: vec![],
        };
        let raw = sign_document(&document, &authorities).expect("sign");
        assert!(matches!(
            verifier.verify_and_parse(&raw),
            Err(VerifierError::DescriptorSignature { .. })
        ));
    }

    #[test]
    fn rejects_invalid_threshold() {
        let keys = vec![node_key(1).verifying_key()];
        assert!(matches!(
            Ed25519Verifier::new(keys.clone(), 0),
            Err(VerifierError::InvalidThreshold {
                threshold: 0,
                total: 1
            })
        ));
        assert!(matches!(
            Ed25519Verifier::new(keys, 2),
            Err(VerifierError::InvalidThreshold {
                threshold: 2,
                total: 1
            })
        ));
    }
}

// This file is part of Kuasha and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

#![forbid(unsafe_code)]

//! Client for a mix-network PKI directory whose authoritative state lives on
//! a replicated, consensus-ordered ledger.
//!
//! The directory maps a monotonically increasing epoch to a signed set of
//! node descriptors. Reads go through a [`connector::LedgerConnector`], which
//! returns only Merkle-proof-verified values; writes are broadcast as signed
//! transactions and confirmed through mempool admission and block inclusion.
//! The [`client::DirectoryClient`] ties the two seams together and enforces
//! the epoch-consistency checks the proof itself cannot provide.

/// Directory client orchestration: verified reads, confirmed writes.
pub mod client;
/// Consumed ledger connector interface and its response types.
pub mod connector;
/// Directory documents, mix descriptors, and the verifier seam.
pub mod document;
/// Query and transaction wire envelopes.
pub mod envelope;
/// Epoch record codec and height-to-wall-clock conversion.
pub mod epoch;

/// Re-export the directory client surface.
pub use client::{
    CommitResult, DirectoryClient, DirectoryClientConfig, DirectoryError, EpochState, RetryPolicy,
};
/// Re-export the connector seam for implementations.
pub use connector::{
    CommitResponse, ConnectorError, LedgerConnector, QueryOptions, TxStatus, VerifiedQuery,
};
/// Re-export document and verifier types.
pub use document::{
    sign_document, Document, DocumentVerifier, Ed25519Verifier, MixDescriptor, SignedDescriptor,
    VerifierError,
};
/// Re-export the wire envelope types.
pub use envelope::{EnvelopeError, Query, QueryCommand, Transaction, TxCommand, PROTOCOL_VERSION};
/// Re-export the epoch record codec.
pub use epoch::{EpochClock, EpochRecord, RecordError, EPOCH_RECORD_LEN};

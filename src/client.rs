// This file is part of Kuasha and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

use std::future::Future;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::connector::{ConnectorError, LedgerConnector, QueryOptions, VerifiedQuery};
use crate::document::{Document, DocumentVerifier, MixDescriptor, VerifierError};
use crate::envelope::{tx_hash, EnvelopeError, Query, QueryCommand, Transaction, TxCommand};
use crate::epoch::{
    EpochClock, EpochRecord, RecordError, DEFAULT_EPOCH_INTERVAL, DEFAULT_EPOCH_PERIOD,
};

/// Query path understood by the directory ledger application.
const QUERY_PATH: &str = "";

/// Default per-phase network deadline.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(45);

/// Everything that can go wrong between a caller and the directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Network-level failure; retryable by the caller.
    #[error("ledger transport failure: {message}")]
    Transport { message: String },
    /// A per-phase deadline elapsed; the in-flight call was aborted.
    #[error("directory call exceeded its {after:?} deadline")]
    Timeout { after: Duration },
    /// The raw epoch record was malformed.
    #[error("retrieved epoch record has incorrect format: {0}")]
    Format(#[from] RecordError),
    /// The epoch's starting height lies after the response height, which a
    /// correct node can never produce.
    #[error("starting height {starting_height} exceeds response height {response_height}")]
    Inconsistency {
        starting_height: i64,
        response_height: i64,
    },
    /// The connector rejected an inclusion proof. Never silently retried;
    /// may indicate a malicious peer.
    #[error("inclusion proof rejected: {message}")]
    Proof { message: String },
    /// A document or descriptor signature check failed. Never retried.
    #[error(transparent)]
    Verification(#[from] VerifierError),
    /// The verified payload embeds a different epoch than was requested.
    #[error("document is for epoch {received}, requested epoch {requested}")]
    EpochMismatch { requested: u64, received: u64 },
    /// No document is published for the epoch; expected for future epochs.
    #[error("no document for epoch {epoch}")]
    NoDocument { epoch: u64 },
    /// The ledger rejected a read outright.
    #[error("query rejected by ledger (code {code}): {log}")]
    QueryRejected { code: u32, log: String },
    /// Broadcast was attempted before signing; caught before any I/O.
    #[error("transaction is not signed; sign it before broadcast")]
    UnsignedTransaction,
    /// The transaction was refused at mempool admission.
    #[error("transaction rejected at admission (code {code}): {log}")]
    AdmissionRejected { code: u32, log: String },
    /// The transaction was admitted but refused at block inclusion.
    #[error("transaction rejected at inclusion (code {code}): {log}")]
    CommitRejected { code: u32, log: String },
    /// An envelope failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] EnvelopeError),
}

impl From<ConnectorError> for DirectoryError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Transport { message } => Self::Transport { message },
            ConnectorError::Proof { message } => Self::Proof { message },
        }
    }
}

impl DirectoryError {
    /// Whether a fresh attempt could plausibly succeed. Verification-class
    /// failures are deliberately excluded.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::NoDocument { .. }
        )
    }
}

/// Successful terminal state of one published transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitResult {
    /// Height of the block the transaction was included in.
    pub height: i64,
    /// SHA-256 identifier of the encoded transaction.
    pub tx_hash: [u8; 32],
}

/// Current epoch and its advisory wall-clock position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpochState {
    pub epoch: u64,
    pub elapsed: Duration,
    pub remaining: Duration,
}

/// Bounded retry schedule for polling reads; see
/// [`DirectoryClient::get_with_retry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

/// Caller-supplied client parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryClientConfig {
    /// Deadline applied to each network phase (query, broadcast+commit).
    pub call_timeout: Duration,
    /// Wall-clock length of one epoch.
    pub epoch_period: Duration,
    /// Ledger heights spanning one epoch.
    pub heights_per_epoch: u64,
}

impl Default for DirectoryClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            epoch_period: DEFAULT_EPOCH_PERIOD,
            heights_per_epoch: DEFAULT_EPOCH_INTERVAL,
        }
    }
}

/// Client for one ledger-anchored PKI directory.
///
/// Holds a connector capability and a verifier; no document or epoch state is
/// cached across calls, so every read is independently verified. Safe to
/// share between tasks by reference.
pub struct DirectoryClient<C, V> {
    connector: C,
    verifier: V,
    clock: EpochClock,
    call_timeout: Duration,
}

impl<C, V> DirectoryClient<C, V>
where
    C: LedgerConnector,
    V: DocumentVerifier,
{
    #[must_use]
    pub fn new(connector: C, verifier: V, config: DirectoryClientConfig) -> Self {
        Self {
            connector,
            verifier,
            clock: EpochClock::new(config.epoch_period, config.heights_per_epoch),
            call_timeout: config.call_timeout,
        }
    }

    async fn with_deadline<T, F>(&self, phase: F) -> Result<T, DirectoryError>
    where
        F: Future<Output = Result<T, ConnectorError>>,
    {
        match tokio::time::timeout(self.call_timeout, phase).await {
            Ok(result) => result.map_err(DirectoryError::from),
            Err(_) => Err(DirectoryError::Timeout {
                after: self.call_timeout,
            }),
        }
    }

    async fn query(
        &self,
        epoch: u64,
        command: QueryCommand,
    ) -> Result<VerifiedQuery, DirectoryError> {
        let query = Query::new(epoch, command);
        let data = query.encode()?;
        debug!(epoch, ?command, "issuing directory query");
        self.with_deadline(self.connector.query_with_proof(
            QUERY_PATH,
            &data,
            QueryOptions::default(),
        ))
        .await
    }

    /// Fetches the current epoch identifier and the number of ledger heights
    /// elapsed since it began.
    pub async fn get_epoch(&self) -> Result<(u64, u64), DirectoryError> {
        let resp = self.query(0, QueryCommand::GetEpoch).await?;
        if !resp.is_ok() {
            return Err(DirectoryError::QueryRejected {
                code: resp.code,
                log: resp.log,
            });
        }
        let record = EpochRecord::decode(&resp.value)?;
        if record.starting_height > resp.height {
            return Err(DirectoryError::Inconsistency {
                starting_height: record.starting_height,
                response_height: resp.height,
            });
        }
        // Non-negative by the invariant above.
        let elapsed_height = (resp.height - record.starting_height) as u64;
        Ok((record.epoch, elapsed_height))
    }

    /// Resolves the current epoch with advisory elapsed/remaining wall-clock
    /// durations. Suitable for pacing and display, never for protocol
    /// correctness.
    pub async fn now(&self) -> Result<EpochState, DirectoryError> {
        let (epoch, elapsed_height) = self.get_epoch().await?;
        let (elapsed, remaining) = self.clock.split(elapsed_height);
        Ok(EpochState {
            epoch,
            elapsed,
            remaining,
        })
    }

    /// Retrieves and verifies the directory document for `epoch`, returning
    /// it together with its raw verified serialization.
    ///
    /// The connector proves the bytes were committed ledger state; the
    /// verifier proves the authorities signed them; only then is the embedded
    /// epoch trusted enough to compare against the request.
    pub async fn get(&self, epoch: u64) -> Result<(Document, Vec<u8>), DirectoryError> {
        debug!(epoch, "fetching directory document");
        let resp = self.query(epoch, QueryCommand::GetConsensus).await?;
        if !resp.is_ok() {
            return Err(DirectoryError::NoDocument { epoch });
        }
        let document = self.verifier.verify_and_parse(&resp.value)?;
        if document.epoch != epoch {
            warn!(
                requested = epoch,
                received = document.epoch,
                "ledger returned document for wrong epoch"
            );
            return Err(DirectoryError::EpochMismatch {
                requested: epoch,
                received: document.epoch,
            });
        }
        Ok((document, resp.value))
    }

    /// Like [`get`](Self::get), retrying transient failures on a bounded
    /// schedule. `NoDocument` counts as transient here, which makes this the
    /// sanctioned way to poll for a not-yet-published epoch; verification
    /// failures are surfaced immediately.
    pub async fn get_with_retry(
        &self,
        epoch: u64,
        policy: RetryPolicy,
    ) -> Result<(Document, Vec<u8>), DirectoryError> {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.get(epoch).await {
                Ok(found) => return Ok(found),
                Err(err) if attempt < attempts && err.is_retryable() => {
                    debug!(epoch, attempt, %err, "directory fetch failed, will retry");
                    tokio::time::sleep(policy.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Publishes a node descriptor for `epoch`: validates well-formedness,
    /// signs the descriptor, wraps it into a publication transaction, and
    /// submits through [`post_tx`](Self::post_tx).
    pub async fn post(
        &self,
        epoch: u64,
        signing_key: &SigningKey,
        descriptor: &MixDescriptor,
    ) -> Result<CommitResult, DirectoryError> {
        debug!(epoch, name = %descriptor.name, "publishing mix descriptor");
        self.verifier.validate_descriptor(descriptor, epoch)?;
        let signed = self.verifier.sign_descriptor(signing_key, descriptor)?;
        let tx = Transaction::new(epoch, TxCommand::PublishMixDescriptor, &signed)
            .sign(signing_key)?;
        self.post_tx(&tx).await
    }

    /// Broadcasts a signed transaction and waits for its two confirmation
    /// phases in order: mempool admission, then block inclusion. An unsigned
    /// transaction is refused before any network call. There is no internal
    /// retry; a rejected transaction must be rebuilt and re-signed by the
    /// caller, since resubmitting risks epoch drift.
    pub async fn post_tx(&self, tx: &Transaction) -> Result<CommitResult, DirectoryError> {
        if !tx.is_verified() {
            return Err(DirectoryError::UnsignedTransaction);
        }
        let encoded = tx.encode()?;
        let hash = tx_hash(&encoded);
        debug!(epoch = tx.epoch, tx = %hex::encode(hash), "broadcasting transaction");
        let resp = self
            .with_deadline(self.connector.broadcast_and_commit(&encoded))
            .await?;
        if !resp.admission.is_ok() {
            warn!(
                code = resp.admission.code,
                log = %resp.admission.log,
                "transaction refused at mempool admission"
            );
            return Err(DirectoryError::AdmissionRejected {
                code: resp.admission.code,
                log: resp.admission.log,
            });
        }
        if !resp.inclusion.is_ok() {
            warn!(
                code = resp.inclusion.code,
                log = %resp.inclusion.log,
                "transaction admitted but refused at block inclusion"
            );
            return Err(DirectoryError::CommitRejected {
                code: resp.inclusion.code,
                log: resp.inclusion.log,
            });
        }
        Ok(CommitResult {
            height: resp.height,
            tx_hash: hash,
        })
    }

    /// Verifies and parses raw document bytes without any epoch-equality
    /// check; for bytes whose provenance the caller already knows, such as a
    /// local cache populated by [`get`](Self::get).
    pub fn deserialize(&self, raw: &[u8]) -> Result<Document, DirectoryError> {
        Ok(self.verifier.verify_and_parse(raw)?)
    }
}

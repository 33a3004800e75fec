// This file is part of Kuasha and is licensed under the GNU Affero General Public License v3.0 or later.
// See the LICENSE file in the project root for license details.

use async_trait::async_trait;
use thiserror::Error;

/// Failure raised by a ledger connector implementation.
#[derive(Clone, Debug, Error)]
pub enum ConnectorError {
    #[error("ledger transport failure: {message}")]
    Transport { message: String },
    #[error("inclusion proof rejected: {message}")]
    Proof { message: String },
}

impl ConnectorError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn proof(message: impl Into<String>) -> Self {
        Self::Proof {
            message: message.into(),
        }
    }
}

/// Options for a proof-carrying ledger query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryOptions {
    /// Ledger height to query at; `None` means the latest committed height.
    pub height: Option<i64>,
    /// Whether the response must carry an inclusion proof.
    pub prove: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            height: None,
            prove: true,
        }
    }
}

/// A query response whose value the connector has already verified against
/// its trusted header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedQuery {
    /// Application status code; zero means success.
    pub code: u32,
    /// Ledger-reported status detail.
    pub log: String,
    /// The proof-verified value bytes.
    pub value: Vec<u8>,
    /// Height of the committed state the value was read from.
    pub height: i64,
}

impl VerifiedQuery {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Status of one confirmation phase of a broadcast transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxStatus {
    pub code: u32,
    pub log: String,
}

impl TxStatus {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Outcome of broadcasting a transaction and waiting for both confirmation
/// phases. `inclusion` is meaningful only when `admission` is OK.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitResponse {
    /// Mempool admission status.
    pub admission: TxStatus,
    /// Block inclusion status.
    pub inclusion: TxStatus,
    /// Height of the block the transaction was included in.
    pub height: i64,
}

/// Capability handle onto a replicated, consensus-ordered ledger.
///
/// Implementations own the Merkle-proof verification of read values and the
/// maintenance of the trusted header chain they verify against; a proof that
/// fails to verify must surface as [`ConnectorError::Proof`], never as
/// unverified data. Nothing above this seam re-implements either concern.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    /// Executes a proof-verified read of `query` under `path`.
    async fn query_with_proof(
        &self,
        path: &str,
        query: &[u8],
        options: QueryOptions,
    ) -> Result<VerifiedQuery, ConnectorError>;

    /// Broadcasts an encoded transaction and waits for mempool admission and
    /// block inclusion, in that order.
    async fn broadcast_and_commit(&self, tx: &[u8]) -> Result<CommitResponse, ConnectorError>;
}

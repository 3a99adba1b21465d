// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for resumable upload operations.
///
/// The variants mirror the upload protocol's failure taxonomy. Only
/// [OffsetMismatch][Error::OffsetMismatch] and [Transport][Error::Transport]
/// are recoverable, and only by reconciling with the authoritative committed
/// size via a status query. Everything else is terminal for the current
/// session.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The request was malformed, e.g. an empty destination name or an
    /// oversized chunk. Retrying without changing the request cannot succeed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The destination object did not satisfy the caller-supplied
    /// preconditions when the session started.
    #[error("destination precondition failed: {0}")]
    PreconditionFailed(String),

    /// The chunk offset disagrees with the service's committed size.
    ///
    /// This is the routine recovery path, not an exceptional failure. The
    /// error carries the authoritative committed size so the caller can
    /// resume from it.
    #[error("write at offset {offset} does not match the committed size {committed}")]
    OffsetMismatch { offset: u64, committed: u64 },

    /// A write arrived after the finish chunk was accepted. Caller bug.
    #[error("the upload was already finalized with {committed} bytes")]
    AlreadyFinalized { committed: u64 },

    /// The session never existed, was cancelled, or expired.
    #[error("unknown, cancelled, or expired upload session")]
    NotFound,

    /// The uploaded bytes do not match the expected CRC32C value.
    #[error("mismatched CRC32C values, got {got:#010x}, want {want:#010x}")]
    ChecksumMismatch { got: u32, want: u32 },

    /// The payload source failed while producing data.
    #[error("could not read the upload payload")]
    Source(#[source] BoxError),

    /// The transport failed with an unknown outcome.
    ///
    /// The bytes may or may not have been committed. The only safe reaction
    /// is a status query, never a blind retry or restart.
    #[error("transport failure with unknown outcome")]
    Transport(#[source] BoxError),

    /// An unrecoverable violation of the upload protocol, by either side.
    #[error("unrecoverable upload protocol violation")]
    Protocol(#[from] ProtocolError),
}

impl Error {
    pub fn source_err<E: Into<BoxError>>(v: E) -> Self {
        Self::Source(v.into())
    }

    pub fn transport<E: Into<BoxError>>(v: E) -> Self {
        Self::Transport(v.into())
    }

    /// Returns true if the operation may succeed after reconciling with
    /// `query_write_status`.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::OffsetMismatch { .. } | Self::Transport { .. }
        )
    }

    /// The authoritative committed size reported with the error, if any.
    pub fn committed_size(&self) -> Option<u64> {
        match self {
            Self::OffsetMismatch { committed, .. } => Some(*committed),
            Self::AlreadyFinalized { committed } => Some(*committed),
            _ => None,
        }
    }
}

/// An unrecoverable problem in the upload protocol.
///
/// These errors indicate a bug in the resumable upload protocol
/// implementation, either in the service or in the client handle. Neither is
/// expected to be common, but neither is impossible. The invariants involve
/// two machines, so the client reports the violation instead of panicking.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error(
        "the service previously persisted {offset} bytes, but now reports only {persisted} as persisted"
    )]
    UnexpectedRewind { offset: u64, persisted: u64 },

    #[error("the service reports {persisted} bytes as persisted, but we only sent {sent} bytes")]
    TooMuchProgress { sent: u64, persisted: u64 },
}

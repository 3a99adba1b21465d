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

use crate::Result;
use crate::model::{Chunk, ListUploadsPage, ListUploadsRequest, SessionId, WriteObjectSpec, WriteStatus};

/// The RPC-shaped seam between the upload client and the service.
///
/// [SessionManager][crate::session::SessionManager] implements this trait
/// in-process; a networked implementation would forward each method over its
/// transport. Tests may wrap an implementation to inject transport faults.
///
/// Implementations must be safe to call from any number of concurrent
/// callers without external locking.
pub trait ResumableStore: std::fmt::Debug + Send + Sync {
    /// Creates a new upload session with a committed size of zero.
    ///
    /// Fails with [InvalidArgument][crate::Error::InvalidArgument] for
    /// malformed destinations and with
    /// [PreconditionFailed][crate::Error::PreconditionFailed] when the
    /// destination does not satisfy the spec's preconditions.
    fn start_resumable_write(
        &self,
        spec: WriteObjectSpec,
    ) -> impl Future<Output = Result<SessionId>> + Send;

    /// Proposes one contiguous byte range for the session.
    ///
    /// The chunk is accepted only if its offset equals the authoritative
    /// committed size exactly. On success the returned status reflects the
    /// bytes as durable; a chunk with the finish flag set transitions the
    /// session to its terminal state.
    fn write_object_chunk(
        &self,
        id: &SessionId,
        chunk: Chunk,
    ) -> impl Future<Output = Result<WriteStatus>> + Send;

    /// Reports the authoritative state of the session.
    ///
    /// A pure read: safe to call at any time, any number of times,
    /// concurrently with in-flight writes. Successive calls never report a
    /// smaller committed size.
    fn query_write_status(
        &self,
        id: &SessionId,
    ) -> impl Future<Output = Result<WriteStatus>> + Send;

    /// Abandons an unfinalized session.
    ///
    /// Subsequent writes and queries for the session fail with
    /// [NotFound][crate::Error::NotFound].
    fn cancel_resumable_write(
        &self,
        id: &SessionId,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Lists upload sessions, one page per call.
    fn list_uploads(
        &self,
        req: ListUploadsRequest,
    ) -> impl Future<Output = Result<ListUploadsPage>> + Send;
}

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

//! Wire-shaped types for the resumable upload protocol.

use serde::{Deserialize, Serialize};

/// The maximum number of payload bytes accepted in a single chunk.
pub const MAX_WRITE_CHUNK_BYTES: usize = 2 * 1024 * 1024;

/// An opaque token identifying one resumable upload session.
///
/// Issued by the service when the session starts. The client treats it as a
/// handle, never inspecting its contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

/// Describes the destination and preconditions for one upload.
///
/// The generation preconditions gate the session start: `if_generation_match`
/// requires the destination's current generation to equal the given value,
/// with `0` meaning "the object must not exist". The metageneration variants
/// apply to the metadata generation of an existing object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct WriteObjectSpec {
    pub bucket: String,
    pub name: String,
    pub if_generation_match: Option<i64>,
    pub if_generation_not_match: Option<i64>,
    pub if_metageneration_match: Option<i64>,
    pub if_metageneration_not_match: Option<i64>,
}

impl WriteObjectSpec {
    pub fn new<B, N>(bucket: B, name: N) -> Self
    where
        B: Into<String>,
        N: Into<String>,
    {
        Self {
            bucket: bucket.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn set_if_generation_match<T: Into<i64>>(mut self, v: T) -> Self {
        self.if_generation_match = Some(v.into());
        self
    }

    pub fn set_if_generation_not_match<T: Into<i64>>(mut self, v: T) -> Self {
        self.if_generation_not_match = Some(v.into());
        self
    }

    pub fn set_if_metageneration_match<T: Into<i64>>(mut self, v: T) -> Self {
        self.if_metageneration_match = Some(v.into());
        self
    }

    pub fn set_if_metageneration_not_match<T: Into<i64>>(mut self, v: T) -> Self {
        self.if_metageneration_not_match = Some(v.into());
        self
    }
}

/// Checksums for the full object payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ObjectChecksums {
    pub crc32c: Option<u32>,
}

impl ObjectChecksums {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_crc32c<T: Into<u32>>(mut self, v: T) -> Self {
        self.crc32c = Some(v.into());
        self
    }
}

/// A finalized object, as reported by the service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Object {
    pub bucket: String,
    pub name: String,
    /// The content generation. Monotonically increasing per destination, `1`
    /// for the first finalized upload.
    pub generation: i64,
    /// The metadata generation, reset to `1` on each new content generation.
    pub metageneration: i64,
    pub size: u64,
    pub checksums: ObjectChecksums,
}

/// One contiguous byte range proposed for a session.
///
/// `offset` must equal the sender's belief of the committed size; the service
/// accepts the chunk only on an exact match. The finish flag may be carried
/// at most once per session, optionally together with the full-object
/// checksums for end-to-end verification.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct Chunk {
    pub offset: u64,
    pub data: bytes::Bytes,
    pub object_checksums: Option<ObjectChecksums>,
    pub finish: bool,
}

impl Chunk {
    pub fn new(offset: u64, data: bytes::Bytes) -> Self {
        Self {
            offset,
            data,
            ..Default::default()
        }
    }

    pub fn set_finish(mut self, v: bool) -> Self {
        self.finish = v;
        self
    }

    pub fn set_object_checksums<T: Into<Option<ObjectChecksums>>>(mut self, v: T) -> Self {
        self.object_checksums = v.into();
        self
    }
}

/// The authoritative state of a session, as returned by writes and status
/// queries.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteStatus {
    /// The session is still writable; the value is the committed size.
    Partial(u64),
    /// The session is finalized; no further writes are accepted.
    Finalized(Box<Object>),
}

impl WriteStatus {
    /// The number of bytes the service has durably accepted.
    pub fn persisted_size(&self) -> u64 {
        match self {
            Self::Partial(size) => *size,
            Self::Finalized(object) => object.size,
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Finalized(_))
    }
}

/// A request for one page of upload sessions.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct ListUploadsRequest {
    /// Continues a previous listing; empty for the first page.
    pub page_token: String,
    /// The maximum number of sessions per page. Values outside `1..=1000`
    /// are clamped.
    pub page_size: i32,
}

impl ListUploadsRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_page_token<T: Into<String>>(mut self, v: T) -> Self {
        self.page_token = v.into();
        self
    }

    pub fn set_page_size<T: Into<i32>>(mut self, v: T) -> Self {
        self.page_size = v.into();
        self
    }
}

/// One page of upload sessions.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct ListUploadsPage {
    pub uploads: Vec<UploadSummary>,
    /// Empty when this is the last page.
    pub next_page_token: String,
}

impl crate::paginator::PageableResponse for ListUploadsPage {
    fn next_page_token(&self) -> String {
        self.next_page_token.clone()
    }
}

/// A point-in-time description of one upload session.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct UploadSummary {
    pub id: SessionId,
    pub bucket: String,
    pub name: String,
    pub persisted_size: u64,
    pub finalized: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn session_id_round_trip() -> anyhow::Result<()> {
        let id = SessionId::new();
        let parsed = id.to_string().parse::<SessionId>()?;
        assert_eq!(parsed, id);
        Ok(())
    }

    #[test]
    fn session_id_reject_garbage() {
        let r = "not-a-session-token".parse::<SessionId>();
        assert!(r.is_err(), "{r:?}");
    }

    #[test]
    fn spec_builders() {
        let spec = WriteObjectSpec::new("test-bucket", "test-object")
            .set_if_generation_match(0)
            .set_if_metageneration_not_match(4);
        assert_eq!(spec.bucket, "test-bucket");
        assert_eq!(spec.name, "test-object");
        assert_eq!(spec.if_generation_match, Some(0));
        assert_eq!(spec.if_generation_not_match, None);
        assert_eq!(spec.if_metageneration_match, None);
        assert_eq!(spec.if_metageneration_not_match, Some(4));
    }

    #[test]
    fn spec_serde() -> anyhow::Result<()> {
        let spec = WriteObjectSpec::new("b", "o").set_if_generation_match(7);
        let value = serde_json::to_value(&spec)?;
        assert_eq!(value["bucket"], "b");
        assert_eq!(value["if_generation_match"], 7);
        let back = serde_json::from_value::<WriteObjectSpec>(value)?;
        assert_eq!(back, spec);
        Ok(())
    }

    #[test_case(WriteStatus::Partial(42), 42, false)]
    #[test_case(WriteStatus::Finalized(Box::new(Object { size: 99, ..Default::default() })), 99, true)]
    fn write_status(status: WriteStatus, size: u64, finalized: bool) {
        assert_eq!(status.persisted_size(), size);
        assert_eq!(status.is_finalized(), finalized);
    }

    #[test]
    fn chunk_builders() {
        let chunk = Chunk::new(512, bytes::Bytes::from_static(b"abc"))
            .set_finish(true)
            .set_object_checksums(ObjectChecksums::new().set_crc32c(5_u32));
        assert_eq!(chunk.offset, 512);
        assert_eq!(chunk.data, bytes::Bytes::from_static(b"abc"));
        assert!(chunk.finish);
        assert_eq!(chunk.object_checksums.and_then(|c| c.crc32c), Some(5));
    }
}

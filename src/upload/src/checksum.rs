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

//! Incremental CRC32C computation over accepted upload bytes.

use crate::model::ObjectChecksums;
use crate::streaming_source::{SizeHint, StreamingSource};

/// Accumulates the CRC32C checksum of a byte stream.
///
/// Both sides of the protocol use this type: the service folds in each
/// accepted chunk, and the client folds in each byte range pulled from the
/// payload source. The accumulator tracks the offset it has seen so far, so
/// retransmitted or overlapping ranges are only counted once.
#[derive(Clone, Debug, Default)]
pub struct Crc32c {
    checksum: u32,
    offset: u64,
}

impl Crc32c {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in `data`, which claims to start at `offset`.
    ///
    /// Bytes before the accumulator's current offset are skipped; ranges that
    /// leave a gap are ignored entirely and the accumulator stays put.
    pub fn update(&mut self, offset: u64, data: &bytes::Bytes) {
        let end = offset + data.len() as u64;
        if (offset..end).contains(&self.offset) {
            let data = data.clone().split_off((self.offset - offset) as usize);
            self.checksum = crc32c::crc32c_append(self.checksum, &data);
            self.offset = end;
        }
    }

    /// The number of bytes folded in so far.
    pub fn len(&self) -> u64 {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    pub fn finalize(&self) -> ObjectChecksums {
        ObjectChecksums::new().set_crc32c(self.checksum)
    }
}

/// Compare the received object checksums against the computed value.
///
/// A missing value on either side does not participate in the comparison.
/// That accounts for callers that disabled client-side checksums and for
/// services that do not report one.
pub fn validate(
    expected: &ObjectChecksums,
    received: &ObjectChecksums,
) -> Result<(), crate::Error> {
    match (expected.crc32c, received.crc32c) {
        (Some(want), Some(got)) if want != got => {
            Err(crate::Error::ChecksumMismatch { got, want })
        }
        _ => Ok(()),
    }
}

/// A payload source that computes the CRC32C of the bytes flowing through it.
///
/// The upload handle wraps its payload in this type so the full-object
/// checksum is ready by the time the source is exhausted, without a second
/// pass over the data.
#[derive(Debug)]
pub(crate) struct ChecksummedSource<S> {
    offset: u64,
    checksum: Crc32c,
    source: S,
}

impl<S> ChecksummedSource<S> {
    pub fn new(source: S) -> Self {
        Self {
            offset: 0,
            checksum: Crc32c::new(),
            source,
        }
    }

    pub fn final_checksum(&self) -> ObjectChecksums {
        self.checksum.finalize()
    }
}

impl<S> StreamingSource for ChecksummedSource<S>
where
    S: StreamingSource + Send + Sync,
{
    type Error = S::Error;

    async fn next(&mut self) -> Option<Result<bytes::Bytes, Self::Error>> {
        match self.source.next().await {
            None => None,
            Some(Ok(b)) => {
                self.checksum.update(self.offset, &b);
                self.offset += b.len() as u64;
                Some(Ok(b))
            }
            Some(Err(e)) => Some(Err(e)),
        }
    }

    async fn size_hint(&self) -> Result<SizeHint, Self::Error> {
        self.source.size_hint().await
    }
}

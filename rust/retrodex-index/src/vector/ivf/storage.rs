// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! On-disk layout of an IVF-PQ index.
//!
//! ```text
//! magic "RDXI" | u16 major | u16 minor | u32 metadata length
//! metadata (JSON)
//! coarse centroids  f32  [num_partitions * dimension]
//! PQ codebook       f32  [num_sub_vectors * 2^num_bits * sub_vector_width]
//! list lengths      u64  [num_partitions]
//! per list:         ids u64 [len], then codes u8 [len * num_sub_vectors]
//! ```
//!
//! All integers and floats are little endian.

use std::sync::Arc;

use arrow_array::Float32Array;
use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};
use log::debug;
use object_store::path::Path;
use retrodex_core::{Error, Result};
use retrodex_io::object_store::ObjectStore;
use retrodex_linalg::distance::DistanceType;
use serde::{Deserialize, Serialize};
use snafu::location;

use super::{InvertedList, IvfPqIndex};
use crate::vector::distributed::scheduler::BatchRange;
use crate::vector::pq::ProductQuantizer;

pub const MAGIC: &[u8; 4] = b"RDXI";
pub const MAJOR_VERSION: u16 = 0;
pub const MINOR_VERSION: u16 = 1;

const PREFIX_LEN: usize = 4 + 2 + 2 + 4;

/// Metadata stored in front of the index payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfPqMetadata {
    pub dimension: usize,
    pub num_partitions: usize,
    pub num_sub_vectors: usize,
    pub num_bits: u32,
    pub distance_type: DistanceType,
    pub vector_count: u64,
    #[serde(default)]
    pub row: Option<u32>,
    #[serde(default)]
    pub batch_range: Option<BatchRange>,
}

impl IvfPqMetadata {
    fn from_index(index: &IvfPqIndex) -> Self {
        Self {
            dimension: index.dimension,
            num_partitions: index.num_partitions(),
            num_sub_vectors: index.pq.num_sub_vectors,
            num_bits: index.pq.num_bits,
            distance_type: index.distance_type,
            vector_count: index.vector_count,
            row: index.row,
            batch_range: index.batch_range,
        }
    }
}

/// Serialize `index` into a single buffer.
pub fn encode_index(index: &IvfPqIndex) -> Result<Bytes> {
    let metadata = serde_json::to_vec(&IvfPqMetadata::from_index(index))?;
    let num_entries = index.lists.iter().map(|l| l.len()).sum::<usize>();
    let capacity = PREFIX_LEN
        + metadata.len()
        + (index.centroids.len() + index.pq.codebook.len()) * 4
        + index.num_partitions() * 8
        + num_entries * (8 + index.pq.num_sub_vectors);

    let mut buf = BytesMut::with_capacity(capacity);
    buf.put(MAGIC.as_slice());
    buf.put_u16_le(MAJOR_VERSION);
    buf.put_u16_le(MINOR_VERSION);
    buf.put_u32_le(metadata.len() as u32);
    buf.put(metadata.as_slice());
    index
        .centroids
        .values()
        .iter()
        .for_each(|v| buf.put_f32_le(*v));
    index
        .pq
        .codebook
        .values()
        .iter()
        .for_each(|v| buf.put_f32_le(*v));
    for list in index.lists.iter() {
        buf.put_u64_le(list.len() as u64);
    }
    for list in index.lists.iter() {
        list.ids.iter().for_each(|id| buf.put_u64_le(*id));
        buf.put(list.codes.as_slice());
    }
    Ok(buf.freeze())
}

/// Sequential reader that reports truncation as a corrupt file.
struct PayloadReader<'a> {
    path: &'a Path,
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                Error::corrupt_file(
                    self.path.clone(),
                    format!(
                        "truncated {}: need {} bytes at offset {}, file has {}",
                        what,
                        len,
                        self.offset,
                        self.bytes.len()
                    ),
                    location!(),
                )
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take_f32s(&mut self, count: usize, what: &str) -> Result<Vec<f32>> {
        let len = self.checked_len(count, 4, what)?;
        let raw = self.take(len, what)?;
        let mut values = vec![0.0_f32; count];
        LittleEndian::read_f32_into(raw, &mut values);
        Ok(values)
    }

    fn take_u64s(&mut self, count: usize, what: &str) -> Result<Vec<u64>> {
        let len = self.checked_len(count, 8, what)?;
        let raw = self.take(len, what)?;
        let mut values = vec![0_u64; count];
        LittleEndian::read_u64_into(raw, &mut values);
        Ok(values)
    }

    fn checked_len(&self, count: usize, width: usize, what: &str) -> Result<usize> {
        count.checked_mul(width).ok_or_else(|| {
            Error::corrupt_file(
                self.path.clone(),
                format!("{} size overflows", what),
                location!(),
            )
        })
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

/// Deserialize an index written by [`encode_index`].
pub fn decode_index(path: &Path, bytes: &[u8]) -> Result<IvfPqIndex> {
    let mut reader = PayloadReader {
        path,
        bytes,
        offset: 0,
    };
    let prefix = reader.take(PREFIX_LEN, "header")?;
    if &prefix[..4] != MAGIC {
        return Err(Error::corrupt_file(
            path.clone(),
            "file does not appear to be an IVF-PQ index (invalid magic)",
            location!(),
        ));
    }
    let major_version = LittleEndian::read_u16(&prefix[4..6]);
    let minor_version = LittleEndian::read_u16(&prefix[6..8]);
    if major_version != MAJOR_VERSION {
        return Err(Error::corrupt_file(
            path.clone(),
            format!(
                "unsupported index version {}.{}",
                major_version, minor_version
            ),
            location!(),
        ));
    }
    let metadata_len = LittleEndian::read_u32(&prefix[8..12]) as usize;
    let metadata: IvfPqMetadata =
        serde_json::from_slice(reader.take(metadata_len, "metadata")?).map_err(|e| {
            Error::corrupt_file(path.clone(), format!("invalid metadata: {}", e), location!())
        })?;

    let corrupt = |message: String| Error::corrupt_file(path.clone(), message, location!());
    if metadata.dimension == 0
        || metadata.num_sub_vectors == 0
        || metadata.dimension % metadata.num_sub_vectors != 0
        || !(1..=8).contains(&metadata.num_bits)
    {
        return Err(corrupt(format!("invalid quantizer shape: {:?}", metadata)));
    }

    let centroid_count = metadata
        .num_partitions
        .checked_mul(metadata.dimension)
        .ok_or_else(|| corrupt("centroid size overflows".to_string()))?;
    let centroids = reader.take_f32s(centroid_count, "centroids")?;
    let codebook_count = ProductQuantizer::codebook_length(metadata.num_bits, metadata.num_sub_vectors)
        * (metadata.dimension / metadata.num_sub_vectors);
    let codebook = reader.take_f32s(codebook_count, "codebook")?;
    let lengths = reader.take_u64s(metadata.num_partitions, "list lengths")?;

    let mut lists = Vec::with_capacity(metadata.num_partitions);
    for (partition, len) in lengths.iter().enumerate() {
        let len = usize::try_from(*len)
            .map_err(|_| corrupt(format!("list {} length {} overflows", partition, len)))?;
        let ids = reader.take_u64s(len, "list ids")?;
        let code_len = reader.checked_len(len, metadata.num_sub_vectors, "list codes")?;
        let codes = reader.take(code_len, "list codes")?.to_vec();
        lists.push(InvertedList { ids, codes });
    }
    if reader.remaining() != 0 {
        return Err(corrupt(format!(
            "{} trailing bytes after the last list",
            reader.remaining()
        )));
    }

    let pq = ProductQuantizer::try_new(
        metadata.num_sub_vectors,
        metadata.num_bits,
        metadata.dimension,
        Arc::new(Float32Array::from(codebook)),
    )?;
    let mut index = IvfPqIndex::try_new_empty(
        metadata.dimension,
        metadata.distance_type,
        Arc::new(Float32Array::from(centroids)),
        pq,
    )?;
    index.lists = lists;
    index.vector_count = metadata.vector_count;
    index.row = metadata.row;
    index.batch_range = metadata.batch_range;
    Ok(index)
}

pub async fn write_index(store: &ObjectStore, path: &Path, index: &IvfPqIndex) -> Result<()> {
    let bytes = encode_index(index)?;
    debug!(
        "Writing index {}: {} vectors, {} bytes",
        path,
        index.vector_count,
        bytes.len()
    );
    store.put(path, bytes).await
}

pub async fn read_index(store: &ObjectStore, path: &Path) -> Result<IvfPqIndex> {
    let bytes = store.read_one_all(path).await?;
    decode_index(path, &bytes)
}

// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

//! Vector shard store.
//!
//! A shard is a pair of flat array files: the embedding vectors and the
//! cluster id of every vector. Both use the same layout:
//!
//! ```text
//! magic "RDXF" | u8 element type | u32 width | u64 rows | values (little endian)
//! ```

use std::io::Cursor;

use arrow_array::{Array, FixedSizeListArray, Float32Array, UInt32Array};
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use futures::future::try_join_all;
use log::debug;
use object_store::path::Path;
use retrodex_arrow::{FixedSizeListArrayExt, FloatVectorsExt};
use retrodex_core::{Error, Result};
use snafu::location;
use tracing::instrument;

use crate::object_store::ObjectStore;

pub const MAGIC: &[u8; 4] = b"RDXF";

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 4 + 1 + 4 + 8;

/// Element type tag stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlatElementType {
    Float32 = 1,
    UInt32 = 2,
}

impl FlatElementType {
    fn try_from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Float32),
            2 => Some(Self::UInt32),
            _ => None,
        }
    }
}

/// Header of a flat array file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatHeader {
    pub element_type: FlatElementType,
    /// Values per row.
    pub width: u32,
    pub rows: u64,
}

impl FlatHeader {
    fn payload_len(&self) -> Option<usize> {
        let values = self.rows.checked_mul(u64::from(self.width))?;
        usize::try_from(values).ok()?.checked_mul(4)
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put(MAGIC.as_slice());
        buf.put_u8(self.element_type as u8);
        buf.put_u32_le(self.width);
        buf.put_u64_le(self.rows);
    }

    fn decode(path: &Path, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::corrupt_file(
                path.clone(),
                format!("file too short for a header: {} bytes", bytes.len()),
                location!(),
            ));
        }
        if &bytes[..4] != MAGIC {
            return Err(Error::corrupt_file(
                path.clone(),
                "file does not appear to be a flat array file (invalid magic)",
                location!(),
            ));
        }
        let mut cursor = Cursor::new(&bytes[4..HEADER_LEN]);
        let tag = cursor.read_u8()?;
        let element_type = FlatElementType::try_from_u8(tag).ok_or_else(|| {
            Error::corrupt_file(
                path.clone(),
                format!("unknown element type {}", tag),
                location!(),
            )
        })?;
        let width = cursor.read_u32::<LittleEndian>()?;
        let rows = cursor.read_u64::<LittleEndian>()?;
        Ok(Self {
            element_type,
            width,
            rows,
        })
    }
}

/// Paths of one input shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    /// Flat `f32` file of `rows x dimension` vectors.
    pub vectors: Path,
    /// Flat `u32` file with one cluster id per vector.
    pub assignments: Path,
}

impl ShardDescriptor {
    pub fn new(vectors: Path, assignments: Path) -> Self {
        Self {
            vectors,
            assignments,
        }
    }
}

fn decode_payload(
    path: &Path,
    bytes: &Bytes,
    expected: FlatElementType,
) -> Result<(FlatHeader, Bytes)> {
    let header = FlatHeader::decode(path, bytes)?;
    if header.element_type != expected {
        return Err(Error::corrupt_file(
            path.clone(),
            format!(
                "expected {:?} elements, found {:?}",
                expected, header.element_type
            ),
            location!(),
        ));
    }
    let payload_len = header.payload_len().ok_or_else(|| {
        Error::corrupt_file(path.clone(), "payload size overflows", location!())
    })?;
    if bytes.len() != HEADER_LEN + payload_len {
        return Err(Error::corrupt_file(
            path.clone(),
            format!(
                "expected {} payload bytes for {} rows of width {}, found {}",
                payload_len,
                header.rows,
                header.width,
                bytes.len() - HEADER_LEN
            ),
            location!(),
        ));
    }
    Ok((header, bytes.slice(HEADER_LEN..)))
}

/// Serialize vectors as a flat `f32` file.
pub fn encode_vectors(vectors: &FixedSizeListArray) -> Result<Bytes> {
    let values = vectors.flat_values()?;
    let header = FlatHeader {
        element_type: FlatElementType::Float32,
        width: vectors.dimension() as u32,
        rows: vectors.len() as u64,
    };
    let mut buf = BytesMut::with_capacity(HEADER_LEN + values.len() * 4);
    header.encode(&mut buf);
    values.iter().for_each(|v| buf.put_f32_le(*v));
    Ok(buf.freeze())
}

pub fn decode_vectors(path: &Path, bytes: &Bytes) -> Result<FixedSizeListArray> {
    let (header, payload) = decode_payload(path, bytes, FlatElementType::Float32)?;
    if header.width == 0 {
        return Err(Error::corrupt_file(
            path.clone(),
            "vector width must be positive",
            location!(),
        ));
    }
    let values = Float32Array::from_iter_values(
        payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
    );
    Ok(FixedSizeListArray::try_new_from_values(
        values,
        header.width as i32,
    )?)
}

/// Serialize cluster ids as a flat `u32` file.
pub fn encode_assignments(assignments: &UInt32Array) -> Result<Bytes> {
    if assignments.null_count() > 0 {
        return Err(Error::invalid_input(
            "cluster assignments must not contain nulls",
            location!(),
        ));
    }
    let header = FlatHeader {
        element_type: FlatElementType::UInt32,
        width: 1,
        rows: assignments.len() as u64,
    };
    let mut buf = BytesMut::with_capacity(HEADER_LEN + assignments.len() * 4);
    header.encode(&mut buf);
    assignments.values().iter().for_each(|v| buf.put_u32_le(*v));
    Ok(buf.freeze())
}

pub fn decode_assignments(path: &Path, bytes: &Bytes) -> Result<UInt32Array> {
    let (header, payload) = decode_payload(path, bytes, FlatElementType::UInt32)?;
    if header.width != 1 {
        return Err(Error::corrupt_file(
            path.clone(),
            format!("assignment width must be 1, found {}", header.width),
            location!(),
        ));
    }
    Ok(UInt32Array::from_iter_values(
        payload
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
    ))
}

pub async fn write_vectors(
    store: &ObjectStore,
    path: &Path,
    vectors: &FixedSizeListArray,
) -> Result<()> {
    store.put(path, encode_vectors(vectors)?).await
}

pub async fn read_vectors(store: &ObjectStore, path: &Path) -> Result<FixedSizeListArray> {
    let bytes = store.read_one_all(path).await?;
    decode_vectors(path, &bytes)
}

pub async fn write_assignments(
    store: &ObjectStore,
    path: &Path,
    assignments: &UInt32Array,
) -> Result<()> {
    store.put(path, encode_assignments(assignments)?).await
}

pub async fn read_assignments(store: &ObjectStore, path: &Path) -> Result<UInt32Array> {
    let bytes = store.read_one_all(path).await?;
    decode_assignments(path, &bytes)
}

/// Read only the header of a flat array file.
pub async fn read_header(store: &ObjectStore, path: &Path) -> Result<FlatHeader> {
    let bytes = store.read_one_range(path, 0..HEADER_LEN).await?;
    FlatHeader::decode(path, &bytes)
}

/// Load the vectors and cluster ids of one shard.
///
/// Fails if the two files disagree on the number of rows.
#[instrument(level = "debug", skip_all, fields(vectors = %shard.vectors))]
pub async fn read_shard(
    store: &ObjectStore,
    shard: &ShardDescriptor,
) -> Result<(FixedSizeListArray, UInt32Array)> {
    let (vectors, assignments) = futures::try_join!(
        read_vectors(store, &shard.vectors),
        read_assignments(store, &shard.assignments)
    )?;
    if vectors.len() != assignments.len() {
        return Err(Error::invalid_input(
            format!(
                "shard {} has {} vectors but {} has {} cluster ids",
                shard.vectors,
                vectors.len(),
                shard.assignments,
                assignments.len()
            ),
            location!(),
        ));
    }
    debug!(
        "Loaded shard {}: {} vectors of dimension {}",
        shard.vectors,
        vectors.len(),
        vectors.dimension()
    );
    Ok((vectors, assignments))
}

/// Load several vector files and concatenate them into one dense sample.
#[instrument(level = "debug", skip_all, fields(num_files = paths.len()))]
pub async fn read_and_concat_vectors(
    store: &ObjectStore,
    paths: &[Path],
) -> Result<FixedSizeListArray> {
    if paths.is_empty() {
        return Err(Error::invalid_input(
            "at least one vector file is required",
            location!(),
        ));
    }
    let arrays = try_join_all(paths.iter().map(|p| read_vectors(store, p))).await?;
    let dimension = arrays[0].dimension();
    let mut values = Vec::with_capacity(arrays.iter().map(|a| a.len() * dimension).sum());
    for (path, array) in paths.iter().zip(arrays.iter()) {
        if array.dimension() != dimension {
            return Err(Error::invalid_input(
                format!(
                    "vector file {} has dimension {}, expected {}",
                    path,
                    array.dimension(),
                    dimension
                ),
                location!(),
            ));
        }
        values.extend_from_slice(array.flat_values()?);
    }
    Ok(FixedSizeListArray::try_new_from_values(
        Float32Array::from(values),
        dimension as i32,
    )?)
}

/// Number of rows in each vector file, read from the headers only.
pub async fn read_row_counts(store: &ObjectStore, paths: &[Path]) -> Result<Vec<u64>> {
    let headers = try_join_all(paths.iter().map(|p| read_header(store, p))).await?;
    Ok(headers.into_iter().map(|h| h.rows).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    use retrodex_testing::datagen::{generate_random_assignments, generate_random_vectors};
    use test_log::test;

    #[test(tokio::test)]
    async fn test_vectors_round_trip() {
        let store = ObjectStore::memory();
        let path = Path::from("shards/vectors_0.flat");
        let vectors = generate_random_vectors(100, 16, 1);

        write_vectors(&store, &path, &vectors).await.unwrap();
        let read = read_vectors(&store, &path).await.unwrap();
        assert_eq!(read.len(), 100);
        assert_eq!(read.dimension(), 16);
        assert_eq!(read.flat_values().unwrap(), vectors.flat_values().unwrap());

        let header = read_header(&store, &path).await.unwrap();
        assert_eq!(
            header,
            FlatHeader {
                element_type: FlatElementType::Float32,
                width: 16,
                rows: 100
            }
        );
    }

    #[test(tokio::test)]
    async fn test_shard_row_count_mismatch() {
        let store = ObjectStore::memory();
        let shard = ShardDescriptor::new(Path::from("v.flat"), Path::from("a.flat"));
        write_vectors(&store, &shard.vectors, &generate_random_vectors(10, 4, 1))
            .await
            .unwrap();
        write_assignments(&store, &shard.assignments, &generate_random_assignments(9, 4, 1))
            .await
            .unwrap();

        let err = read_shard(&store, &shard).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }), "{}", err);

        write_assignments(&store, &shard.assignments, &generate_random_assignments(10, 4, 1))
            .await
            .unwrap();
        let (vectors, assignments) = read_shard(&store, &shard).await.unwrap();
        assert_eq!(vectors.len(), assignments.len());
    }

    #[test(tokio::test)]
    async fn test_rejects_corrupt_files() {
        let store = ObjectStore::memory();
        let path = Path::from("bad.flat");

        store.put(&path, Bytes::from_static(b"RDX")).await.unwrap();
        assert!(matches!(
            read_vectors(&store, &path).await.unwrap_err(),
            Error::CorruptFile { .. }
        ));

        // Valid vectors read back as assignments.
        write_vectors(&store, &path, &generate_random_vectors(4, 2, 1))
            .await
            .unwrap();
        assert!(matches!(
            read_assignments(&store, &path).await.unwrap_err(),
            Error::CorruptFile { .. }
        ));

        // Truncated payload.
        let bytes = encode_vectors(&generate_random_vectors(4, 2, 1)).unwrap();
        store.put(&path, bytes.slice(..bytes.len() - 4)).await.unwrap();
        assert!(matches!(
            read_vectors(&store, &path).await.unwrap_err(),
            Error::CorruptFile { .. }
        ));
    }

    #[test(tokio::test)]
    async fn test_concat_and_row_counts() {
        let store = ObjectStore::memory();
        let paths = vec![Path::from("a.flat"), Path::from("b.flat")];
        write_vectors(&store, &paths[0], &generate_random_vectors(3, 8, 1))
            .await
            .unwrap();
        write_vectors(&store, &paths[1], &generate_random_vectors(5, 8, 2))
            .await
            .unwrap();

        let all = read_and_concat_vectors(&store, &paths).await.unwrap();
        assert_eq!(all.len(), 8);
        assert_eq!(read_row_counts(&store, &paths).await.unwrap(), vec![3, 5]);

        write_vectors(&store, &paths[1], &generate_random_vectors(5, 4, 2))
            .await
            .unwrap();
        assert!(read_and_concat_vectors(&store, &paths).await.is_err());
    }
}

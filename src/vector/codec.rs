//! Binary encodings for embedding vectors.
//!
//! # Vector Format
//!
//! Embedding vectors travel through the embedding store as an explicit,
//! versioned blob so any implementation can read them:
//! - Header (12 bytes): magic `CVEC`, format version (u32), dimension (u32)
//! - Body: `dimension` IEEE-754 f32 values
//!
//! All integers and floats are little-endian.

use crate::vector::types::VectorError;

/// Magic bytes identifying an encoded vector.
pub const VECTOR_MAGIC: &[u8; 4] = b"CVEC";

/// Current vector format version.
pub const VECTOR_FORMAT_VERSION: u32 = 1;

/// Size of the vector header in bytes.
const VECTOR_HEADER_SIZE: usize = 12;

/// Number of bytes per f32 value.
pub(crate) const BYTES_PER_F32: usize = 4;

/// Encodes a vector in the versioned binary format.
#[must_use]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(VECTOR_HEADER_SIZE + vector.len() * BYTES_PER_F32);
    bytes.extend_from_slice(VECTOR_MAGIC);
    put_u32(&mut bytes, VECTOR_FORMAT_VERSION);
    put_u32(&mut bytes, vector.len() as u32);
    put_f32s(&mut bytes, vector);
    bytes
}

/// Decodes a vector, validating magic, version, dimension and length.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>, VectorError> {
    let mut reader = ByteReader::new(bytes);
    reader.expect_magic(VECTOR_MAGIC)?;

    let version = reader.read_u32()?;
    if version != VECTOR_FORMAT_VERSION {
        return Err(VectorError::VersionMismatch {
            expected: VECTOR_FORMAT_VERSION,
            actual: version,
        });
    }

    let dimension = reader.read_u32()? as usize;
    if dimension == 0 {
        return Err(VectorError::InvalidDimension {
            dimension,
            reason: "Encoded vector has zero dimension",
        });
    }

    let vector = reader.read_f32s(dimension)?;
    reader.finish()?;
    Ok(vector)
}

pub(crate) fn put_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u64(bytes: &mut Vec<u8>, value: u64) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_f32s(bytes: &mut Vec<u8>, values: &[f32]) {
    for &value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
}

/// Bounds-checked cursor over an encoded buffer.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], VectorError> {
        if len > self.remaining() {
            return Err(VectorError::Serialization(format!(
                "Truncated data: needed {len} bytes at offset {}, {} available",
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub(crate) fn expect_magic(&mut self, magic: &[u8; 4]) -> Result<(), VectorError> {
        let found = self.take(magic.len())?;
        if found != magic {
            return Err(VectorError::Serialization(format!(
                "Invalid magic bytes: expected {:?}, found {:?}",
                String::from_utf8_lossy(magic),
                String::from_utf8_lossy(found)
            )));
        }
        Ok(())
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, VectorError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, VectorError> {
        let raw = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads `count` floats; the length is checked before allocating.
    pub(crate) fn read_f32s(&mut self, count: usize) -> Result<Vec<f32>, VectorError> {
        let len = count.checked_mul(BYTES_PER_F32).ok_or_else(|| {
            VectorError::Serialization(format!("Float count {count} overflows"))
        })?;
        let raw = self.take(len)?;
        Ok(raw
            .chunks_exact(BYTES_PER_F32)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Fails if any bytes are left unread.
    pub(crate) fn finish(&self) -> Result<(), VectorError> {
        if self.remaining() != 0 {
            return Err(VectorError::Serialization(format!(
                "{} trailing bytes after offset {}",
                self.remaining(),
                self.offset
            )));
        }
        Ok(())
    }
}

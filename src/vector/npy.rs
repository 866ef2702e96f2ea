//! NumPy `.npy` matrices of training embeddings.
//!
//! Only the layout the bootstrap sample actually uses is supported: a 2-D,
//! C-ordered, little-endian `float32` array. Format versions 1.0, 2.0 and
//! 3.0 differ only in the width of the header length field.
//!
//! Reference: <https://numpy.org/devdocs/reference/generated/numpy.lib.format.html>

use crate::vector::VectorError;
use crate::vector::codec::BYTES_PER_F32;
use memmap2::MmapOptions;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Preamble plus header is padded to a multiple of this.
const NPY_ALIGNMENT: usize = 64;

/// Loads every row of a `(rows, cols)` float32 matrix.
///
/// # Errors
/// Fails on I/O errors, a malformed header, any dtype other than `<f4`,
/// Fortran ordering, a rank other than 2, or a truncated data section.
pub fn load_npy_matrix(path: &Path) -> Result<Vec<Vec<f32>>, VectorError> {
    let file = File::open(path)?;
    // SAFETY: the file is only read, and the sample is not rewritten while loaded.
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    parse_npy_matrix(&mmap)
}

/// Parses an in-memory `.npy` buffer.
pub fn parse_npy_matrix(bytes: &[u8]) -> Result<Vec<Vec<f32>>, VectorError> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(npy_error("not a valid .npy file (bad magic)"));
    }

    let major = bytes[6];
    let (header_len, preamble) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(npy_error("truncated header length"));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        other => return Err(npy_error(&format!("unsupported format version {other}"))),
    };

    let data_start = preamble + header_len;
    let header = bytes
        .get(preamble..data_start)
        .ok_or_else(|| npy_error("truncated header"))?;
    let header = std::str::from_utf8(header).map_err(|_| npy_error("header is not utf8"))?;

    let descr = dict_value(header, "descr").ok_or_else(|| npy_error("header lacks 'descr'"))?;
    if !descr.starts_with("'<f4'") && !descr.starts_with("\"<f4\"") {
        return Err(npy_error(&format!(
            "unsupported dtype {descr}; only little-endian float32 is supported"
        )));
    }

    let fortran = dict_value(header, "fortran_order")
        .ok_or_else(|| npy_error("header lacks 'fortran_order'"))?;
    if !fortran.starts_with("False") {
        return Err(npy_error("Fortran-ordered arrays are not supported"));
    }

    let (rows, cols) = parse_shape(header)?;
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(BYTES_PER_F32))
        .ok_or_else(|| npy_error("shape overflows"))?;
    let data = &bytes[data_start..];
    if data.len() != expected {
        return Err(npy_error(&format!(
            "data section holds {} bytes, shape ({rows}, {cols}) needs {expected}",
            data.len()
        )));
    }

    Ok(data
        .chunks_exact(cols * BYTES_PER_F32)
        .map(|row| {
            row.chunks_exact(BYTES_PER_F32)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        })
        .collect())
}

/// Writes rows as a version 1.0 `.npy` file.
///
/// All rows must share one non-zero length.
pub fn write_npy_matrix(path: &Path, rows: &[Vec<f32>]) -> Result<(), VectorError> {
    let cols = rows.first().map(Vec::len).unwrap_or_default();
    if cols == 0 {
        return Err(npy_error("cannot write an empty matrix"));
    }
    if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
        return Err(VectorError::DimensionMismatch {
            expected: cols,
            actual: bad.len(),
        });
    }

    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {cols}), }}",
        rows.len()
    );
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (NPY_ALIGNMENT - unpadded % NPY_ALIGNMENT) % NPY_ALIGNMENT;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut bytes = Vec::with_capacity(10 + header.len() + rows.len() * cols * BYTES_PER_F32);
    bytes.extend_from_slice(NPY_MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    for row in rows {
        for value in row {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Raw text following `'key':` in the header dict.
fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let single = format!("'{key}':");
    let double = format!("\"{key}\":");
    let (start, len) = header
        .find(&single)
        .map(|i| (i, single.len()))
        .or_else(|| header.find(&double).map(|i| (i, double.len())))?;
    Some(header[start + len..].trim_start())
}

fn parse_shape(header: &str) -> Result<(usize, usize), VectorError> {
    let value = dict_value(header, "shape").ok_or_else(|| npy_error("header lacks 'shape'"))?;
    let open = value
        .strip_prefix('(')
        .ok_or_else(|| npy_error("shape is not a tuple"))?;
    let close = open
        .find(')')
        .ok_or_else(|| npy_error("unterminated shape tuple"))?;

    let dims = open[..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|e| npy_error(&format!("bad shape dimension '{s}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    match dims.as_slice() {
        [rows, cols] if *cols > 0 => Ok((*rows, *cols)),
        [_, _] => Err(npy_error("matrix has zero columns")),
        other => Err(npy_error(&format!(
            "expected a 2-D matrix, found rank {}",
            other.len()
        ))),
    }
}

fn npy_error(message: &str) -> VectorError {
    VectorError::Serialization(format!("npy: {message}"))
}

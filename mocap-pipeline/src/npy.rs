//! NumPy `.npy` array files
//!
//! Writes format version 1.0 with little-endian `f64` data in C order, the
//! layout every artifact uses. Reading also accepts version 2.0 headers and
//! `<f4` data so arrays produced by other tools can be reused.

use crate::arrays::NumericArray;
use mocap_common::{Error, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

/// Write an array, creating parent folders as needed
pub fn save<A: NumericArray>(path: &Path, array: &A) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let header = build_header(&array.shape());
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&(header.len() as u16).to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    for value in array.data() {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;

    tracing::debug!(
        path = %path.display(),
        shape = ?array.shape(),
        "Saved {}",
        A::NAME
    );
    Ok(())
}

/// Read an array, failing with `MissingInput` if the file is absent
pub fn load<A: NumericArray>(path: &Path) -> Result<A> {
    if !path.is_file() {
        return Err(Error::missing(A::NAME, path));
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut preamble = [0u8; 8];
    reader.read_exact(&mut preamble)?;
    if &preamble[..6] != MAGIC {
        return Err(Error::InvalidInput(format!(
            "{} is not a .npy file",
            path.display()
        )));
    }

    let header_len = match preamble[6] {
        1 => {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len)?;
            u16::from_le_bytes(len) as usize
        }
        2 | 3 => {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            u32::from_le_bytes(len) as usize
        }
        v => {
            return Err(Error::InvalidInput(format!(
                "{}: unsupported .npy version {}",
                path.display(),
                v
            )))
        }
    };

    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8_lossy(&header);
    let parsed = parse_header(&header)
        .map_err(|msg| Error::InvalidInput(format!("{}: {}", path.display(), msg)))?;

    let width = parsed.dtype.width();
    let byte_count = parsed
        .shape
        .iter()
        .try_fold(width, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| {
            Error::ShapeMismatch(format!(
                "{}: header shape {:?} overflows the addressable size",
                path.display(),
                parsed.shape
            ))
        })?;
    let count = byte_count / width;

    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    if raw.len() < byte_count {
        return Err(Error::ShapeMismatch(format!(
            "{}: header shape {:?} needs {} bytes, file has {}",
            path.display(),
            parsed.shape,
            byte_count,
            raw.len()
        )));
    }

    let data = match parsed.dtype {
        Dtype::F8 => raw
            .chunks_exact(8)
            .take(count)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect(),
        Dtype::F4 => raw
            .chunks_exact(4)
            .take(count)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
            .collect(),
    };

    A::from_shape_vec(&parsed.shape, data)
}

fn build_header(shape: &[usize]) -> String {
    let dims = match shape {
        [single] => format!("({},)", single),
        _ => format!(
            "({})",
            shape
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': {}, }}",
        dims
    );
    // magic(6) + version(2) + length(2) + header + '\n' aligned to 64
    let unpadded = 10 + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.push_str(&" ".repeat(padding));
    header.push('\n');
    header
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Dtype {
    F8,
    F4,
}

impl Dtype {
    fn width(self) -> usize {
        match self {
            Dtype::F8 => 8,
            Dtype::F4 => 4,
        }
    }
}

#[derive(Debug)]
struct Header {
    dtype: Dtype,
    shape: Vec<usize>,
}

fn parse_header(header: &str) -> std::result::Result<Header, String> {
    let descr = dict_value(header, "descr").ok_or("header has no 'descr'")?;
    let dtype = match descr.trim_matches(|c| c == '\'' || c == '"') {
        "<f8" => Dtype::F8,
        "<f4" => Dtype::F4,
        other => return Err(format!("unsupported dtype {}", other)),
    };

    let fortran = dict_value(header, "fortran_order").ok_or("header has no 'fortran_order'")?;
    if fortran.trim() != "False" {
        return Err("Fortran-ordered arrays are not supported".into());
    }

    let start = header
        .find("'shape'")
        .ok_or("header has no 'shape'")?;
    let open = header[start..].find('(').ok_or("malformed shape")? + start;
    let close = header[open..].find(')').ok_or("malformed shape")? + open;
    let shape = header[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|e| format!("bad dimension {:?}: {}", s, e)))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Header { dtype, shape })
}

/// Raw text of a scalar value in the header dict
fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let quoted = format!("'{}'", key);
    let start = header.find(&quoted)? + quoted.len();
    let rest = header[start..].trim_start().strip_prefix(':')?;
    let end = rest.find(',').unwrap_or(rest.len());
    Some(rest[..end].trim())
}

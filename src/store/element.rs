use std::fmt::Display;
use std::io::{self, Write};

use anyhow::{anyhow, bail};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use num_traits::{NumCast, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Element type of a stored dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int32,
    Int64,
    Float32,
    Float64,
    /// Variable-length UTF-8 strings.
    Utf8,
}

impl DType {
    /// Width of one packed element, `None` for variable-length types.
    pub fn byte_size(self) -> Option<usize> {
        match self {
            DType::Int32 | DType::Float32 => Some(4),
            DType::Int64 | DType::Float64 => Some(8),
            DType::Utf8 => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.byte_size().is_some()
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Utf8 => "utf8",
        };
        write!(f, "{name}")
    }
}

/// In-memory type a numeric dataset can be decoded into.
///
/// Any stored numeric dtype is accepted; values are converted with [`NumCast`]
/// and a value that does not fit the target type is a read error.
pub trait Element: NumCast + Copy + Send + Sync + 'static {}

impl<T: NumCast + Copy + Send + Sync + 'static> Element for T {}

/// Types the container writer can store natively.
pub trait Storable: Copy {
    const DTYPE: DType;

    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()>;
}

macro_rules! impl_storable {
    ($t:ty, $d:path, $write:ident) => {
        impl Storable for $t {
            const DTYPE: DType = $d;

            fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
                writer.$write::<LittleEndian>(self)
            }
        }
    };
}

impl_storable!(i32, DType::Int32, write_i32);
impl_storable!(i64, DType::Int64, write_i64);
impl_storable!(f32, DType::Float32, write_f32);
impl_storable!(f64, DType::Float64, write_f64);

fn extend_cast<S, T, I>(values: I, out: &mut Vec<T>) -> anyhow::Result<()>
where
    S: ToPrimitive + Copy + Display,
    T: Element,
    I: Iterator<Item = S>,
{
    for value in values {
        let converted = <T as NumCast>::from(value).ok_or_else(|| {
            anyhow!(
                "stored value {} does not fit into {}",
                value,
                std::any::type_name::<T>()
            )
        })?;
        out.push(converted);
    }
    Ok(())
}

/// Decodes packed little-endian `bytes` of `dtype` into `out`, replacing its contents.
pub(crate) fn decode_into<T: Element>(
    dtype: DType,
    bytes: &[u8],
    out: &mut Vec<T>,
) -> anyhow::Result<()> {
    let width = match dtype.byte_size() {
        Some(width) => width,
        None => bail!("cannot decode {} payload as numbers", dtype),
    };
    if bytes.len() % width != 0 {
        bail!(
            "payload of {} bytes is not a whole number of {} elements",
            bytes.len(),
            dtype
        );
    }

    out.clear();
    out.reserve(bytes.len() / width);

    let chunks = bytes.chunks_exact(width);
    match dtype {
        DType::Int32 => extend_cast(chunks.map(LittleEndian::read_i32), out),
        DType::Int64 => extend_cast(chunks.map(LittleEndian::read_i64), out),
        DType::Float32 => extend_cast(chunks.map(LittleEndian::read_f32), out),
        DType::Float64 => extend_cast(chunks.map(LittleEndian::read_f64), out),
        DType::Utf8 => bail!("cannot decode {} payload as numbers", dtype),
    }
}

/// Decodes a `utf8` payload: `count + 1` little-endian u64 offsets followed by the string bytes.
///
/// Every string is copied into an owned `String`; nothing borrows from the mapped file afterwards.
pub(crate) fn decode_strings(bytes: &[u8], count: usize) -> anyhow::Result<Vec<String>> {
    let table_len = count
        .checked_add(1)
        .and_then(|n| n.checked_mul(8))
        .ok_or_else(|| anyhow!("string table of {} entries overflows", count))?;
    if bytes.len() < table_len {
        bail!(
            "string payload of {} bytes too short for {} offsets",
            bytes.len(),
            count + 1
        );
    }

    let (table, text) = bytes.split_at(table_len);
    let mut offsets = vec![0u64; count + 1];
    LittleEndian::read_u64_into(table, &mut offsets);

    let mut strings = Vec::with_capacity(count);
    for (i, window) in offsets.windows(2).enumerate() {
        let (start, end) = (window[0] as usize, window[1] as usize);
        if start > end || end > text.len() {
            bail!("string {} has invalid byte range [{}, {})", i, start, end);
        }
        let value = std::str::from_utf8(&text[start..end])
            .map_err(|e| anyhow!("string {} is not valid UTF-8: {}", i, e))?;
        strings.push(value.to_owned());
    }
    Ok(strings)
}

//! Byte codec helpers.
//!
//! SBL traffic is always little endian. These helpers turn the loosely typed
//! values a user hands us (hex text, integers, raw bytes) into byte vectors
//! and back, and render bytes as hex for logging.

use core::str::FromStr;

/// Errors converting a value to or from bytes
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum FormatError {
    /// A token contained characters that are not hex digits
    #[error("invalid hex token '{0}'")]
    InvalidHex(String),

    /// Value does not fit in the requested number of bytes
    #[error("value does not fit in {0} byte(s)")]
    Overflow(usize),

    /// An explicit width of zero bytes was requested
    #[error("invalid width {0}")]
    InvalidWidth(usize),
}

/// A value that can be converted to a byte sequence
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Value {
    /// Hex text, any non-alphanumeric character separates tokens (eg. `"90 00"`, `"de:ad:be:ef"`)
    Text(String),

    /// Integer encoded little endian, using the minimum width unless one is given
    Int { value: u64, width: Option<usize> },

    /// Raw bytes, copied as-is
    Bytes(Vec<u8>),
}

impl Value {
    /// Convert to a byte sequence
    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        to_bytes(self)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Int { value, width: None }
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int { value: value as u64, width: None }
    }
}

impl From<u8> for Value {
    fn from(value: u8) -> Self {
        Value::Int { value: value as u64, width: None }
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl FromStr for Value {
    type Err = FormatError;

    /// Parse hex text, failing early so CLI arguments are checked at parse time
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = Value::Text(s.to_string());
        v.to_bytes()?;
        Ok(v)
    }
}

/// Convert a value into a byte sequence
pub fn to_bytes(value: &Value) -> Result<Vec<u8>, FormatError> {
    match value {
        Value::Text(s) => hex_to_bytes(s),
        Value::Int { value, width } => int_to_bytes(*value, *width),
        Value::Bytes(b) => Ok(b.clone()),
    }
}

/// Extract hex tokens from text
fn hex_to_bytes(s: &str) -> Result<Vec<u8>, FormatError> {
    let cleaned: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut out = Vec::new();
    for token in cleaned.split_whitespace() {
        let padded;
        let token = if token.len() % 2 == 1 {
            padded = format!("0{}", token);
            padded.as_str()
        } else {
            token
        };

        let b = hex::decode(token).map_err(|_| FormatError::InvalidHex(token.to_string()))?;
        out.extend_from_slice(&b);
    }

    Ok(out)
}

/// Encode an integer little endian
///
/// With no width the minimum number of bytes is used (at least one),
/// otherwise exactly `width` bytes are produced.
pub fn int_to_bytes(value: u64, width: Option<usize>) -> Result<Vec<u8>, FormatError> {
    let min = ((64 - value.leading_zeros() as usize) + 7) / 8;
    let width = match width {
        None => min.max(1),
        Some(0) => return Err(FormatError::InvalidWidth(0)),
        Some(w) if w < min => return Err(FormatError::Overflow(w)),
        Some(w) => w,
    };

    let mut out = value.to_le_bytes().to_vec();
    out.resize(width, 0);
    Ok(out)
}

/// Decode a little endian integer
pub fn from_bytes(b: &[u8]) -> Result<u64, FormatError> {
    if b.iter().skip(8).any(|v| *v != 0) {
        return Err(FormatError::Overflow(8));
    }

    let v = b
        .iter()
        .take(8)
        .enumerate()
        .fold(0u64, |acc, (i, v)| acc | (*v as u64) << (8 * i));

    Ok(v)
}

/// Render values as uppercase hex
///
/// Each value is taken modulo 256, so signed bytes render as their unsigned
/// equivalent. `head` and `tail` wrap each byte, `separator` goes between
/// them, and trailing whitespace is trimmed.
pub fn format_hex<T>(bytes: &[T], head: &str, separator: &str, tail: &str) -> String
where
    T: Copy + Into<i64>,
{
    let mut s = String::new();

    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            s.push_str(separator);
        }
        let v = (*b).into().rem_euclid(256);
        s.push_str(&format!("{}{:02X}{}", head, v, tail));
    }

    s.trim_end().to_string()
}

/// Render bytes as space separated hex
pub fn hexstr(bytes: &[u8]) -> String {
    format_hex(bytes, "", " ", "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_separators() {
        let b = to_bytes(&"90 00".into()).unwrap();
        assert_eq!(b, vec![0x90, 0x00]);

        let b = to_bytes(&"de:ad,BE-ef".into()).unwrap();
        assert_eq!(b, vec![0xde, 0xad, 0xbe, 0xef]);

        let b = to_bytes(&"00 0B 00 00 04".into()).unwrap();
        assert_eq!(b, vec![0x00, 0x0b, 0x00, 0x00, 0x04]);
    }

    #[test]
    fn text_odd_tokens_padded() {
        let b = to_bytes(&"abc 1".into()).unwrap();
        assert_eq!(b, vec![0x0a, 0xbc, 0x01]);
    }

    #[test]
    fn text_multi_byte_tokens() {
        let b = to_bytes(&"deadbeef".into()).unwrap();
        assert_eq!(b, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn text_empty() {
        assert_eq!(to_bytes(&" , ".into()).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn text_invalid_hex() {
        let e = to_bytes(&"12 zz".into()).unwrap_err();
        assert_eq!(e, FormatError::InvalidHex("zz".to_string()));

        assert!("0x10".parse::<Value>().is_err());
    }

    #[test]
    fn int_minimum_width() {
        assert_eq!(int_to_bytes(0, None).unwrap(), vec![0x00]);
        assert_eq!(int_to_bytes(0x80, None).unwrap(), vec![0x80]);
        assert_eq!(int_to_bytes(0x100, None).unwrap(), vec![0x00, 0x01]);
        assert_eq!(int_to_bytes(0x2000_0000, None).unwrap(), vec![0x00, 0x00, 0x00, 0x20]);
    }

    #[test]
    fn int_explicit_width() {
        assert_eq!(int_to_bytes(0x1234, Some(4)).unwrap(), vec![0x34, 0x12, 0x00, 0x00]);
        assert_eq!(int_to_bytes(0x1234, Some(1)), Err(FormatError::Overflow(1)));
        assert_eq!(int_to_bytes(1, Some(0)), Err(FormatError::InvalidWidth(0)));
        assert_eq!(int_to_bytes(1, Some(10)).unwrap().len(), 10);
    }

    #[test]
    fn int_width_round_trip() {
        let values = [0u32, 1, 0xff, 0x100, 0xabcd, 0x12_3456, 0xdead_beef, u32::MAX];

        for v in values.iter() {
            let min = int_to_bytes(*v as u64, None).unwrap().len();
            for w in min..=8 {
                let b = to_bytes(&Value::Int { value: *v as u64, width: Some(w) }).unwrap();
                assert_eq!(b.len(), w);
                assert_eq!(from_bytes(&b).unwrap(), *v as u64);
            }
        }
    }

    #[test]
    fn from_bytes_overflow() {
        assert_eq!(from_bytes(&[]).unwrap(), 0);
        assert_eq!(from_bytes(&[1, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap(), 1);
        assert_eq!(from_bytes(&[0, 0, 0, 0, 0, 0, 0, 0, 1]), Err(FormatError::Overflow(8)));
    }

    #[test]
    fn bytes_copied() {
        let b = to_bytes(&Value::from(&[1u8, 2, 3][..])).unwrap();
        assert_eq!(b, vec![1, 2, 3]);
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(hexstr(&[]), "");
        assert_eq!(hexstr(&[0x90, 0x00, 0x0a]), "90 00 0A");
        assert_eq!(format_hex(&[1u8, 2], "0x", ", ", ""), "0x01, 0x02");
        assert_eq!(format_hex(&[1u8, 2], "", "", " "), "01 02");
        assert_eq!(format_hex(&[-1i8, -128], "", " ", ""), "FF 80");
    }

    #[test]
    fn hex_text_round_trip() {
        let inputs = ["00", "01 02 03", "de ad be ef", "ff:00:7f:80", "9000"];

        for s in inputs.iter() {
            let b = to_bytes(&(*s).into()).unwrap();
            let formatted = hexstr(&b);
            assert_eq!(to_bytes(&formatted.as_str().into()).unwrap(), b);
            assert_eq!(formatted.replace(' ', ""), s.replace(|c: char| !c.is_alphanumeric(), "").to_uppercase());
        }
    }
}

//! Bencode, the self-describing encoding used by `.torrent` files and by
//! tracker responses.
//!
//! - Integers:   `i<number>e`        Example: `i42e`
//! - Strings:    `<length>:<data>`   Example: `4:spam`
//! - Lists:      `l<items>e`         Example: `l4:spami42ee`
//! - Dicts:      `d<pairs>e`         Example: `d3:cow3:moo4:spam4:eggse`
//!
//! Decoding is a single recursive-descent pass over an input slice. Every
//! function receives the slice and the offset to start at, and returns the
//! decoded value together with the offset just past it, so no cursor state
//! is shared between calls.
//!
//! Encoding always emits dictionary keys in ascending byte order. This is
//! the canonical form the info hash of a torrent is computed over.
use std::{collections::BTreeMap, fmt};

use serde::{
    ser::{SerializeMap, SerializeSeq},
    Serialize, Serializer,
};

use crate::error::Error;

/// Maximum nesting of lists and dicts accepted by the decoder.
pub const MAX_DEPTH: usize = 64;

/// A decoded bencode value.
#[derive(Clone, PartialEq, Eq)]
pub enum Bencode {
    Int(i64),
    /// Raw bytes, not necessarily valid UTF-8.
    Bytes(Vec<u8>),
    List(Vec<Bencode>),
    /// Keys are kept sorted, which is also the order they are encoded in.
    Dict(BTreeMap<Vec<u8>, Bencode>),
}

fn parse_err(offset: usize, reason: &'static str) -> Error {
    Error::Parse { offset, reason }
}

/// Decode one value starting at `pos`.
///
/// Returns the value and the offset of the first byte after it. Trailing
/// bytes are left untouched, use [`decode_exact`] to reject them.
pub fn decode(input: &[u8], pos: usize) -> Result<(Bencode, usize), Error> {
    decode_at(input, pos, 0)
}

/// Decode a buffer that must contain exactly one value.
pub fn decode_exact(input: &[u8]) -> Result<Bencode, Error> {
    let (value, end) = decode(input, 0)?;
    if end != input.len() {
        return Err(parse_err(end, "trailing data after value"));
    }
    Ok(value)
}

/// Encode a value in canonical form.
pub fn encode(value: &Bencode) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode_into(&mut buf);
    buf
}

fn decode_at(
    input: &[u8],
    pos: usize,
    depth: usize,
) -> Result<(Bencode, usize), Error> {
    match input.get(pos) {
        None => Err(parse_err(pos, "unexpected end of input")),
        Some(b'i') => decode_int(input, pos),
        Some(b'0'..=b'9') => {
            let (bytes, next) = decode_bytes(input, pos)?;
            Ok((Bencode::Bytes(bytes), next))
        }
        Some(b'l') | Some(b'd') if depth >= MAX_DEPTH => {
            Err(parse_err(pos, "nesting too deep"))
        }
        Some(b'l') => decode_list(input, pos, depth),
        Some(b'd') => decode_dict(input, pos, depth),
        Some(_) => Err(parse_err(pos, "unexpected byte, expected i, l, d or a digit")),
    }
}

/// `i` [`-`] digits `e`, without `-0` and without leading zeros.
fn decode_int(input: &[u8], pos: usize) -> Result<(Bencode, usize), Error> {
    let mut i = pos + 1;

    let negative = input.get(i) == Some(&b'-');
    if negative {
        i += 1;
    }

    let digits_start = i;
    let mut value: i64 = 0;

    while let Some(c @ b'0'..=b'9') = input.get(i).copied() {
        let digit = (c - b'0') as i64;
        // accumulate negative numbers downwards so i64::MIN fits
        value = value
            .checked_mul(10)
            .and_then(|v| {
                if negative {
                    v.checked_sub(digit)
                } else {
                    v.checked_add(digit)
                }
            })
            .ok_or_else(|| parse_err(digits_start, "integer overflows 64 bits"))?;
        i += 1;
    }

    let digits = &input[digits_start..i];

    if digits.is_empty() {
        return match input.get(i) {
            None => Err(parse_err(i, "unterminated integer")),
            Some(_) => Err(parse_err(i, "integer has no digits")),
        };
    }
    if digits.len() > 1 && digits[0] == b'0' {
        return Err(parse_err(digits_start, "integer has a leading zero"));
    }
    if negative && digits == b"0" {
        return Err(parse_err(pos, "negative zero"));
    }

    match input.get(i) {
        Some(b'e') => Ok((Bencode::Int(value), i + 1)),
        None => Err(parse_err(i, "unterminated integer")),
        Some(_) => Err(parse_err(i, "integer must end with `e`")),
    }
}

/// digits `:` bytes. The length is strictly decimal digits.
fn decode_bytes(input: &[u8], pos: usize) -> Result<(Vec<u8>, usize), Error> {
    let mut i = pos;
    let mut len: usize = 0;

    while let Some(c @ b'0'..=b'9') = input.get(i).copied() {
        len = len
            .checked_mul(10)
            .and_then(|v| v.checked_add((c - b'0') as usize))
            .ok_or_else(|| parse_err(pos, "string length overflows"))?;
        i += 1;
    }

    if i == pos {
        return Err(parse_err(pos, "expected a string length"));
    }

    match input.get(i) {
        Some(b':') => i += 1,
        None => return Err(parse_err(i, "truncated string length")),
        Some(_) => {
            return Err(parse_err(i, "string length must be followed by `:`"))
        }
    }

    let remaining = input.len() - i;
    if len > remaining {
        return Err(parse_err(pos, "string length exceeds remaining input"));
    }

    Ok((input[i..i + len].to_vec(), i + len))
}

fn decode_list(
    input: &[u8],
    pos: usize,
    depth: usize,
) -> Result<(Bencode, usize), Error> {
    let mut i = pos + 1;
    let mut list = Vec::new();

    loop {
        match input.get(i) {
            None => return Err(parse_err(pos, "unterminated list")),
            Some(b'e') => return Ok((Bencode::List(list), i + 1)),
            Some(_) => {
                let (value, next) = decode_at(input, i, depth + 1)?;
                list.push(value);
                i = next;
            }
        }
    }
}

fn decode_dict(
    input: &[u8],
    pos: usize,
    depth: usize,
) -> Result<(Bencode, usize), Error> {
    let mut i = pos + 1;
    let mut dict = BTreeMap::new();

    loop {
        match input.get(i) {
            None => return Err(parse_err(pos, "unterminated dict")),
            Some(b'e') => return Ok((Bencode::Dict(dict), i + 1)),
            Some(b'0'..=b'9') => {
                let key_pos = i;
                let (key, next) = decode_bytes(input, i)?;
                let (value, next) = decode_at(input, next, depth + 1)?;

                if dict.insert(key, value).is_some() {
                    return Err(parse_err(key_pos, "duplicate dict key"));
                }
                i = next;
            }
            Some(_) => {
                return Err(parse_err(i, "dict keys must be byte strings"))
            }
        }
    }
}

impl Bencode {
    /// Encode in canonical form, see [`encode`].
    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Bencode::Int(n) => {
                buf.push(b'i');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.push(b'e');
            }
            Bencode::Bytes(b) => encode_bytes(b, buf),
            Bencode::List(list) => {
                buf.push(b'l');
                for v in list {
                    v.encode_into(buf);
                }
                buf.push(b'e');
            }
            Bencode::Dict(dict) => {
                // sort explicitly, the hash of the info dict depends on it
                let mut pairs: Vec<_> = dict.iter().collect();
                pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));

                buf.push(b'd');
                for (k, v) in pairs {
                    encode_bytes(k, buf);
                    v.encode_into(buf);
                }
                buf.push(b'e');
            }
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Bencode::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Bencode::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The value as UTF-8 text, if it is a byte string holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Bencode>> {
        match self {
            Bencode::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up `key` if this value is a dict.
    pub fn get(&self, key: &[u8]) -> Option<&Bencode> {
        self.as_dict().and_then(|d| d.get(key))
    }
}

fn encode_bytes(b: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(b.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(b);
}

impl From<i64> for Bencode {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Bencode {
    fn from(value: &str) -> Self {
        Self::Bytes(value.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Bencode {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for Bencode {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<Bencode>> for Bencode {
    fn from(value: Vec<Bencode>) -> Self {
        Self::List(value)
    }
}

impl<K: Into<Vec<u8>>> FromIterator<(K, Bencode)> for Bencode {
    fn from_iter<T: IntoIterator<Item = (K, Bencode)>>(iter: T) -> Self {
        Self::Dict(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Debug for Bencode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) if s.len() <= 64 => write!(f, "{s:?}"),
                _ => write!(f, "<{} bytes>", b.len()),
            },
            Self::List(l) => f.debug_list().entries(l).finish(),
            Self::Dict(d) => f
                .debug_map()
                .entries(
                    d.iter().map(|(k, v)| (String::from_utf8_lossy(k), v)),
                )
                .finish(),
        }
    }
}

/// Byte strings are rendered as (lossy) UTF-8 text. Used to print decoded
/// values as JSON.
impl Serialize for Bencode {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Int(n) => s.serialize_i64(*n),
            Self::Bytes(b) => s.serialize_str(&String::from_utf8_lossy(b)),
            Self::List(l) => {
                let mut seq = s.serialize_seq(Some(l.len()))?;
                for v in l {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            Self::Dict(d) => {
                let mut map = s.serialize_map(Some(d.len()))?;
                for (k, v) in d {
                    map.serialize_entry(&String::from_utf8_lossy(k), v)?;
                }
                map.end()
            }
        }
    }
}

//! CBOR decoder.
//!
//! Two modes share one implementation. [`from_canonical_cbor`] enforces
//! shortest-form integers and sorted map keys, which is what the engine
//! writes to its own logs. [`from_cbor`] accepts any definite-length CBOR,
//! which is what foreign callers send.

use crate::cbor::{TAG_DATETIME, TAG_EPOCH, TAG_IDENTIFIER, TAG_SET, TAG_UUID};
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Maximum allowed element count for arrays and maps.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum allowed byte/string length.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Maximum nesting depth.
const MAX_DEPTH: usize = 512;

/// Decode a single value from CBOR bytes produced by any encoder.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR, use indefinite
/// lengths, or carry data after the top-level value.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    CborDecoder::new(bytes).decode_complete()
}

/// Decode a single value, rejecting anything that is not canonical.
///
/// # Errors
///
/// Same as [`from_cbor`], plus non-shortest integers and unsorted map keys.
pub fn from_canonical_cbor(bytes: &[u8]) -> CodecResult<Value> {
    CborDecoder::canonical(bytes).decode_complete()
}

/// A CBOR decoder over a byte slice.
pub struct CborDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    canonical: bool,
    depth: usize,
}

impl<'a> CborDecoder<'a> {
    /// Create a lenient decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            canonical: false,
            depth: 0,
        }
    }

    /// Create a decoder that validates canonical form.
    pub fn canonical(data: &'a [u8]) -> Self {
        Self {
            canonical: true,
            ..Self::new(data)
        }
    }

    /// Decode one value and require that the input is fully consumed.
    pub fn decode_complete(&mut self) -> CodecResult<Value> {
        let value = self.decode()?;
        if !self.is_empty() {
            return Err(CodecError::TrailingData { offset: self.pos });
        }
        Ok(value)
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> CodecResult<Value> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CodecError::invalid_structure("nesting too deep"));
        }
        let result = self.decode_item();
        self.depth -= 1;
        result
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    fn decode_item(&mut self) -> CodecResult<Value> {
        let initial_byte = self.read_byte()?;
        let major_type = initial_byte >> 5;
        let additional_info = initial_byte & 0x1f;

        match major_type {
            0 => {
                let n = self.decode_unsigned(additional_info)?;
                i64::try_from(n)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::IntegerOverflow)
            }
            1 => {
                let n = self.decode_unsigned(additional_info)?;
                // value is -(n+1)
                i64::try_from(n)
                    .map(|n| Value::Integer(-n - 1))
                    .map_err(|_| CodecError::IntegerOverflow)
            }
            2 => Err(CodecError::unsupported_type("untagged byte string")),
            3 => self.decode_text(additional_info).map(Value::Text),
            4 => self.decode_array(additional_info).map(Value::Array),
            5 => self.decode_map(additional_info),
            6 => {
                let tag = self.decode_unsigned(additional_info)?;
                self.decode_tagged(tag)
            }
            7 => self.decode_simple(additional_info),
            _ => Err(CodecError::invalid_structure("invalid major type")),
        }
    }

    fn decode_tagged(&mut self, tag: u64) -> CodecResult<Value> {
        match tag {
            TAG_IDENTIFIER => match self.decode()? {
                Value::Text(s) => Ok(match s.strip_prefix(':') {
                    Some(name) => Value::Keyword(name.to_string()),
                    None => Value::Symbol(s),
                }),
                other => Err(CodecError::invalid_structure(format!(
                    "tag 39 expects text, found {}",
                    other.type_name()
                ))),
            },
            TAG_SET => match self.decode()? {
                Value::Array(items) => Ok(Value::set(items)),
                other => Err(CodecError::invalid_structure(format!(
                    "tag 258 expects an array, found {}",
                    other.type_name()
                ))),
            },
            TAG_UUID => {
                let initial_byte = self.read_byte()?;
                if initial_byte >> 5 != 2 {
                    return Err(CodecError::invalid_structure("tag 37 expects a byte string"));
                }
                let bytes = self.decode_byte_string(initial_byte & 0x1f)?;
                uuid::Uuid::from_slice(bytes)
                    .map(Value::Uuid)
                    .map_err(|e| CodecError::invalid_structure(format!("tag 37: {e}")))
            }
            TAG_EPOCH => match self.decode()? {
                Value::Integer(secs) => secs
                    .checked_mul(1000)
                    .map(Value::Instant)
                    .ok_or(CodecError::IntegerOverflow),
                Value::Float(secs) if secs.is_finite() => {
                    #[allow(clippy::cast_possible_truncation)]
                    Ok(Value::Instant((secs * 1000.0).round() as i64))
                }
                other => Err(CodecError::invalid_structure(format!(
                    "tag 1 expects a number, found {}",
                    other.type_name()
                ))),
            },
            TAG_DATETIME => match self.decode()? {
                Value::Text(s) => crate::edn::parse_instant(&s)
                    .map(Value::Instant)
                    .ok_or_else(|| CodecError::invalid_structure(format!("tag 0: bad date {s:?}"))),
                other => Err(CodecError::invalid_structure(format!(
                    "tag 0 expects text, found {}",
                    other.type_name()
                ))),
            },
            // Unknown tags are transparent
            _ => self.decode(),
        }
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        let bytes = self.data.get(self.pos..end).ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn non_canonical(&self) -> CodecResult<()> {
        if self.canonical {
            Err(CodecError::invalid_structure(
                "non-canonical: value could be encoded in fewer bytes",
            ))
        } else {
            Ok(())
        }
    }

    fn decode_unsigned(&mut self, additional_info: u8) -> CodecResult<u64> {
        match additional_info {
            0..=23 => Ok(u64::from(additional_info)),
            24 => {
                let byte = self.read_byte()?;
                if byte < 24 {
                    self.non_canonical()?;
                }
                Ok(u64::from(byte))
            }
            25 => {
                let value = u16::from_be_bytes(self.read_array()?);
                if u8::try_from(value).is_ok() {
                    self.non_canonical()?;
                }
                Ok(u64::from(value))
            }
            26 => {
                let value = u32::from_be_bytes(self.read_array()?);
                if u16::try_from(value).is_ok() {
                    self.non_canonical()?;
                }
                Ok(u64::from(value))
            }
            27 => {
                let value = u64::from_be_bytes(self.read_array()?);
                if u32::try_from(value).is_ok() {
                    self.non_canonical()?;
                }
                Ok(value)
            }
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            _ => Err(CodecError::IndefiniteLengthForbidden),
        }
    }

    fn decode_length(&mut self, additional_info: u8, max: u64) -> CodecResult<usize> {
        if additional_info == 31 {
            return Err(CodecError::IndefiniteLengthForbidden);
        }
        let len = self.decode_unsigned(additional_info)?;
        if len > max {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: max,
            });
        }
        usize::try_from(len).map_err(|_| CodecError::SizeLimitExceeded {
            claimed: len,
            max_allowed: max,
        })
    }

    fn decode_byte_string(&mut self, additional_info: u8) -> CodecResult<&'a [u8]> {
        let len = self.decode_length(additional_info, MAX_BYTES_LENGTH)?;
        self.read_bytes(len)
    }

    fn decode_text(&mut self, additional_info: u8) -> CodecResult<String> {
        let bytes = self.decode_byte_string(additional_info)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    fn decode_array(&mut self, additional_info: u8) -> CodecResult<Vec<Value>> {
        let len = self.decode_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
        // Never trust the declared length for preallocation beyond the input size.
        let mut items = Vec::with_capacity(len.min(self.data.len()));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        Ok(items)
    }

    fn decode_map(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
        let mut pairs = Vec::with_capacity(len.min(self.data.len()));
        let data: &'a [u8] = self.data;
        let mut prev_key: Option<&'a [u8]> = None;

        for _ in 0..len {
            let key_start = self.pos;
            let key = self.decode()?;
            let key_bytes = &data[key_start..self.pos];

            if self.canonical {
                if let Some(prev) = prev_key {
                    if compare_cbor_bytes(prev, key_bytes) != std::cmp::Ordering::Less {
                        return Err(CodecError::invalid_structure(
                            "non-canonical: map keys not in sorted order",
                        ));
                    }
                }
                prev_key = Some(key_bytes);
            }

            let value = self.decode()?;
            pairs.push((key, value));
        }

        Ok(Value::map(pairs))
    }

    fn decode_simple(&mut self, additional_info: u8) -> CodecResult<Value> {
        match additional_info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            // null and undefined
            22 | 23 => Ok(Value::Null),
            24 => {
                let simple = self.read_byte()?;
                Err(CodecError::unsupported_type(format!("simple value {simple}")))
            }
            25 => Ok(Value::Float(half_to_f64(u16::from_be_bytes(self.read_array()?)))),
            26 => Ok(Value::Float(f64::from(f32::from_be_bytes(self.read_array()?)))),
            27 => Ok(Value::Float(f64::from_be_bytes(self.read_array()?))),
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            _ => Err(CodecError::unsupported_type(format!(
                "simple value {additional_info}"
            ))),
        }
    }
}

/// Compare two CBOR byte sequences for canonical ordering.
fn compare_cbor_bytes(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// IEEE 754 binary16 to f64.
fn half_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 == 0 { 1.0 } else { -1.0 };
    let exponent = i32::from((bits >> 10) & 0x1f);
    let mantissa = f64::from(bits & 0x3ff);
    match exponent {
        0 => sign * mantissa * 2f64.powi(-24),
        31 if mantissa == 0.0 => sign * f64::INFINITY,
        31 => f64::NAN,
        e => sign * (1.0 + mantissa / 1024.0) * 2f64.powi(e - 15),
    }
}

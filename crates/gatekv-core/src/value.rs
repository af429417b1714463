//! Typed values stored by every backend
//!
//! The backend contract only ever needs five shapes of data, so they are a
//! closed enum. The binary encoding here is what the WAL stores for each put:
//!
//! ```text
//! tag(u8) + body
//!   1 String       utf-8 bytes
//!   2 Int          i32 LE
//!   3 Float        f32 LE bits
//!   4 Bool         u8 (0 or 1)
//!   5 StringArray  count(u32 LE) + { len(u32 LE) + utf-8 bytes }*
//! ```

use crate::error::{KvError, KvResult};

const TAG_STRING: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_BOOL: u8 = 4;
const TAG_STRING_ARRAY: u8 = 5;

/// A stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i32),
    Float(f32),
    Bool(bool),
    StringArray(Vec<String>),
}

impl Value {
    /// Variant name, for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::StringArray(_) => "string_array",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_string_array(&self) -> Option<&[String]> {
        match self {
            Value::StringArray(v) => Some(v),
            _ => None,
        }
    }

    /// Number of bytes [`Value::encode_into`] will append.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Value::String(s) => s.len(),
            Value::Int(_) | Value::Float(_) => 4,
            Value::Bool(_) => 1,
            Value::StringArray(items) => 4 + items.iter().map(|s| 4 + s.len()).sum::<usize>(),
        }
    }

    /// Append the tagged encoding of this value to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Value::String(s) => {
                buf.push(TAG_STRING);
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Int(v) => {
                buf.push(TAG_INT);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Float(v) => {
                buf.push(TAG_FLOAT);
                buf.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Value::Bool(v) => {
                buf.push(TAG_BOOL);
                buf.push(u8::from(*v));
            }
            Value::StringArray(items) => {
                buf.push(TAG_STRING_ARRAY);
                buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    buf.extend_from_slice(&(item.len() as u32).to_le_bytes());
                    buf.extend_from_slice(item.as_bytes());
                }
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decode a value produced by [`Value::encode`]. The slice must hold
    /// exactly one value.
    pub fn decode(bytes: &[u8]) -> KvResult<Self> {
        let (&tag, body) = bytes
            .split_first()
            .ok_or_else(|| KvError::CorruptValue("empty value encoding".into()))?;

        match tag {
            TAG_STRING => Ok(Value::String(utf8(body.to_vec())?)),
            TAG_INT => Ok(Value::Int(i32::from_le_bytes(fixed4(body, "int")?))),
            TAG_FLOAT => Ok(Value::Float(f32::from_bits(u32::from_le_bytes(fixed4(body, "float")?)))),
            TAG_BOOL => match body {
                [0] => Ok(Value::Bool(false)),
                [1] => Ok(Value::Bool(true)),
                _ => Err(KvError::CorruptValue(format!("invalid bool body: {:?}", body))),
            },
            TAG_STRING_ARRAY => decode_string_array(body),
            other => Err(KvError::CorruptValue(format!("unknown value tag: {}", other))),
        }
    }
}

fn utf8(bytes: Vec<u8>) -> KvResult<String> {
    String::from_utf8(bytes).map_err(|e| KvError::CorruptValue(format!("invalid utf-8: {}", e)))
}

fn fixed4(body: &[u8], kind: &str) -> KvResult<[u8; 4]> {
    body.try_into().map_err(|_| {
        KvError::CorruptValue(format!("{} body must be 4 bytes, got {}", kind, body.len()))
    })
}

fn read_u32(body: &[u8], pos: &mut usize) -> KvResult<u32> {
    let end = *pos + 4;
    let bytes = body.get(*pos..end).ok_or_else(|| {
        KvError::CorruptValue(format!("string array truncated at byte {}", *pos))
    })?;
    *pos = end;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn decode_string_array(body: &[u8]) -> KvResult<Value> {
    let mut pos = 0;
    let count = read_u32(body, &mut pos)? as usize;
    // every item needs at least its length prefix
    if count > body.len() / 4 {
        return Err(KvError::CorruptValue(format!(
            "string array claims {} items in {} bytes",
            count,
            body.len()
        )));
    }

    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_u32(body, &mut pos)? as usize;
        let item = body.get(pos..pos + len).ok_or_else(|| {
            KvError::CorruptValue(format!("string array item of {} bytes truncated", len))
        })?;
        items.push(utf8(item.to_vec())?);
        pos += len;
    }

    if pos != body.len() {
        return Err(KvError::CorruptValue(format!(
            "{} trailing bytes after string array",
            body.len() - pos
        )));
    }
    Ok(Value::StringArray(items))
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v) }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self { Value::Float(v) }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self { Value::StringArray(v) }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::StringArray(v.into_iter().map(str::to_string).collect())
    }
}

//! Record Codec
//!
//! Binary layout of one record file:
//!
//! ```text
//! magic "STASH\0" | version u8 | expiration secs i64 | expiration nanos u32 | payload len u64 | payload
//! ```
//!
//! All integers are big-endian. The payload is a tagged value stream in which
//! aggregates write their element count followed by each element in turn.
//! Both directions walk values with an explicit stack, so deeply nested data
//! never grows the call stack.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::driver::Record;
use crate::error::{Result, StashError};
use crate::value::Value;

// == Layout Constants ==
pub const MAGIC: &[u8; 6] = b"STASH\0";
pub const FORMAT_VERSION: u8 = 1;
pub const HEADER_LEN: usize = MAGIC.len() + 1 + 8 + 4 + 8;

const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_LIST: u8 = 7;
const TAG_MAP: u8 = 8;

// == Encode ==
/// Encodes a record. Never fails: every value has a representation.
pub fn encode(data: &Value, expiration: DateTime<Utc>) -> Vec<u8> {
    let payload = encode_value(data);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&expiration.timestamp().to_be_bytes());
    out.extend_from_slice(&expiration.timestamp_subsec_nanos().to_be_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    out.extend_from_slice(&payload);
    out
}

enum Pending<'a> {
    Value(&'a Value),
    Key(&'a str),
}

fn encode_value(root: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    let mut stack = vec![Pending::Value(root)];

    while let Some(next) = stack.pop() {
        let value = match next {
            Pending::Key(key) => {
                write_bytes(&mut out, key.as_bytes());
                continue;
            }
            Pending::Value(value) => value,
        };

        match value {
            Value::Null => out.push(TAG_NULL),
            Value::Bool(false) => out.push(TAG_FALSE),
            Value::Bool(true) => out.push(TAG_TRUE),
            Value::Int(i) => {
                out.push(TAG_INT);
                out.extend_from_slice(&i.to_be_bytes());
            }
            Value::Float(f) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            Value::Str(s) => {
                out.push(TAG_STR);
                write_bytes(&mut out, s.as_bytes());
            }
            Value::Bytes(b) => {
                out.push(TAG_BYTES);
                write_bytes(&mut out, b);
            }
            Value::List(items) => {
                out.push(TAG_LIST);
                write_len(&mut out, items.len());
                stack.extend(items.iter().rev().map(Pending::Value));
            }
            Value::Map(map) => {
                out.push(TAG_MAP);
                write_len(&mut out, map.len());
                for (key, item) in map.iter().rev() {
                    stack.push(Pending::Value(item));
                    stack.push(Pending::Key(key));
                }
            }
        }
    }

    out
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_be_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_len(out, bytes.len());
    out.extend_from_slice(bytes);
}

// == Decode ==
/// Decodes a full record.
pub fn decode(bytes: &[u8]) -> Result<Record> {
    let (expiration, payload) = split_header(bytes)?;
    let data = decode_value(payload)?;
    Ok(Record::new(data, expiration))
}

/// Reads only the expiration, after validating the header and payload length.
pub fn decode_expiration(bytes: &[u8]) -> Result<DateTime<Utc>> {
    split_header(bytes).map(|(expiration, _)| expiration)
}

fn split_header(bytes: &[u8]) -> Result<(DateTime<Utc>, &[u8])> {
    let mut reader = Reader::new(bytes);

    if reader.take(MAGIC.len())? != MAGIC {
        return Err(StashError::Decode("bad magic".to_string()));
    }

    let version = reader.u8()?;
    if version != FORMAT_VERSION {
        return Err(StashError::Decode(format!(
            "unsupported format version {}",
            version
        )));
    }

    let secs = reader.i64()?;
    let nanos = reader.u32()?;
    let expiration = DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| StashError::Decode(format!("expiration out of range: {}", secs)))?;

    let len = reader.len()?;
    if reader.remaining() != len {
        return Err(StashError::Decode(format!(
            "payload length {} does not match {} remaining bytes",
            len,
            reader.remaining()
        )));
    }

    Ok((expiration, reader.take(len)?))
}

enum Frame {
    List {
        items: Vec<Value>,
        remaining: usize,
    },
    Map {
        map: BTreeMap<String, Value>,
        remaining: usize,
        key: String,
    },
}

fn decode_value(payload: &[u8]) -> Result<Value> {
    let mut reader = Reader::new(payload);
    let mut stack: Vec<Frame> = Vec::new();

    loop {
        let mut value = match reader.u8()? {
            TAG_NULL => Value::Null,
            TAG_FALSE => Value::Bool(false),
            TAG_TRUE => Value::Bool(true),
            TAG_INT => Value::Int(reader.i64()?),
            TAG_FLOAT => Value::Float(f64::from_bits(reader.u64()?)),
            TAG_STR => Value::Str(reader.string()?),
            TAG_BYTES => {
                let len = reader.len()?;
                Value::Bytes(reader.take(len)?.to_vec())
            }
            TAG_LIST => {
                let count = reader.len()?;
                if count == 0 {
                    Value::List(Vec::new())
                } else {
                    // Cap the reservation: a corrupt count must not allocate.
                    let items = Vec::with_capacity(count.min(reader.remaining()));
                    stack.push(Frame::List {
                        items,
                        remaining: count,
                    });
                    continue;
                }
            }
            TAG_MAP => {
                let count = reader.len()?;
                if count == 0 {
                    Value::Map(BTreeMap::new())
                } else {
                    let key = reader.string()?;
                    stack.push(Frame::Map {
                        map: BTreeMap::new(),
                        remaining: count,
                        key,
                    });
                    continue;
                }
            }
            tag => return Err(StashError::Decode(format!("unknown value tag {}", tag))),
        };

        // Attach the finished value, closing every container it completes.
        loop {
            match stack.last_mut() {
                None => {
                    if reader.remaining() != 0 {
                        return Err(StashError::Decode("trailing payload bytes".to_string()));
                    }
                    return Ok(value);
                }
                Some(Frame::List { items, remaining }) => {
                    items.push(value);
                    *remaining -= 1;
                    if *remaining > 0 {
                        break;
                    }
                }
                Some(Frame::Map {
                    map,
                    remaining,
                    key,
                }) => {
                    map.insert(std::mem::take(key), value);
                    *remaining -= 1;
                    if *remaining > 0 {
                        *key = reader.string()?;
                        break;
                    }
                }
            }

            value = match stack.pop() {
                Some(Frame::List { items, .. }) => Value::List(items),
                Some(Frame::Map { map, .. }) => Value::Map(map),
                None => return Err(StashError::Decode("container stack underflow".to_string())),
            };
        }
    }
}

// == Reader ==
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(StashError::Decode(format!(
                "truncated record: wanted {} bytes, {} left",
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        self.array().map(u32::from_be_bytes)
    }

    fn u64(&mut self) -> Result<u64> {
        self.array().map(u64::from_be_bytes)
    }

    fn i64(&mut self) -> Result<i64> {
        self.array().map(i64::from_be_bytes)
    }

    fn len(&mut self) -> Result<usize> {
        let len = self.u64()?;
        usize::try_from(len).map_err(|_| StashError::Decode(format!("length {} overflows", len)))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| StashError::Decode(format!("invalid utf-8 text: {}", e)))
    }
}

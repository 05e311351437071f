//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! The subset of the AMQP 1.0 type system carried by SASL frames.
//!
//! Only what the five SASL performatives need is supported: null, boolean,
//! ubyte, uint and ulong (with their small and zero forms), binary, string,
//! symbol, lists, symbol arrays and described values. Anything else in a
//! SASL frame body is rejected as [`CodecError::InvalidConstructor`].

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Maximum nesting of lists and described values accepted on decode.
const MAX_DEPTH: usize = 16;

mod constructor {
    pub const DESCRIBED: u8 = 0x00;
    pub const NULL: u8 = 0x40;
    pub const TRUE: u8 = 0x41;
    pub const FALSE: u8 = 0x42;
    pub const UINT0: u8 = 0x43;
    pub const ULONG0: u8 = 0x44;
    pub const LIST0: u8 = 0x45;
    pub const UBYTE: u8 = 0x50;
    pub const SMALL_UINT: u8 = 0x52;
    pub const SMALL_ULONG: u8 = 0x53;
    pub const BOOLEAN: u8 = 0x56;
    pub const UINT: u8 = 0x70;
    pub const ULONG: u8 = 0x80;
    pub const VBIN8: u8 = 0xa0;
    pub const STR8: u8 = 0xa1;
    pub const SYM8: u8 = 0xa3;
    pub const VBIN32: u8 = 0xb0;
    pub const STR32: u8 = 0xb1;
    pub const SYM32: u8 = 0xb3;
    pub const LIST8: u8 = 0xc0;
    pub const LIST32: u8 = 0xd0;
    pub const ARRAY8: u8 = 0xe0;
    pub const ARRAY32: u8 = 0xf0;
}

/// Errors raised while encoding or decoding SASL frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input ended before a complete value was read.
    #[error("need {needed} more bytes, {remaining} remaining")]
    Incomplete {
        /// Bytes required by the value being decoded
        needed: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// A format code outside the supported subset.
    #[error("unsupported format code 0x{0:02x}")]
    InvalidConstructor(u8),

    /// A string or symbol was not valid UTF-8 (or ASCII, for symbols).
    #[error("invalid UTF-8 in {0}")]
    InvalidText(&'static str),

    /// A field held a value of the wrong type.
    #[error("field {field} expected {expected}, found {found}")]
    UnexpectedType {
        /// Field name
        field: &'static str,
        /// Expected type name
        expected: &'static str,
        /// Type actually found
        found: &'static str,
    },

    /// A mandatory field was absent or null.
    #[error("{performative} is missing mandatory field {field}")]
    MissingField {
        /// Performative name
        performative: &'static str,
        /// Field name
        field: &'static str,
    },

    /// The frame body was not a described list.
    #[error("frame body is not a described list")]
    NotDescribed,

    /// The descriptor does not name a SASL performative.
    #[error("unknown SASL descriptor {0}")]
    UnknownDescriptor(String),

    /// The `sasl-outcome` code is outside 0..=4.
    #[error("invalid SASL outcome code {0}")]
    InvalidOutcomeCode(u8),

    /// Lists or described values nested beyond the supported depth.
    #[error("values nested deeper than {MAX_DEPTH} levels")]
    NestingTooDeep,

    /// Bytes were left over after the frame body.
    #[error("{0} trailing bytes after frame body")]
    TrailingBytes(usize),

    /// The frame header is malformed.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// What was wrong with the header
        reason: String,
    },

    /// The frame exceeds the negotiated maximum.
    #[error("frame of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Declared frame size
        size: usize,
        /// Maximum accepted size
        max: usize,
    },
}

/// A decoded AMQP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Ubyte(u8),
    Uint(u32),
    Ulong(u64),
    Binary(Bytes),
    String(String),
    Symbol(String),
    List(Vec<Value>),
    SymbolArray(Vec<String>),
    Described(Box<Value>, Box<Value>),
}

impl Value {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Ubyte(_) => "ubyte",
            Value::Uint(_) => "uint",
            Value::Ulong(_) => "ulong",
            Value::Binary(_) => "binary",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::SymbolArray(_) => "symbol[]",
            Value::Described(..) => "described",
        }
    }

    /// Appends the encoding of this value, using the smallest form.
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        match self {
            Value::Null => buf.put_u8(constructor::NULL),
            Value::Bool(true) => buf.put_u8(constructor::TRUE),
            Value::Bool(false) => buf.put_u8(constructor::FALSE),
            Value::Ubyte(value) => {
                buf.put_u8(constructor::UBYTE);
                buf.put_u8(*value);
            }
            Value::Uint(0) => buf.put_u8(constructor::UINT0),
            Value::Uint(value) => match u8::try_from(*value) {
                Ok(small) => {
                    buf.put_u8(constructor::SMALL_UINT);
                    buf.put_u8(small);
                }
                Err(_) => {
                    buf.put_u8(constructor::UINT);
                    buf.put_u32(*value);
                }
            },
            Value::Ulong(0) => buf.put_u8(constructor::ULONG0),
            Value::Ulong(value) => match u8::try_from(*value) {
                Ok(small) => {
                    buf.put_u8(constructor::SMALL_ULONG);
                    buf.put_u8(small);
                }
                Err(_) => {
                    buf.put_u8(constructor::ULONG);
                    buf.put_u64(*value);
                }
            },
            Value::Binary(bytes) => {
                encode_variable(buf, constructor::VBIN8, constructor::VBIN32, bytes)
            }
            Value::String(text) => {
                encode_variable(buf, constructor::STR8, constructor::STR32, text.as_bytes())
            }
            Value::Symbol(text) => {
                encode_variable(buf, constructor::SYM8, constructor::SYM32, text.as_bytes())
            }
            Value::List(items) => encode_list(buf, items),
            Value::SymbolArray(symbols) => encode_symbol_array(buf, symbols),
            Value::Described(descriptor, value) => {
                buf.put_u8(constructor::DESCRIBED);
                descriptor.encode(buf);
                value.encode(buf);
            }
        }
    }

    /// Decodes exactly one value from `input`, rejecting trailing bytes.
    pub(crate) fn decode(input: &[u8]) -> Result<Value, CodecError> {
        let mut decoder = Decoder::new(input);
        let value = decoder.read_value(0)?;
        match decoder.remaining() {
            0 => Ok(value),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

fn encode_variable(buf: &mut BytesMut, short: u8, long: u8, bytes: &[u8]) {
    match u8::try_from(bytes.len()) {
        Ok(len) => {
            buf.put_u8(short);
            buf.put_u8(len);
        }
        Err(_) => {
            buf.put_u8(long);
            buf.put_u32(bytes.len() as u32);
        }
    }
    buf.put_slice(bytes);
}

fn encode_list(buf: &mut BytesMut, items: &[Value]) {
    if items.is_empty() {
        buf.put_u8(constructor::LIST0);
        return;
    }

    let mut body = BytesMut::new();
    for item in items {
        item.encode(&mut body);
    }

    // The size field counts the count field plus the encoded items.
    match (u8::try_from(body.len() + 1), u8::try_from(items.len())) {
        (Ok(size), Ok(count)) => {
            buf.put_u8(constructor::LIST8);
            buf.put_u8(size);
            buf.put_u8(count);
        }
        _ => {
            buf.put_u8(constructor::LIST32);
            buf.put_u32((body.len() + 4) as u32);
            buf.put_u32(items.len() as u32);
        }
    }
    buf.put_slice(&body);
}

fn encode_symbol_array(buf: &mut BytesMut, symbols: &[String]) {
    let short_elements = symbols.iter().all(|s| s.len() <= u8::MAX as usize);

    let mut body = BytesMut::new();
    if short_elements {
        body.put_u8(constructor::SYM8);
        for symbol in symbols {
            body.put_u8(symbol.len() as u8);
            body.put_slice(symbol.as_bytes());
        }
    } else {
        body.put_u8(constructor::SYM32);
        for symbol in symbols {
            body.put_u32(symbol.len() as u32);
            body.put_slice(symbol.as_bytes());
        }
    }

    match (u8::try_from(body.len() + 1), u8::try_from(symbols.len())) {
        (Ok(size), Ok(count)) => {
            buf.put_u8(constructor::ARRAY8);
            buf.put_u8(size);
            buf.put_u8(count);
        }
        _ => {
            buf.put_u8(constructor::ARRAY32);
            buf.put_u32((body.len() + 4) as u32);
            buf.put_u32(symbols.len() as u32);
        }
    }
    buf.put_slice(&body);
}

struct Decoder<'a> {
    input: &'a [u8],
}

impl<'a> Decoder<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    fn remaining(&self) -> usize {
        self.input.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.input.len() < n {
            return Err(CodecError::Incomplete {
                needed: n,
                remaining: self.input.len(),
            });
        }
        let (head, tail) = self.input.split_at(n);
        self.input = tail;
        Ok(head)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, CodecError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    fn read_len8(&mut self) -> Result<usize, CodecError> {
        Ok(usize::from(self.read_u8()?))
    }

    fn read_len32(&mut self) -> Result<usize, CodecError> {
        Ok(self.read_u32()? as usize)
    }

    fn read_text(&mut self, len: usize, what: &'static str) -> Result<String, CodecError> {
        let bytes = self.take(len)?;
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidText(what))?;
        if what == "symbol" && !text.is_ascii() {
            return Err(CodecError::InvalidText(what));
        }
        Ok(text.to_string())
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::NestingTooDeep);
        }

        let code = self.read_u8()?;
        let value = match code {
            constructor::DESCRIBED => {
                let descriptor = self.read_value(depth + 1)?;
                let value = self.read_value(depth + 1)?;
                Value::Described(Box::new(descriptor), Box::new(value))
            }
            constructor::NULL => Value::Null,
            constructor::TRUE => Value::Bool(true),
            constructor::FALSE => Value::Bool(false),
            constructor::BOOLEAN => Value::Bool(self.read_u8()? != 0),
            constructor::UBYTE => Value::Ubyte(self.read_u8()?),
            constructor::UINT0 => Value::Uint(0),
            constructor::SMALL_UINT => Value::Uint(u32::from(self.read_u8()?)),
            constructor::UINT => Value::Uint(self.read_u32()?),
            constructor::ULONG0 => Value::Ulong(0),
            constructor::SMALL_ULONG => Value::Ulong(u64::from(self.read_u8()?)),
            constructor::ULONG => Value::Ulong(self.read_u64()?),
            constructor::VBIN8 => {
                let len = self.read_len8()?;
                Value::Binary(Bytes::copy_from_slice(self.take(len)?))
            }
            constructor::VBIN32 => {
                let len = self.read_len32()?;
                Value::Binary(Bytes::copy_from_slice(self.take(len)?))
            }
            constructor::STR8 => {
                let len = self.read_len8()?;
                Value::String(self.read_text(len, "string")?)
            }
            constructor::STR32 => {
                let len = self.read_len32()?;
                Value::String(self.read_text(len, "string")?)
            }
            constructor::SYM8 => {
                let len = self.read_len8()?;
                Value::Symbol(self.read_text(len, "symbol")?)
            }
            constructor::SYM32 => {
                let len = self.read_len32()?;
                Value::Symbol(self.read_text(len, "symbol")?)
            }
            constructor::LIST0 => Value::List(Vec::new()),
            constructor::LIST8 => {
                let size = self.read_len8()?;
                let mut list = Decoder::new(self.take(size)?);
                let count = list.read_len8()?;
                Value::List(list.read_items(count, depth)?)
            }
            constructor::LIST32 => {
                let size = self.read_len32()?;
                let mut list = Decoder::new(self.take(size)?);
                let count = list.read_len32()?;
                Value::List(list.read_items(count, depth)?)
            }
            constructor::ARRAY8 => {
                let size = self.read_len8()?;
                let mut array = Decoder::new(self.take(size)?);
                let count = array.read_len8()?;
                Value::SymbolArray(array.read_symbol_elements(count)?)
            }
            constructor::ARRAY32 => {
                let size = self.read_len32()?;
                let mut array = Decoder::new(self.take(size)?);
                let count = array.read_len32()?;
                Value::SymbolArray(array.read_symbol_elements(count)?)
            }
            other => return Err(CodecError::InvalidConstructor(other)),
        };
        Ok(value)
    }

    fn read_items(&mut self, count: usize, depth: usize) -> Result<Vec<Value>, CodecError> {
        // Every item takes at least one byte.
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(self.read_value(depth + 1)?);
        }
        if self.remaining() != 0 {
            return Err(CodecError::TrailingBytes(self.remaining()));
        }
        Ok(items)
    }

    fn read_symbol_elements(&mut self, count: usize) -> Result<Vec<String>, CodecError> {
        let element = self.read_u8()?;
        let mut symbols = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            let len = match element {
                constructor::SYM8 => self.read_len8()?,
                constructor::SYM32 => self.read_len32()?,
                other => return Err(CodecError::InvalidConstructor(other)),
            };
            symbols.push(self.read_text(len, "symbol")?);
        }
        Ok(symbols)
    }
}

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

//! The five SASL performatives and their outcome codes.

use super::codec::{CodecError, Value};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a SASL exchange, carried by `sasl-outcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SaslCode {
    /// Authentication succeeded.
    Ok = 0,
    /// Credentials were rejected.
    Auth = 1,
    /// Unrecoverable system error.
    Sys = 2,
    /// Permanent system error.
    SysPerm = 3,
    /// Transient system error.
    SysTemp = 4,
}

impl SaslCode {
    /// Returns the wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` for [`SaslCode::Ok`].
    pub fn is_ok(self) -> bool {
        self == SaslCode::Ok
    }
}

impl TryFrom<u8> for SaslCode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SaslCode::Ok),
            1 => Ok(SaslCode::Auth),
            2 => Ok(SaslCode::Sys),
            3 => Ok(SaslCode::SysPerm),
            4 => Ok(SaslCode::SysTemp),
            other => Err(CodecError::InvalidOutcomeCode(other)),
        }
    }
}

impl fmt::Display for SaslCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaslCode::Ok => "ok",
            SaslCode::Auth => "auth",
            SaslCode::Sys => "sys",
            SaslCode::SysPerm => "sys-perm",
            SaslCode::SysTemp => "sys-temp",
        };
        f.write_str(name)
    }
}

/// `sasl-mechanisms`: the server's advertised mechanisms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslMechanisms {
    /// Mechanism names, in the server's preference order
    pub mechanisms: Vec<String>,
}

/// `sasl-init`: the client's mechanism selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslInit {
    /// Selected mechanism
    pub mechanism: String,
    /// Initial response, if the mechanism sends one
    pub initial_response: Option<Bytes>,
    /// Name of the host the client is connecting to
    pub hostname: Option<String>,
}

/// `sasl-challenge`: server challenge data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslChallenge {
    /// Mechanism-specific payload
    pub challenge: Bytes,
}

/// `sasl-response`: client response data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslResponse {
    /// Mechanism-specific payload
    pub response: Bytes,
}

/// `sasl-outcome`: the server's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslOutcome {
    /// Result of the exchange
    pub code: SaslCode,
    /// Additional data for the client on success
    pub additional_data: Option<Bytes>,
}

/// A SASL frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslPerformative {
    /// `sasl-mechanisms` (0x40)
    Mechanisms(SaslMechanisms),
    /// `sasl-init` (0x41)
    Init(SaslInit),
    /// `sasl-challenge` (0x42)
    Challenge(SaslChallenge),
    /// `sasl-response` (0x43)
    Response(SaslResponse),
    /// `sasl-outcome` (0x44)
    Outcome(SaslOutcome),
}

const MECHANISMS: (u64, &str) = (0x40, "amqp:sasl-mechanisms:list");
const INIT: (u64, &str) = (0x41, "amqp:sasl-init:list");
const CHALLENGE: (u64, &str) = (0x42, "amqp:sasl-challenge:list");
const RESPONSE: (u64, &str) = (0x43, "amqp:sasl-response:list");
const OUTCOME: (u64, &str) = (0x44, "amqp:sasl-outcome:list");

impl SaslPerformative {
    /// Performative name, e.g. `sasl-init`.
    pub fn name(&self) -> &'static str {
        match self {
            SaslPerformative::Mechanisms(_) => "sasl-mechanisms",
            SaslPerformative::Init(_) => "sasl-init",
            SaslPerformative::Challenge(_) => "sasl-challenge",
            SaslPerformative::Response(_) => "sasl-response",
            SaslPerformative::Outcome(_) => "sasl-outcome",
        }
    }

    /// Numeric descriptor code.
    pub fn code(&self) -> u64 {
        match self {
            SaslPerformative::Mechanisms(_) => MECHANISMS.0,
            SaslPerformative::Init(_) => INIT.0,
            SaslPerformative::Challenge(_) => CHALLENGE.0,
            SaslPerformative::Response(_) => RESPONSE.0,
            SaslPerformative::Outcome(_) => OUTCOME.0,
        }
    }

    /// Appends the described-list encoding of this performative.
    ///
    /// Trailing null fields are omitted.
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut fields = match self {
            SaslPerformative::Mechanisms(m) => vec![Value::SymbolArray(m.mechanisms.clone())],
            SaslPerformative::Init(init) => vec![
                Value::Symbol(init.mechanism.clone()),
                optional_binary(&init.initial_response),
                init.hostname
                    .as_ref()
                    .map_or(Value::Null, |h| Value::String(h.clone())),
            ],
            SaslPerformative::Challenge(c) => vec![Value::Binary(c.challenge.clone())],
            SaslPerformative::Response(r) => vec![Value::Binary(r.response.clone())],
            SaslPerformative::Outcome(outcome) => vec![
                Value::Ubyte(outcome.code.as_u8()),
                optional_binary(&outcome.additional_data),
            ],
        };
        while matches!(fields.last(), Some(Value::Null)) {
            fields.pop();
        }

        Value::Described(Box::new(Value::Ulong(self.code())), Box::new(Value::List(fields)))
            .encode(buf);
    }

    /// Decodes a frame body.
    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        let (descriptor, value) = match Value::decode(body)? {
            Value::Described(descriptor, value) => (*descriptor, *value),
            _ => return Err(CodecError::NotDescribed),
        };
        let fields = match value {
            Value::List(fields) => Fields::new(fields),
            _ => return Err(CodecError::NotDescribed),
        };

        let code = match descriptor {
            Value::Ulong(code) => code,
            Value::Symbol(name) => [MECHANISMS, INIT, CHALLENGE, RESPONSE, OUTCOME]
                .iter()
                .find(|(_, symbol)| *symbol == name)
                .map(|(code, _)| *code)
                .ok_or_else(|| CodecError::UnknownDescriptor(name.clone()))?,
            other => return Err(CodecError::UnknownDescriptor(other.type_name().to_string())),
        };

        match code {
            0x40 => Ok(SaslPerformative::Mechanisms(SaslMechanisms {
                mechanisms: fields.symbols("sasl-mechanisms", 0, "sasl-server-mechanisms")?,
            })),
            0x41 => Ok(SaslPerformative::Init(SaslInit {
                mechanism: fields.symbol("sasl-init", 0, "mechanism")?,
                initial_response: fields.binary(1, "initial-response")?,
                hostname: fields.string(2, "hostname")?,
            })),
            0x42 => Ok(SaslPerformative::Challenge(SaslChallenge {
                challenge: fields
                    .binary(0, "challenge")?
                    .ok_or_else(|| missing("sasl-challenge", "challenge"))?,
            })),
            0x43 => Ok(SaslPerformative::Response(SaslResponse {
                response: fields
                    .binary(0, "response")?
                    .ok_or_else(|| missing("sasl-response", "response"))?,
            })),
            0x44 => Ok(SaslPerformative::Outcome(SaslOutcome {
                code: fields.code()?,
                additional_data: fields.binary(1, "additional-data")?,
            })),
            other => Err(CodecError::UnknownDescriptor(format!("0x{other:016x}"))),
        }
    }
}

impl fmt::Display for SaslPerformative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaslPerformative::Mechanisms(m) => write!(f, "sasl-mechanisms({:?})", m.mechanisms),
            SaslPerformative::Init(init) => write!(f, "sasl-init({})", init.mechanism),
            SaslPerformative::Challenge(c) => write!(f, "sasl-challenge({} bytes)", c.challenge.len()),
            SaslPerformative::Response(r) => write!(f, "sasl-response({} bytes)", r.response.len()),
            SaslPerformative::Outcome(o) => write!(f, "sasl-outcome({})", o.code),
        }
    }
}

fn optional_binary(bytes: &Option<Bytes>) -> Value {
    bytes.as_ref().map_or(Value::Null, |b| Value::Binary(b.clone()))
}

fn missing(performative: &'static str, field: &'static str) -> CodecError {
    CodecError::MissingField { performative, field }
}

/// Positional field access with absent-means-null semantics.
struct Fields(Vec<Value>);

impl Fields {
    fn new(fields: Vec<Value>) -> Self {
        Self(fields)
    }

    fn get(&self, index: usize) -> &Value {
        self.0.get(index).unwrap_or(&Value::Null)
    }

    fn unexpected(field: &'static str, expected: &'static str, found: &Value) -> CodecError {
        CodecError::UnexpectedType {
            field,
            expected,
            found: found.type_name(),
        }
    }

    fn symbol(&self, performative: &'static str, index: usize, field: &'static str) -> Result<String, CodecError> {
        match self.get(index) {
            Value::Symbol(symbol) => Ok(symbol.clone()),
            Value::Null => Err(missing(performative, field)),
            other => Err(Self::unexpected(field, "symbol", other)),
        }
    }

    /// A multiple-symbol field may be a single symbol or an array. An empty
    /// array counts as absent.
    fn symbols(&self, performative: &'static str, index: usize, field: &'static str) -> Result<Vec<String>, CodecError> {
        match self.get(index) {
            Value::Symbol(symbol) => Ok(vec![symbol.clone()]),
            Value::SymbolArray(symbols) if !symbols.is_empty() => Ok(symbols.clone()),
            Value::SymbolArray(_) | Value::Null => Err(missing(performative, field)),
            other => Err(Self::unexpected(field, "symbol[]", other)),
        }
    }

    fn binary(&self, index: usize, field: &'static str) -> Result<Option<Bytes>, CodecError> {
        match self.get(index) {
            Value::Binary(bytes) => Ok(Some(bytes.clone())),
            Value::Null => Ok(None),
            other => Err(Self::unexpected(field, "binary", other)),
        }
    }

    fn string(&self, index: usize, field: &'static str) -> Result<Option<String>, CodecError> {
        match self.get(index) {
            Value::String(text) => Ok(Some(text.clone())),
            Value::Null => Ok(None),
            other => Err(Self::unexpected(field, "string", other)),
        }
    }

    fn code(&self) -> Result<SaslCode, CodecError> {
        match self.get(0) {
            Value::Ubyte(code) => SaslCode::try_from(*code),
            Value::Null => Err(missing("sasl-outcome", "code")),
            other => Err(Self::unexpected("code", "ubyte", other)),
        }
    }
}

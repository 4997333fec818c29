//! Wire envelopes for the RPC protocol.
//!
//! A call travels as the list `[method, args, kwargs]`; a response as the map
//! `{"status": "ok", "data": ...}` or `{"status": "error", "message": ...}`.
//! Both are plain [`Value`]s, so any [`Serializer`] can carry them.

use crate::error::{Error, Result};
use crate::serialize::Serializer;
use crate::value::{Kwargs, Value};

/// Reserved method name that stops the dispatch loop.
pub const SHUTDOWN_METHOD: &str = "__shutdown__";

const STATUS_OK: &str = "ok";
const STATUS_ERROR: &str = "error";

/// Request sent from parent to worker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallEnvelope {
    /// Registered command name.
    pub method: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: Kwargs,
}

impl CallEnvelope {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::default()
        }
    }

    /// The one-way shutdown request.
    pub fn shutdown() -> Self {
        Self::new(SHUTDOWN_METHOD)
    }

    pub fn is_shutdown(&self) -> bool {
        self.method == SHUTDOWN_METHOD
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn into_value(self) -> Value {
        Value::List(vec![
            Value::Str(self.method),
            Value::List(self.args),
            Value::Map(self.kwargs),
        ])
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::List(parts) = value else {
            return Err(malformed("call", &value));
        };

        match <[Value; 3]>::try_from(parts) {
            Ok([Value::Str(method), Value::List(args), Value::Map(kwargs)]) => Ok(Self {
                method,
                args,
                kwargs,
            }),
            Ok(parts) => Err(malformed("call", &Value::List(parts.into()))),
            Err(parts) => Err(malformed("call", &Value::List(parts))),
        }
    }

    pub fn encode(self, serializer: &dyn Serializer) -> Result<Vec<u8>> {
        serializer.dumps(&self.into_value())
    }

    pub fn decode(serializer: &dyn Serializer, bytes: &[u8]) -> Result<Self> {
        Self::from_value(serializer.loads(bytes)?)
    }
}

/// Reply sent from worker to parent, one per non-shutdown call.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// The command returned a value.
    Ok(Value),
    /// The call failed; the message is already rendered for display.
    Error(String),
}

impl Response {
    pub fn into_value(self) -> Value {
        match self {
            Response::Ok(data) => Value::from_iter([
                ("status", Value::from(STATUS_OK)),
                ("data", data),
            ]),
            Response::Error(message) => Value::from_iter([
                ("status", Value::from(STATUS_ERROR)),
                ("message", Value::from(message)),
            ]),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Map(mut map) = value else {
            return Err(malformed("response", &value));
        };

        let status = map.get("status").and_then(Value::as_str).map(str::to_owned);
        match status.as_deref() {
            Some(STATUS_OK) => Ok(Response::Ok(map.remove("data").unwrap_or_default())),
            Some(STATUS_ERROR) => match map.remove("message") {
                Some(Value::Str(message)) => Ok(Response::Error(message)),
                _ => Err(Error::Serialization(
                    "error response without a message".to_string(),
                )),
            },
            _ => Err(malformed("response", &Value::Map(map))),
        }
    }

    /// Convert into the caller-facing result.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Response::Ok(data) => Ok(data),
            Response::Error(message) => Err(Error::Worker(message)),
        }
    }

    pub fn encode(self, serializer: &dyn Serializer) -> Result<Vec<u8>> {
        serializer.dumps(&self.into_value())
    }

    pub fn decode(serializer: &dyn Serializer, bytes: &[u8]) -> Result<Self> {
        Self::from_value(serializer.loads(bytes)?)
    }
}

fn malformed(what: &str, value: &Value) -> Error {
    Error::Serialization(format!("malformed {} envelope: {}", what, value))
}

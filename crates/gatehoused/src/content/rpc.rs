//! JSON-RPC 2.0 envelopes.

use serde::Serialize;
use serde_json::{Map, Value, json};

/// Error object carried in a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcError {
    /// JSON-RPC error code, such as -32601.
    pub code: i64,
    /// Short description of the error.
    pub message: String,
    /// Extra detail; empty when there is none.
    pub data: String,
}

impl RpcError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;

    #[must_use]
    pub fn new(code: i64, message: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: data.into(),
        }
    }

    #[must_use]
    pub fn invalid_params(data: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, "Invalid params", data)
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            Self::METHOD_NOT_FOUND,
            "Method not found",
            format!("unknown method: {method}"),
        )
    }
}

/// A validated call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub method: String,
    pub params: Value,
    pub id: Value,
    /// The whole request object, returned verbatim by `echo`.
    pub raw: Value,
}

impl RpcRequest {
    /// Parses and validates a request body.
    ///
    /// # Errors
    ///
    /// Returns the error reply to send when the body is not valid JSON or is
    /// not a well-formed request object.
    pub fn parse(body: &[u8]) -> Result<Self, RpcResponse> {
        let raw: Value = serde_json::from_slice(body).map_err(|error| {
            RpcResponse::failure(
                RpcError::new(RpcError::PARSE_ERROR, "Parse error", error.to_string()),
                Value::Null,
            )
        })?;
        let empty = Map::new();
        let object = raw.as_object().unwrap_or(&empty);
        let id = object.get("id").cloned();

        let mut problems = Vec::new();
        match object.get("jsonrpc") {
            None => problems.push("jsonrpc version is missing"),
            Some(Value::String(version)) if version == "2.0" => {}
            Some(Value::String(_)) => problems.push("jsonrpc version is not 2.0"),
            Some(_) => problems.push("jsonrpc version is not a string"),
        }
        let method = match object.get("method") {
            None => {
                problems.push("method is missing");
                None
            }
            Some(Value::String(method)) => Some(method.clone()),
            Some(_) => {
                problems.push("method is not a string");
                None
            }
        };
        if !object.contains_key("params") {
            problems.push("params is missing");
        }
        if id.is_none() {
            problems.push("id is missing");
        }

        match (method, problems.is_empty()) {
            (Some(method), true) => Ok(Self {
                method,
                params: object.get("params").cloned().unwrap_or(Value::Null),
                id: id.unwrap_or(Value::Null),
                raw: raw.clone(),
            }),
            _ => Err(RpcResponse::failure(
                RpcError::new(RpcError::INVALID_REQUEST, "Invalid request", problems.join("; ")),
                id.unwrap_or(Value::Null),
            )),
        }
    }

    /// Reads a string-array parameter.
    ///
    /// # Errors
    ///
    /// Returns an invalid-params error when the parameter is absent or not an
    /// array of strings.
    pub fn string_array(&self, name: &str) -> Result<Vec<String>, RpcError> {
        let values = self
            .params
            .get(name)
            .ok_or_else(|| RpcError::invalid_params(format!("missing parameter: {name}")))?
            .as_array()
            .ok_or_else(|| RpcError::invalid_params(format!("{name} should be an array")))?;
        values
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| RpcError::invalid_params(format!("{name} should hold strings")))
            })
            .collect()
    }

    /// Reads an array parameter.
    ///
    /// # Errors
    ///
    /// Returns an invalid-params error when the parameter is absent or not an
    /// array.
    pub fn array(&self, name: &str) -> Result<&[Value], RpcError> {
        self.params
            .get(name)
            .ok_or_else(|| RpcError::invalid_params(format!("missing parameter: {name}")))?
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| RpcError::invalid_params(format!("{name} should be an array")))
    }
}

/// Reply to one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub outcome: Result<Value, RpcError>,
    pub id: Value,
}

impl RpcResponse {
    #[must_use]
    pub const fn success(result: Value, id: Value) -> Self {
        Self {
            outcome: Ok(result),
            id,
        }
    }

    #[must_use]
    pub const fn failure(error: RpcError, id: Value) -> Self {
        Self {
            outcome: Err(error),
            id,
        }
    }

    /// Serialises the reply envelope.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match &self.outcome {
            Ok(result) => json!({"jsonrpc": "2.0", "result": result, "id": self.id}),
            Err(error) => json!({"jsonrpc": "2.0", "error": error, "id": self.id}),
        }
    }
}

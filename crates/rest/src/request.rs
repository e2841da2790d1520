use lakestore_protocol::{BooleanResponse, Operation};
use serde::de::DeserializeOwned;

use crate::RestError;

/// A single WebHDFS call: operation, target path, query parameters and
/// an optional body.
///
/// `path` is the store path without a leading slash. Requests are cheap to
/// clone so that a retry loop can resend the same call.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub op: Operation,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RestRequest {
    pub fn new(op: Operation, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            op,
            path: path.trim_matches('/').to_string(),
            params: Vec::new(),
            body: None,
        }
    }

    /// Adds a query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Sets the request body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns the first value for `key`, if present.
    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Vec::len)
    }
}

/// Successful reply from a transport.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RestResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RestResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    pub fn empty() -> Self {
        Self::new(200, Vec::new())
    }

    pub fn json_body<T: serde::Serialize>(value: &T) -> Result<Self, RestError> {
        Ok(Self::new(200, serde_json::to_vec(value)?))
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RestError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Fails with [`RestError::OperationFailed`] when the body is
    /// `{"boolean": false}`. Any other body counts as success.
    pub fn ensure_success(&self, op: Operation, path: &str) -> Result<(), RestError> {
        match serde_json::from_slice::<BooleanResponse>(&self.body) {
            Ok(BooleanResponse { boolean: false }) => Err(RestError::OperationFailed {
                op,
                path: path.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

//! BOSH CPI request dispatch.
//!
//! The director sends one `{method, arguments, context}` request per invocation and reads back
//! `{result, error, log}`. Arguments are positional; CIDs travel as decimal strings.

mod dispatcher;
mod factory;

pub use dispatcher::Dispatcher;
pub use factory::dispatcher_from_config;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use softlayer_cpi_core::error::CpiError;
use softlayer_cpi_core::{Error, Result};

/// A CPI request.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Request {
    /// Verb, e.g. `create_vm`
    pub method: String,
    /// Positional arguments
    #[serde(default)]
    pub arguments: Vec<Value>,
    /// Director context (director UUID, request id)
    #[serde(default)]
    pub context: Value,
}

impl Request {
    /// Decode argument `index`. A missing argument decodes as `null`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] if the value does not have the expected shape.
    pub fn arg<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T> {
        let value = self.arguments.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            Error::ValidationError(format!("Invalid argument '{name}' of {}: {e}", self.method))
        })
    }

    /// Decode a CID argument into its numeric id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] if the argument is not a decimal id.
    pub fn cid(&self, index: usize, name: &str) -> Result<i64> {
        let value = self.arguments.get(index).unwrap_or(&Value::Null);
        match value {
            Value::String(cid) => parse_cid(cid, name),
            Value::Number(n) => n.as_i64().ok_or_else(|| invalid_cid(name, &n.to_string())),
            other => Err(invalid_cid(name, &other.to_string())),
        }
    }

    /// Like [`Request::cid`], but `null` and empty strings mean absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] if a present argument is not a decimal id.
    pub fn optional_cid(&self, index: usize, name: &str) -> Result<Option<i64>> {
        match self.arguments.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(cid)) if cid.is_empty() => Ok(None),
            Some(_) => self.cid(index, name).map(Some),
        }
    }
}

/// Parse a decimal CID.
///
/// # Errors
///
/// Returns [`Error::ValidationError`] for anything but a decimal integer.
pub fn parse_cid(cid: &str, name: &str) -> Result<i64> {
    cid.trim().parse().map_err(|_| invalid_cid(name, cid))
}

fn invalid_cid(name: &str, raw: &str) -> Error {
    Error::ValidationError(format!("Invalid {name} '{raw}'"))
}

/// A CPI response. Exactly one of `result` and `error` is meaningful.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Response {
    /// Verb result, `null` on error
    pub result: Value,
    /// Error object, `null` on success
    pub error: Option<CpiError>,
    /// Log text returned to the director
    pub log: String,
}

impl Response {
    /// A successful response.
    #[must_use]
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            error: None,
            log: String::new(),
        }
    }

    /// A failed response.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self {
            result: Value::Null,
            error: Some(error.into_cpi_error()),
            log: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(arguments: Value) -> Request {
        serde_json::from_value(json!({
            "method": "attach_disk",
            "arguments": arguments,
            "context": {"director_uuid": "abc"}
        }))
        .unwrap()
    }

    #[test]
    fn test_cids_from_strings_and_numbers() {
        let req = request(json!(["1234", 5678]));
        assert_eq!(req.cid(0, "VM CID").unwrap(), 1234);
        assert_eq!(req.cid(1, "disk CID").unwrap(), 5678);
    }

    #[test]
    fn test_invalid_cid() {
        let req = request(json!(["vm-abc"]));
        let err = req.cid(0, "VM CID").unwrap_err();
        assert_eq!(err, Error::ValidationError("Invalid VM CID 'vm-abc'".to_string()));
        assert!(req.cid(3, "disk CID").is_err());
    }

    #[test]
    fn test_optional_cid() {
        let req = request(json!([1024, {}, ""]));
        assert_eq!(req.optional_cid(2, "VM CID").unwrap(), None);
        assert_eq!(req.optional_cid(7, "VM CID").unwrap(), None);
        assert!(req.optional_cid(1, "VM CID").is_err());
    }

    #[test]
    fn test_arg_reports_method() {
        let req = request(json!(["not-a-number"]));
        let err = req.arg::<u64>(0, "size").unwrap_err();
        assert!(err.to_string().contains("Invalid argument 'size' of attach_disk"));
    }

    #[test]
    fn test_response_wire_shape() {
        assert_eq!(
            serde_json::to_value(Response::ok(json!("1234"))).unwrap(),
            json!({"result": "1234", "error": null, "log": ""})
        );
        assert_eq!(
            serde_json::to_value(Response::failed(Error::VmNotFound("VM '7' not found".into())))
                .unwrap(),
            json!({
                "result": null,
                "error": {
                    "type": "Bosh::Clouds::VMNotFound",
                    "message": "VM not found: VM '7' not found",
                    "ok_to_retry": false
                },
                "log": ""
            })
        );
    }
}

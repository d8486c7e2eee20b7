//! Collaborator contracts for talking to the server
//!
//! The SDK core never performs I/O itself. Schema definitions come from a
//! [`SchemaFetcher`] and method calls go through a [`MethodInvoker`]; both
//! are implemented by the HTTP/SOAP layer of the application.

use async_trait::async_trait;

use crate::dom::Element;

/// Fault code raised when the server does not know the called method
pub const UNSUPPORTED_METHOD_CODE: &str = "SOP-330011";

/// Fault detail identifying the unknown method
pub const UNSUPPORTED_METHOD_DETAIL: &str = "XSV-350008";

/// Failure of a remote call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SoapFault {
    /// The server answered with a SOAP fault
    #[error("SOAP fault {code}: {message}")]
    Fault {
        code: String,
        message: String,
        detail: Option<String>,
    },

    /// The call never got a SOAP answer (network, HTTP status, ...)
    #[error("Transport error: {0}")]
    Transport(String),
}

impl SoapFault {
    pub fn fault(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fault {
            code: code.into(),
            message: message.into(),
            detail: None,
        }
    }

    /// Build from a `<Fault>` element (`faultcode`, `faultstring`, `detail` children)
    pub fn from_element(fault: &Element) -> Self {
        let child_text = |name: &str| {
            fault
                .child_elements()
                .find(|child| child.name == name || child.name.ends_with(&format!(":{}", name)))
                .map(|child| child.text().trim().to_string())
        };
        Self::Fault {
            code: child_text("faultcode").unwrap_or_default(),
            message: child_text("faultstring").unwrap_or_default(),
            detail: child_text("detail").filter(|d| !d.is_empty()),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Fault { code, .. } => Some(code),
            Self::Transport(_) => None,
        }
    }

    /// The server build does not implement the called method
    pub fn is_unsupported_method(&self) -> bool {
        match self {
            Self::Fault { code, message, detail } => {
                code.contains(UNSUPPORTED_METHOD_CODE)
                    && (message.contains(UNSUPPORTED_METHOD_DETAIL)
                        || detail
                            .as_deref()
                            .is_some_and(|d| d.contains(UNSUPPORTED_METHOD_DETAIL)))
            }
            Self::Transport(_) => false,
        }
    }
}

/// Fetches schema definitions by id
#[async_trait]
pub trait SchemaFetcher: Send + Sync {
    /// The `<schema>` definition, or `Ok(None)` if the server has no such schema
    async fn fetch(&self, schema_id: &str) -> Result<Option<Element>, SoapFault>;
}

/// Invokes a method on the server
#[async_trait]
pub trait MethodInvoker: Send + Sync {
    /// Call `method` on `urn` with already-marshalled arguments; returns the response body
    async fn invoke(&self, urn: &str, method: &str, args: Vec<Element>) -> Result<Element, SoapFault>;
}

/// A recorded call made to [`MockInvoker`]
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub urn: String,
    pub method: String,
    pub args: Vec<Element>,
}

/// An invoker that replays queued responses, for testing
#[cfg(test)]
#[derive(Default)]
pub struct MockInvoker {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<Element, SoapFault>>>,
    calls: std::sync::Mutex<Vec<RecordedCall>>,
}

#[cfg(test)]
impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Result<Element, SoapFault>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl MethodInvoker for MockInvoker {
    async fn invoke(&self, urn: &str, method: &str, args: Vec<Element>) -> Result<Element, SoapFault> {
        self.calls.lock().unwrap().push(RecordedCall {
            urn: urn.to_string(),
            method: method.to_string(),
            args,
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SoapFault::Transport("No response queued".to_string())))
    }
}

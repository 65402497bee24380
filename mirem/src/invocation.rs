//! The method invocation exchanged by the remoting layer

use crate::value::{NativeType, Value};
use crate::{Error, Result};

/// A method name, ordered parameter values and an optional return type.
///
/// `parameters` is `None` for a parameterless method; a present parameter
/// list is never empty. Individual parameters may be null (`None`).
/// A `return_type` of `None` denotes a void method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInvocation {
    name: String,
    parameters: Option<Vec<Option<Value>>>,
    return_type: Option<NativeType>,
}

impl MethodInvocation {
    pub fn new(
        name: impl Into<String>,
        parameters: Option<Vec<Option<Value>>>,
        return_type: Option<NativeType>,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::invalid_argument(
                "The method name cannot be blank.",
                Some("name"),
            ));
        }
        if matches!(parameters, Some(ref p) if p.is_empty()) {
            return Err(Error::invalid_argument(
                "The method invocation parameters cannot be empty.",
                Some("parameters"),
            ));
        }
        Ok(Self {
            name,
            parameters,
            return_type,
        })
    }

    /// A parameterless void method
    pub fn void(name: impl Into<String>) -> Result<Self> {
        Self::new(name, None, None)
    }

    /// A method taking non-null parameters
    pub fn with_parameters<I, V>(
        name: impl Into<String>,
        parameters: I,
        return_type: Option<NativeType>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let parameters = parameters.into_iter().map(|v| Some(v.into())).collect();
        Self::new(name, Some(parameters), return_type)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> Option<&[Option<Value>]> {
        self.parameters.as_deref()
    }

    pub fn return_type(&self) -> Option<&NativeType> {
        self.return_type.as_ref()
    }

    pub fn is_void(&self) -> bool {
        self.return_type.is_none()
    }
}

//! Dispatch descriptor stored with every job.

use serde::{Deserialize, Serialize};

/// Identifies the handler that runs a job: a target type, a method on it,
/// and the parameter types the serialized arguments were produced from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeMeta {
    /// Target type name.
    pub type_name: String,
    /// Method name on the target type.
    pub method: String,
    /// Parameter type names, in call order.
    #[serde(default)]
    pub parameter_types: Vec<String>,
}

impl InvokeMeta {
    /// Build a descriptor.
    pub fn new(
        type_name: impl Into<String>,
        method: impl Into<String>,
        parameter_types: Vec<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            method: method.into(),
            parameter_types,
        }
    }

    /// Registry key, `"{type_name}::{method}"`.
    pub fn key(&self) -> String {
        format!("{}::{}", self.type_name, self.method)
    }
}

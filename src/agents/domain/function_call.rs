//! Function call types exchanged with the model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Tools the model may ask for.
///
/// Names outside the known set are kept verbatim so the executor can answer
/// them (usually with an error the model gets to see).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AiFunction {
    SearchVaultFiles,
    ListVaultFiles,
    ReadFile,
    Unknown(String),
}

impl AiFunction {
    /// Wire name of the function
    pub fn as_str(&self) -> &str {
        match self {
            AiFunction::SearchVaultFiles => "search_vault_files",
            AiFunction::ListVaultFiles => "list_vault_files",
            AiFunction::ReadFile => "read_file",
            AiFunction::Unknown(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, AiFunction::Unknown(_))
    }
}

impl From<&str> for AiFunction {
    fn from(name: &str) -> Self {
        match name {
            "search_vault_files" => AiFunction::SearchVaultFiles,
            "list_vault_files" => AiFunction::ListVaultFiles,
            "read_file" => AiFunction::ReadFile,
            other => AiFunction::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for AiFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AiFunction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AiFunction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(AiFunction::from(name.as_str()))
    }
}

/// A complete function call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function to run
    pub name: AiFunction,
    /// Decoded arguments
    pub arguments: Map<String, Value>,
    /// Provider-assigned id that the result must echo back
    pub call_id: String,
}

impl FunctionCall {
    /// Create a new function call
    pub fn new(name: AiFunction, arguments: Map<String, Value>, call_id: impl Into<String>) -> Self {
        Self {
            name,
            arguments,
            call_id: call_id.into(),
        }
    }

    /// Generate an id for providers that do not assign one
    pub fn generate_id() -> String {
        format!("call_{}", &uuid::Uuid::new_v4().simple().to_string()[..24])
    }

    /// Decode a JSON argument string. An empty string means no arguments.
    pub fn decode_arguments(raw: &str) -> Result<Map<String, Value>, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(raw)
    }

    /// Payload stored on the assistant turn that made the call
    pub fn to_stored(&self) -> StoredFunctionCall {
        StoredFunctionCall {
            function_call: StoredCall {
                id: self.call_id.clone(),
                name: self.name.as_str().to_string(),
                args: Value::Object(self.arguments.clone()),
            },
        }
    }
}

/// Tool schema offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Stored form of a function call: `{"functionCall":{"id","name","args"}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFunctionCall {
    pub function_call: StoredCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Stored form of a function result:
/// `{"id","functionResponse":{"name","response":{"result":..}}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFunctionResponse {
    pub id: String,
    pub function_response: StoredResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub name: String,
    pub response: Value,
}

impl StoredFunctionResponse {
    pub fn new(call: &FunctionCall, result: Value) -> Self {
        Self {
            id: call.call_id.clone(),
            function_response: StoredResponse {
                name: call.name.as_str().to_string(),
                response: serde_json::json!({ "result": result }),
            },
        }
    }
}

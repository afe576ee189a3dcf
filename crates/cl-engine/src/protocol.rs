//! Wire protocol for engine communication
//!
//! The engine speaks JSON-RPC 2.0 over its control socket. Method names and
//! field casing are part of the external contract and must match exactly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cl_core::{ControlMeta, ControlType, ControlValue};

/// Commands consumed from the engine SDK, exact wire casing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    GetComponents,
    GetControls,
    ComponentGet,
    ComponentSet,
    GetAllControls,
    ControlGet,
    ControlSet,
    ControlSetValues,
    StatusGet,
    NoOp,
}

impl Method {
    /// Wire method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GetComponents => "Component.GetComponents",
            Method::GetControls => "Component.GetControls",
            Method::ComponentGet => "Component.Get",
            Method::ComponentSet => "Component.Set",
            Method::GetAllControls => "Component.GetAllControls",
            Method::ControlGet => "Control.Get",
            Method::ControlSet => "Control.Set",
            Method::ControlSetValues => "Control.SetValues",
            Method::StatusGet => "Status.Get",
            Method::NoOp => "NoOp",
        }
    }

    /// Parse a wire method name
    pub fn parse(s: &str) -> Option<Method> {
        Some(match s {
            "Component.GetComponents" => Method::GetComponents,
            "Component.GetControls" => Method::GetControls,
            "Component.Get" => Method::ComponentGet,
            "Component.Set" => Method::ComponentSet,
            "Component.GetAllControls" => Method::GetAllControls,
            "Control.Get" => Method::ControlGet,
            "Control.Set" => Method::ControlSet,
            "Control.SetValues" => Method::ControlSetValues,
            "Status.Get" => Method::StatusGet,
            "NoOp" => Method::NoOp,
            _ => return None,
        })
    }
}

/// Outgoing JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// Incoming JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Notification method, present when the frame is not a response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Component entry in `Component.GetComponents`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireComponent {
    pub name: String,
    #[serde(rename = "Type", default)]
    pub component_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<WireProperty>,
}

/// Property entry under a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireProperty {
    pub name: String,
    pub value: String,
}

/// Control entry as the engine reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireControl {
    pub name: String,
    /// Owning component, only present in `Component.GetAllControls`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(rename = "Type", default)]
    pub control_type: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "String", default)]
    pub string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

impl WireControl {
    /// Metadata view of the reported type and bounds
    pub fn meta(&self) -> ControlMeta {
        ControlMeta {
            control_type: self
                .control_type
                .as_deref()
                .map(ControlType::parse)
                .unwrap_or(ControlType::Unknown),
            min: self.value_min,
            max: self.value_max,
            max_length: self.max_length,
            position: self.position,
        }
    }

    /// Scalar value view; non-scalar payloads collapse to 0
    pub fn control_value(&self) -> ControlValue {
        ControlValue::from_json(&self.value).unwrap_or(ControlValue::Number(0.0))
    }
}

/// Result of `Component.GetControls` / `Component.Get`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireComponentControls {
    pub name: String,
    pub controls: Vec<WireControl>,
}

/// Per-item result of a write command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireSetResult {
    pub name: String,
    /// `"Success"` or `"Error"`
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WireSetResult {
    pub fn success(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: "Success".to_string(),
            error: None,
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: "Error".to_string(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == "Success"
    }
}

/// One write item in `Control.SetValues` / `Component.Set` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireSetItem {
    pub name: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_names_exact() {
        assert_eq!(Method::GetComponents.as_str(), "Component.GetComponents");
        assert_eq!(Method::ControlSetValues.as_str(), "Control.SetValues");
        assert_eq!(Method::StatusGet.as_str(), "Status.Get");
        assert_eq!(Method::parse("Control.Get"), Some(Method::ControlGet));
        assert_eq!(Method::parse("control.get"), None);
    }

    #[test]
    fn test_request_serialization() {
        let req = RpcRequest::new(7, Method::ControlGet.as_str(), Some(json!(["Main.gain"])));
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["id"], 7);
        assert_eq!(v["method"], "Control.Get");
        assert_eq!(v["params"][0], "Main.gain");
    }

    #[test]
    fn test_wire_control_parsing() {
        let raw = json!({
            "Name": "gain",
            "Type": "Float",
            "Value": -12.0,
            "String": "-12.0dB",
            "Position": 0.4,
            "ValueMin": -100.0,
            "ValueMax": 20.0
        });
        let control: WireControl = serde_json::from_value(raw).unwrap();
        assert_eq!(control.name, "gain");
        let meta = control.meta();
        assert_eq!(meta.control_type, ControlType::Float);
        assert_eq!(meta.min, Some(-100.0));
        assert_eq!(meta.max, Some(20.0));
        assert_eq!(control.control_value(), ControlValue::Number(-12.0));
    }

    #[test]
    fn test_wire_control_missing_fields() {
        let control: WireControl = serde_json::from_value(json!({ "Name": "mute" })).unwrap();
        assert_eq!(control.meta().control_type, ControlType::Unknown);
        assert_eq!(control.control_value(), ControlValue::Number(0.0));
        assert!(control.string.is_empty());
    }

    #[test]
    fn test_set_result_roundtrip() {
        let ok = WireSetResult::success("Main.gain");
        assert!(ok.is_success());
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["Result"], "Success");

        let bad = WireSetResult::failure("X.y", "Component not found: X");
        assert!(!bad.is_success());
        assert_eq!(
            serde_json::to_value(&bad).unwrap()["Error"],
            "Component not found: X"
        );
    }

    #[test]
    fn test_response_vs_notification() {
        let response: RpcResponse =
            serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 3, "result": true })).unwrap();
        assert_eq!(response.id, Some(3));
        assert!(response.method.is_none());

        let notice: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "method": "EngineStatus",
            "params": { "State": "Active" }
        }))
        .unwrap();
        assert!(notice.id.is_none());
        assert_eq!(notice.method.as_deref(), Some("EngineStatus"));
    }
}

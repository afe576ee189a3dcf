//! The `ControlSystem` interface
//!
//! Typed facade over the engine implemented by the control adapter and
//! consumed by the poller and the tool layer. Concrete implementations are
//! passed in at construction; nothing in the bridge reaches for a global.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClResult;
use crate::value::{ControlMeta, ControlValue};

/// One engine component as reported by discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Component name, unique within the design
    pub name: String,
    /// Engine type string ("gain", "mixer", "router", ...)
    pub component_type: String,
    /// Design-time properties, verbatim from the engine
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyInfo>,
}

/// A design-time component property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub name: String,
    pub value: String,
}

/// One control with metadata and its current value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlInfo {
    /// Control name within its component
    pub name: String,
    /// Owning component, absent for named controls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Type and bounds metadata
    pub meta: ControlMeta,
    /// Current value
    pub value: ControlValue,
    /// Display form of the value
    pub string: String,
}

impl ControlInfo {
    /// Full `"Component.Control"` name, or the bare name for named controls
    pub fn full_name(&self) -> String {
        match &self.component {
            Some(c) => format!("{}.{}", c, self.name),
            None => self.name.clone(),
        }
    }
}

/// Controls of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentControls {
    pub name: String,
    pub controls: Vec<ControlInfo>,
}

/// Read result for one control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReading {
    /// Name as requested by the caller
    pub name: String,
    pub value: ControlValue,
    pub string: String,
}

/// One write in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlWrite {
    /// Full `"Component.Control"` name; surrounding whitespace is trimmed
    pub name: String,
    /// Requested value, before validation and coercion
    pub value: ControlValue,
    /// Requested ramp time in seconds, forwarded to the engine as-is
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ramp: Option<f64>,
}

/// Per-item outcome of a batch write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WriteResult {
    pub fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Engine status payload
///
/// Wire casing is part of the external contract, so the struct serializes in
/// PascalCase. `Status.Get` always succeeds; while disconnected the bridge
/// answers with the structured [`EngineStatus::disconnected`] payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EngineStatus {
    pub platform: String,
    pub state: String,
    pub design_name: String,
    pub design_code: String,
    pub is_redundant: bool,
    pub is_emulator: bool,
    pub status: StatusCode,
}

/// Status code and human-readable form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusCode {
    pub code: i64,
    pub string: String,
}

impl EngineStatus {
    /// The structured payload returned while no engine is reachable
    pub fn disconnected() -> Self {
        Self {
            platform: "Unknown".to_string(),
            state: "Disconnected".to_string(),
            design_name: String::new(),
            design_code: String::new(),
            is_redundant: false,
            is_emulator: false,
            status: StatusCode {
                code: 5,
                string: "Not connected to Q-SYS Core".to_string(),
            },
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state != "Disconnected"
    }
}

/// Typed control-plane interface over the engine
#[async_trait]
pub trait ControlSystem: Send + Sync {
    /// List all components in the running design
    async fn list_components(&self) -> ClResult<Vec<ComponentInfo>>;

    /// List all controls of one component
    async fn list_controls(&self, component: &str) -> ClResult<ComponentControls>;

    /// Read specific controls of one component
    async fn get_component_controls(
        &self,
        component: &str,
        controls: &[String],
    ) -> ClResult<ComponentControls>;

    /// Flat list of every control across all components
    async fn get_all_controls(&self) -> ClResult<Vec<ControlInfo>>;

    /// Read arbitrary controls by full name
    async fn get_controls(&self, names: &[String]) -> ClResult<Vec<ControlReading>>;

    /// Write arbitrary controls; per-item outcomes, never all-or-nothing
    async fn set_controls(
        &self,
        writes: &[ControlWrite],
        validate: bool,
    ) -> ClResult<Vec<WriteResult>>;

    /// Batch write to one component
    async fn set_component_controls(
        &self,
        component: &str,
        writes: &[ControlWrite],
    ) -> ClResult<Vec<WriteResult>>;

    /// Engine status; succeeds even while disconnected
    async fn get_status(&self) -> ClResult<EngineStatus>;
}

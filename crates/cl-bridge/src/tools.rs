//! Tool surface
//!
//! Typed handlers for the client-facing tools. Every handler returns the
//! canonical envelope `{content: [{type: "text", text: "<json>"}], isError?}`
//! with a JSON body, never free text. The RPC transport that carries these
//! is wired outside the bridge.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use cl_cache::{EventCacheManager, EventQuery};
use cl_core::{BridgeConfig, ClError, ControlSystem, ControlValue, ControlWrite, GroupPriority};
use cl_poller::PollerEngine;

/// One content item of a tool response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// Canonical tool response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    /// Success envelope wrapping a JSON payload
    pub fn json<T: Serialize>(payload: &T) -> ToolResult {
        let text = serde_json::to_string(payload)
            .unwrap_or_else(|e| format!("{{\"error\":\"serialization failed: {e}\"}}"));
        ToolResult {
            content: vec![ToolContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error: None,
        }
    }

    /// Error envelope with an optional remediation hint
    pub fn error(message: impl Into<String>, hint: Option<&str>) -> ToolResult {
        let message = message.into();
        let body = match hint {
            Some(hint) => json!({ "error": message, "hint": hint }),
            None => json!({ "error": message }),
        };
        ToolResult {
            content: vec![ToolContent {
                content_type: "text".to_string(),
                text: body.to_string(),
            }],
            is_error: Some(true),
        }
    }

    /// Map a bridge error, attaching remediation hints where they help
    pub fn from_error(error: &ClError) -> ToolResult {
        match error {
            ClError::NotConnected => ToolResult::error(
                error.to_string(),
                Some("Verify engine.host and engine.port and that the engine is reachable"),
            ),
            _ => ToolResult::error(error.to_string(), None),
        }
    }

    /// Body of the first content item
    pub fn text(&self) -> &str {
        self.content.first().map(|c| c.text.as_str()).unwrap_or("")
    }

    pub fn is_error(&self) -> bool {
        self.is_error == Some(true)
    }

    /// Parse the body back into JSON, for tests and relays
    pub fn body(&self) -> Value {
        serde_json::from_str(self.text()).unwrap_or(Value::Null)
    }
}

// ============ Tool argument shapes ============

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListComponentsArgs {
    /// Regex applied to component names
    pub filter: Option<String>,
    pub include_properties: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListControlsArgs {
    pub component: Option<String>,
    /// Keyword filter: "gain", "mute", "input_select", ...
    pub control_type: Option<String>,
    pub include_metadata: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetControlValuesArgs {
    pub controls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetControlItem {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub ramp: Option<f64>,
}

fn default_validate() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetControlValuesArgs {
    pub controls: Vec<SetControlItem>,
    #[serde(default = "default_validate")]
    pub validate: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryCoreStatusArgs {
    pub include_details: bool,
    pub include_network_info: bool,
    pub include_performance: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupIdArgs {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupControlsArgs {
    pub id: String,
    pub controls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoPollArgs {
    pub id: String,
    pub enabled: bool,
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPriorityArgs {
    pub id: String,
    pub priority: GroupPriority,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatisticsArgs {
    pub group_id: Option<String>,
}

// ============ Tool surface ============

/// The client-facing tools over one wired bridge
pub struct ToolSurface {
    system: Arc<dyn ControlSystem>,
    poller: Arc<PollerEngine>,
    cache: Arc<EventCacheManager>,
    config: Arc<BridgeConfig>,
}

impl ToolSurface {
    pub fn new(
        system: Arc<dyn ControlSystem>,
        poller: Arc<PollerEngine>,
        cache: Arc<EventCacheManager>,
        config: Arc<BridgeConfig>,
    ) -> Self {
        Self {
            system,
            poller,
            cache,
            config,
        }
    }

    /// `list_components`
    pub async fn list_components(&self, args: ListComponentsArgs) -> ToolResult {
        let filter = match args.filter.as_deref().map(Regex::new) {
            Some(Ok(re)) => Some(re),
            Some(Err(e)) => return ToolResult::error(format!("Invalid filter regex: {e}"), None),
            None => None,
        };

        let components = match self.system.list_components().await {
            Ok(components) => components,
            Err(e) => return ToolResult::from_error(&e),
        };

        let out: Vec<Value> = components
            .iter()
            .filter(|c| filter.as_ref().is_none_or(|re| re.is_match(&c.name)))
            .map(|c| {
                let mut entry = json!({ "name": c.name, "type": c.component_type });
                if args.include_properties {
                    entry["properties"] = json!(c.properties);
                }
                entry
            })
            .collect();
        ToolResult::json(&out)
    }

    /// `list_controls`
    pub async fn list_controls(&self, args: ListControlsArgs) -> ToolResult {
        let controls = match &args.component {
            Some(component) => match self.system.list_controls(component).await {
                Ok(result) => result.controls,
                Err(e) => return ToolResult::from_error(&e),
            },
            None => match self.system.get_all_controls().await {
                Ok(controls) => controls,
                Err(e) => return ToolResult::from_error(&e),
            },
        };

        let keyword = args.control_type.as_deref().map(|k| k.to_lowercase());
        let out: Vec<Value> = controls
            .iter()
            .filter(|c| match &keyword {
                Some(keyword) => matches_control_type(&c.name, keyword),
                None => true,
            })
            .map(|c| {
                let mut entry = json!({
                    "name": c.full_name(),
                    "component": c.component,
                    "type": c.meta.control_type,
                    "value": c.value,
                    "string": c.string,
                });
                if args.include_metadata {
                    entry["metadata"] = json!({
                        "min": c.meta.min,
                        "max": c.meta.max,
                        "maxLength": c.meta.max_length,
                        "position": c.meta.position,
                    });
                }
                entry
            })
            .collect();
        ToolResult::json(&out)
    }

    /// `get_control_values`
    pub async fn get_control_values(&self, args: GetControlValuesArgs) -> ToolResult {
        match self.system.get_controls(&args.controls).await {
            Ok(readings) => ToolResult::json(&readings),
            Err(e) => ToolResult::from_error(&e),
        }
    }

    /// `set_control_values`
    pub async fn set_control_values(&self, args: SetControlValuesArgs) -> ToolResult {
        let mut results: Vec<Option<Value>> = vec![None; args.controls.len()];
        let mut writes = Vec::new();
        let mut positions = Vec::new();

        for (i, item) in args.controls.iter().enumerate() {
            match ControlValue::from_json(&item.value) {
                Some(value) => {
                    writes.push(ControlWrite {
                        name: item.name.clone(),
                        value,
                        ramp: item.ramp,
                    });
                    positions.push(i);
                }
                None => {
                    results[i] = Some(json!({
                        "name": item.name,
                        "success": false,
                        "error": "Value must be a number, boolean, or string",
                    }));
                }
            }
        }

        if !writes.is_empty() {
            let outcomes = match self.system.set_controls(&writes, args.validate).await {
                Ok(outcomes) => outcomes,
                Err(e) => return ToolResult::from_error(&e),
            };
            for (slot, outcome) in positions.iter().zip(outcomes.iter()) {
                results[*slot] = Some(json!(outcome));
            }
        }

        let out: Vec<Value> = results.into_iter().flatten().collect();
        ToolResult::json(&out)
    }

    /// `query_core_status`; succeeds even while disconnected
    pub async fn query_core_status(&self, args: QueryCoreStatusArgs) -> ToolResult {
        let status = match self.system.get_status().await {
            Ok(status) => status,
            Err(e) => return ToolResult::from_error(&e),
        };

        let mut body = serde_json::to_value(&status).unwrap_or(Value::Null);
        if args.include_network_info {
            body["Network"] = json!({
                "Host": self.config.engine.host,
                "Port": self.config.engine.port,
                "Secure": self.config.engine.secure,
            });
        }
        if args.include_performance {
            let stats = self.cache.get_statistics(None);
            body["Performance"] = json!(stats.performance);
        }
        if args.include_details {
            body["Health"] = json!(self.cache.get_health_status());
        }
        ToolResult::json(&body)
    }

    /// `create_change_group`
    pub fn create_change_group(&self, args: GroupIdArgs) -> ToolResult {
        match self.poller.create(&args.id) {
            Ok(()) => ToolResult::json(&json!({ "id": args.id, "created": true })),
            Err(e) => ToolResult::from_error(&e),
        }
    }

    /// `add_controls_to_change_group`
    pub fn add_controls_to_change_group(&self, args: GroupControlsArgs) -> ToolResult {
        match self.poller.add_controls(&args.id, &args.controls) {
            Ok(added) => ToolResult::json(&json!({ "id": args.id, "added": added })),
            Err(e) => ToolResult::from_error(&e),
        }
    }

    /// `set_change_group_auto_poll`
    pub fn set_change_group_auto_poll(&self, args: AutoPollArgs) -> ToolResult {
        match self
            .poller
            .set_auto_poll(&args.id, args.enabled, args.interval_ms)
        {
            Ok(()) => {
                let info = self.poller.group_info(&args.id).ok();
                ToolResult::json(&json!({
                    "id": args.id,
                    "enabled": args.enabled,
                    "intervalMs": info.map(|i| i.interval_ms),
                }))
            }
            Err(e) => ToolResult::from_error(&e),
        }
    }

    /// `poll_change_group`
    pub async fn poll_change_group(&self, args: GroupIdArgs) -> ToolResult {
        match self.poller.poll_once(&args.id).await {
            Ok(set) => ToolResult::json(&set),
            Err(e) => ToolResult::from_error(&e),
        }
    }

    /// `destroy_change_group`
    pub fn destroy_change_group(&self, args: GroupIdArgs) -> ToolResult {
        self.poller.destroy(&args.id);
        ToolResult::json(&json!({ "id": args.id, "destroyed": true }))
    }

    /// `list_change_groups`
    pub fn list_change_groups(&self) -> ToolResult {
        ToolResult::json(&self.poller.list())
    }

    /// `set_change_group_priority`
    pub fn set_change_group_priority(&self, args: GroupPriorityArgs) -> ToolResult {
        self.cache.set_group_priority(&args.id, args.priority);
        ToolResult::json(&json!({ "id": args.id, "priority": args.priority }))
    }

    /// `query_change_events`
    pub fn query_change_events(&self, query: EventQuery) -> ToolResult {
        ToolResult::json(&self.cache.query(&query))
    }

    /// `get_event_statistics`
    pub fn get_event_statistics(&self, args: StatisticsArgs) -> ToolResult {
        ToolResult::json(&self.cache.get_statistics(args.group_id.as_deref()))
    }

    /// `get_cache_health`
    pub fn get_cache_health(&self) -> ToolResult {
        ToolResult::json(&self.cache.get_health_status())
    }
}

/// Keyword match for control-type filtering
///
/// The engine does not report semantic types, so listing tools classify by
/// conventional control names.
fn matches_control_type(name: &str, keyword: &str) -> bool {
    let lower = name.to_lowercase();
    match keyword {
        "gain" => lower.contains("gain") || lower.contains("level") || lower.contains("volume"),
        "mute" => lower.contains("mute"),
        "input_select" => lower.contains("select") || lower.contains("input"),
        other => lower.contains(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let ok = ToolResult::json(&json!({ "a": 1 }));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        assert!(value.get("isError").is_none());
        assert_eq!(ok.body()["a"], 1);

        let err = ToolResult::error("boom", Some("try again"));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["isError"], true);
        assert_eq!(err.body()["error"], "boom");
        assert_eq!(err.body()["hint"], "try again");
    }

    #[test]
    fn test_not_connected_gets_hint() {
        let result = ToolResult::from_error(&ClError::NotConnected);
        assert!(result.is_error());
        assert!(result.body()["hint"].as_str().unwrap().contains("engine.host"));
    }

    #[test]
    fn test_control_type_keywords() {
        assert!(matches_control_type("Main.gain", "gain"));
        assert!(matches_control_type("Meter.Level", "gain"));
        assert!(matches_control_type("Main.mute", "mute"));
        assert!(matches_control_type("Router.input.1.select", "input_select"));
        assert!(!matches_control_type("Main.gain", "mute"));
        assert!(matches_control_type("Comp.threshold", "threshold"));
    }

    #[test]
    fn test_args_accept_camel_case() {
        let args: AutoPollArgs =
            serde_json::from_value(json!({ "id": "g", "enabled": true, "intervalMs": 30 }))
                .unwrap();
        assert_eq!(args.interval_ms, Some(30));

        let args: SetControlValuesArgs = serde_json::from_value(json!({
            "controls": [{ "name": "A.x", "value": 1.0, "ramp": 0.5 }]
        }))
        .unwrap();
        assert!(args.validate, "validate defaults to true");
        assert_eq!(args.controls[0].ramp, Some(0.5));
    }
}

//! Simulated engine core
//!
//! In-memory implementation of [`EngineSdk`] with a component/control tree,
//! connection-event injection, and failure injection. Unit and scenario tests
//! run the whole bridge against this instead of a live core.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::sync::broadcast;

use cl_core::{ControlMeta, ControlValue, EngineStatus};

use crate::protocol::{
    Method, WireComponent, WireComponentControls, WireControl, WireProperty, WireSetItem,
    WireSetResult,
};
use crate::sdk::{ConnectionState, EngineError, EngineResult, EngineSdk, SdkEvent};

/// One simulated control
#[derive(Debug, Clone)]
struct SimControl {
    meta: ControlMeta,
    value: ControlValue,
}

/// One simulated component
#[derive(Debug, Clone, Default)]
struct SimComponent {
    component_type: String,
    properties: Vec<(String, String)>,
    /// Insertion order matters for discovery listings
    order: Vec<String>,
    controls: HashMap<String, SimControl>,
}

struct SimInner {
    components: RwLock<BTreeMap<String, SimComponent>>,
    state: RwLock<ConnectionState>,
    status: RwLock<EngineStatus>,
    events_tx: broadcast::Sender<SdkEvent>,
    /// Pending injected failures, consumed one per command
    fail_plan: Mutex<VecDeque<String>>,
    /// Per-method call counters
    calls: Mutex<HashMap<String, u64>>,
}

/// Simulated engine
#[derive(Clone)]
pub struct SimEngine {
    inner: Arc<SimInner>,
}

impl SimEngine {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(64);
        let status = EngineStatus {
            platform: "Core 510i".to_string(),
            state: "Active".to_string(),
            design_name: "SimDesign".to_string(),
            design_code: "sim".to_string(),
            is_redundant: false,
            is_emulator: true,
            status: cl_core::StatusCode {
                code: 0,
                string: "OK".to_string(),
            },
        };

        Self {
            inner: Arc::new(SimInner {
                components: RwLock::new(BTreeMap::new()),
                state: RwLock::new(ConnectionState::Initializing),
                status: RwLock::new(status),
                events_tx,
                fail_plan: Mutex::new(VecDeque::new()),
                calls: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Add a component to the design
    pub fn with_component(self, name: &str, component_type: &str) -> Self {
        self.inner.components.write().insert(
            name.to_string(),
            SimComponent {
                component_type: component_type.to_string(),
                ..Default::default()
            },
        );
        self
    }

    /// Add a control with metadata and an initial value
    pub fn with_control(
        self,
        component: &str,
        control: &str,
        meta: ControlMeta,
        initial: ControlValue,
    ) -> Self {
        let mut components = self.inner.components.write();
        let entry = components.entry(component.to_string()).or_default();
        if !entry.controls.contains_key(control) {
            entry.order.push(control.to_string());
        }
        entry.controls.insert(
            control.to_string(),
            SimControl {
                meta,
                value: initial,
            },
        );
        drop(components);
        self
    }

    /// Set a design-time property on a component
    pub fn with_property(self, component: &str, name: &str, value: &str) -> Self {
        let mut components = self.inner.components.write();
        let entry = components.entry(component.to_string()).or_default();
        entry.properties.push((name.to_string(), value.to_string()));
        drop(components);
        self
    }

    /// Drive a control value directly, as the running design would
    pub fn set_value(&self, full_name: &str, value: ControlValue) {
        let Some((component, control)) = full_name.split_once('.') else {
            return;
        };
        let mut components = self.inner.components.write();
        if let Some(c) = components.get_mut(component)
            && let Some(ctl) = c.controls.get_mut(control)
        {
            ctl.value = value;
        }
    }

    /// Read a control value back, for assertions
    pub fn value_of(&self, full_name: &str) -> Option<ControlValue> {
        let (component, control) = full_name.split_once('.')?;
        self.inner
            .components
            .read()
            .get(component)?
            .controls
            .get(control)
            .map(|c| c.value.clone())
    }

    /// Queue transient failures for the next `n` commands
    pub fn fail_next_commands(&self, n: usize, message: &str) {
        let mut plan = self.inner.fail_plan.lock();
        for _ in 0..n {
            plan.push_back(message.to_string());
        }
    }

    /// Times a wire method has been called
    pub fn calls(&self, method: Method) -> u64 {
        self.inner
            .calls
            .lock()
            .get(method.as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Drop the connection and notify subscribers
    pub fn simulate_drop(&self, reason: &str) {
        *self.inner.state.write() = ConnectionState::Disconnected;
        let _ = self.inner.events_tx.send(SdkEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Restore the connection with an explicit downtime report
    pub fn simulate_restore(&self, downtime_ms: u64, requires_cache_invalidation: bool) {
        *self.inner.state.write() = ConnectionState::Connected;
        let _ = self.inner.events_tx.send(SdkEvent::Connected {
            requires_cache_invalidation,
            downtime_ms,
        });
    }

    fn wire_control(name: &str, component: Option<&str>, ctl: &SimControl) -> WireControl {
        WireControl {
            name: name.to_string(),
            component: component.map(|c| c.to_string()),
            control_type: Some(type_name(&ctl.meta).to_string()),
            value: ctl.value.to_json(),
            string: ctl.value.display_string(),
            position: ctl.meta.position,
            value_min: ctl.meta.min,
            value_max: ctl.meta.max,
            max_length: ctl.meta.max_length,
        }
    }

    fn get_components(&self) -> Value {
        let components = self.inner.components.read();
        let list: Vec<WireComponent> = components
            .iter()
            .map(|(name, c)| WireComponent {
                name: name.clone(),
                component_type: c.component_type.clone(),
                properties: c
                    .properties
                    .iter()
                    .map(|(n, v)| WireProperty {
                        name: n.clone(),
                        value: v.clone(),
                    })
                    .collect(),
            })
            .collect();
        json!(list)
    }

    fn get_controls(&self, component: &str) -> EngineResult<Value> {
        let components = self.inner.components.read();
        let c = components
            .get(component)
            .ok_or_else(|| component_not_found(component))?;
        let controls: Vec<WireControl> = c
            .order
            .iter()
            .filter_map(|name| c.controls.get(name).map(|ctl| Self::wire_control(name, None, ctl)))
            .collect();
        let result = WireComponentControls {
            name: component.to_string(),
            controls,
        };
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }

    fn component_get(&self, component: &str, names: &[String]) -> EngineResult<Value> {
        let components = self.inner.components.read();
        let c = components
            .get(component)
            .ok_or_else(|| component_not_found(component))?;
        let mut controls = Vec::with_capacity(names.len());
        for name in names {
            let ctl = c
                .controls
                .get(name)
                .ok_or_else(|| control_not_found(name))?;
            controls.push(Self::wire_control(name, None, ctl));
        }
        let result = WireComponentControls {
            name: component.to_string(),
            controls,
        };
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }

    fn get_all_controls(&self) -> Value {
        let components = self.inner.components.read();
        let mut out = Vec::new();
        for (comp_name, c) in components.iter() {
            for name in &c.order {
                if let Some(ctl) = c.controls.get(name) {
                    out.push(Self::wire_control(name, Some(comp_name), ctl));
                }
            }
        }
        json!(out)
    }

    fn control_get(&self, names: &[String]) -> EngineResult<Value> {
        let components = self.inner.components.read();
        let mut out = Vec::with_capacity(names.len());
        for full in names {
            let Some((comp, ctl_name)) = full.split_once('.') else {
                return Err(control_not_found(full));
            };
            let ctl = components
                .get(comp)
                .and_then(|c| c.controls.get(ctl_name))
                .ok_or_else(|| control_not_found(full))?;
            out.push(Self::wire_control(full, None, ctl));
        }
        Ok(json!(out))
    }

    fn apply_set(&self, full: &str, value: &Value) -> WireSetResult {
        let Some((comp, ctl_name)) = full.split_once('.') else {
            return WireSetResult::failure(full, format!("Control not found: {full}"));
        };
        let mut components = self.inner.components.write();
        let Some(c) = components.get_mut(comp) else {
            return WireSetResult::failure(full, format!("Component not found: {comp}"));
        };
        let Some(ctl) = c.controls.get_mut(ctl_name) else {
            return WireSetResult::failure(full, format!("Control not found: {full}"));
        };
        match ControlValue::from_json(value) {
            Some(v) => {
                ctl.value = v;
                WireSetResult::success(full)
            }
            None => WireSetResult::failure(full, "Value is not a scalar".to_string()),
        }
    }

    fn set_values(&self, items: &[WireSetItem]) -> Value {
        let results: Vec<WireSetResult> = items
            .iter()
            .map(|item| self.apply_set(&item.name, &item.value))
            .collect();
        json!(results)
    }

    fn component_set(&self, component: &str, items: &[WireSetItem]) -> EngineResult<Value> {
        if !self.inner.components.read().contains_key(component) {
            return Err(component_not_found(component));
        }
        let results: Vec<WireSetResult> = items
            .iter()
            .map(|item| {
                let full = format!("{}.{}", component, item.name);
                let mut r = self.apply_set(&full, &item.value);
                r.name = item.name.clone();
                r
            })
            .collect();
        Ok(json!(results))
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn component_not_found(name: &str) -> EngineError {
    EngineError::Rpc {
        code: 8,
        message: format!("Component not found: {name}"),
    }
}

fn control_not_found(name: &str) -> EngineError {
    EngineError::Rpc {
        code: 9,
        message: format!("Control not found: {name}"),
    }
}

fn type_name(meta: &ControlMeta) -> &'static str {
    use cl_core::ControlType;
    match meta.control_type {
        ControlType::Number => "Number",
        ControlType::Integer => "Integer",
        ControlType::Float => "Float",
        ControlType::Boolean => "Boolean",
        ControlType::Text => "String",
        ControlType::Unknown => "",
    }
}

#[async_trait]
impl EngineSdk for SimEngine {
    async fn connect(&self) -> EngineResult<()> {
        let already = *self.inner.state.read() == ConnectionState::Connected;
        if !already {
            *self.inner.state.write() = ConnectionState::Connected;
            let _ = self.inner.events_tx.send(SdkEvent::Connected {
                requires_cache_invalidation: false,
                downtime_ms: 0,
            });
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.simulate_drop("Disconnected by caller");
    }

    fn is_connected(&self) -> bool {
        *self.inner.state.read() == ConnectionState::Connected
    }

    fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    async fn send_command(&self, method: &str, params: Option<Value>) -> EngineResult<Value> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected);
        }

        *self
            .inner
            .calls
            .lock()
            .entry(method.to_string())
            .or_insert(0) += 1;

        if let Some(message) = self.inner.fail_plan.lock().pop_front() {
            return Err(EngineError::ConnectionFailed(message));
        }

        let method = Method::parse(method)
            .ok_or_else(|| EngineError::Protocol(format!("Unknown method: {method}")))?;
        let params = params.unwrap_or(Value::Null);

        match method {
            Method::GetComponents => Ok(self.get_components()),
            Method::GetControls => {
                let name = param_str(&params, "Name")?;
                self.get_controls(&name)
            }
            Method::ComponentGet => {
                let name = param_str(&params, "Name")?;
                let names = param_control_names(&params)?;
                self.component_get(&name, &names)
            }
            Method::ComponentSet => {
                let name = param_str(&params, "Name")?;
                let items = param_set_items(&params)?;
                self.component_set(&name, &items)
            }
            Method::GetAllControls => Ok(self.get_all_controls()),
            Method::ControlGet => {
                // Both the bare list and the wrapped form are accepted
                let list = match params.get("Controls") {
                    Some(wrapped) => wrapped.clone(),
                    None => params,
                };
                let names: Vec<String> = serde_json::from_value(list)
                    .map_err(|e| EngineError::Protocol(format!("Bad Control.Get params: {e}")))?;
                self.control_get(&names)
            }
            Method::ControlSet => {
                let item: WireSetItem = serde_json::from_value(params)
                    .map_err(|e| EngineError::Protocol(format!("Bad Control.Set params: {e}")))?;
                Ok(self.set_values(std::slice::from_ref(&item)))
            }
            Method::ControlSetValues => {
                let items = param_set_items(&params)?;
                Ok(self.set_values(&items))
            }
            Method::StatusGet => {
                Ok(serde_json::to_value(self.inner.status.read().clone()).unwrap_or(Value::Null))
            }
            Method::NoOp => Ok(json!({})),
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<SdkEvent> {
        self.inner.events_tx.subscribe()
    }
}

fn param_str(params: &Value, key: &str) -> EngineResult<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| EngineError::Protocol(format!("Missing param: {key}")))
}

fn param_control_names(params: &Value) -> EngineResult<Vec<String>> {
    let list = params
        .get("Controls")
        .and_then(|v| v.as_array())
        .ok_or_else(|| EngineError::Protocol("Missing param: Controls".to_string()))?;
    Ok(list
        .iter()
        .filter_map(|item| {
            item.get("Name")
                .and_then(|v| v.as_str())
                .or_else(|| item.as_str())
                .map(|s| s.to_string())
        })
        .collect())
}

fn param_set_items(params: &Value) -> EngineResult<Vec<WireSetItem>> {
    let list = params
        .get("Controls")
        .cloned()
        .ok_or_else(|| EngineError::Protocol("Missing param: Controls".to_string()))?;
    serde_json::from_value(list)
        .map_err(|e| EngineError::Protocol(format!("Bad Controls param: {e}")))
}

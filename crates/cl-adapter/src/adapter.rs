//! Control adapter
//!
//! Implements [`ControlSystem`] over the engine SDK: resolves names through
//! the control index, validates and coerces written values, wraps every
//! command in the retry policy, and keeps `Status.Get` answering while the
//! engine is unreachable.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use cl_core::{
    BridgeConfig, ClError, ClResult, ComponentControls, ComponentInfo, ControlInfo,
    ControlReading, ControlSystem, ControlValue, ControlWrite, EngineStatus, PropertyInfo,
    ValidationConfig, WriteResult,
};
use cl_engine::{
    ConnectionState, EngineSdk, Method, WireComponent, WireComponentControls, WireControl,
    WireSetItem, WireSetResult,
};

use crate::index::{ControlIndex, NameResolution};
use crate::retry::RetryPolicy;
use crate::validate::coerce_value;

/// Message used when a name has no component part
const NAME_FORMAT_HINT: &str = "Expected format: 'ComponentName.controlName'";

/// Stateful facade over the engine SDK
pub struct ControlAdapter {
    sdk: Arc<dyn EngineSdk>,
    index: Arc<ControlIndex>,
    retry: RetryPolicy,
    validation: ValidationConfig,
}

impl ControlAdapter {
    pub fn new(sdk: Arc<dyn EngineSdk>, config: &BridgeConfig) -> Self {
        Self {
            sdk,
            index: Arc::new(ControlIndex::new()),
            retry: RetryPolicy::from_config(&config.adapter),
            validation: config.validation.clone(),
        }
    }

    /// The name index, shared with the reconnect coordinator
    pub fn index(&self) -> Arc<ControlIndex> {
        Arc::clone(&self.index)
    }

    /// Adapter view of the connection lifecycle
    pub fn connection_state(&self) -> ConnectionState {
        self.sdk.state()
    }

    /// Reset the index and adapter-local caches
    ///
    /// Called by the reconnect coordinator after long downtime.
    pub fn clear_all_caches(&self) {
        self.index.invalidate();
    }

    fn guard_connected(&self) -> ClResult<()> {
        if self.sdk.is_connected() {
            Ok(())
        } else {
            Err(ClError::NotConnected)
        }
    }

    /// One engine command with connection guard and retry
    async fn command(&self, method: Method, params: Option<Value>) -> ClResult<Value> {
        self.guard_connected()?;
        let sdk = Arc::clone(&self.sdk);
        self.retry
            .run(method.as_str(), move || {
                let sdk = Arc::clone(&sdk);
                let params = params.clone();
                async move {
                    sdk.send_command(method.as_str(), params)
                        .await
                        .map_err(ClError::from)
                }
            })
            .await
    }

    /// Build the index if it is not built yet
    async fn ensure_index(&self) -> ClResult<()> {
        if self.index.is_built() {
            return Ok(());
        }
        self.fetch_all_controls().await.map(|_| ())
    }

    /// Discovery pass that also rebuilds the index
    async fn fetch_all_controls(&self) -> ClResult<Vec<ControlInfo>> {
        let raw = self.command(Method::GetAllControls, None).await?;
        let wire: Vec<WireControl> = serde_json::from_value(raw)
            .map_err(|e| ClError::Internal(format!("Bad GetAllControls response: {e}")))?;

        let infos: Vec<ControlInfo> = wire
            .iter()
            .map(|c| ControlInfo {
                name: c.name.clone(),
                component: c.component.clone(),
                meta: c.meta(),
                value: c.control_value(),
                string: c.string.clone(),
            })
            .collect();

        self.index.rebuild(&infos);
        Ok(infos)
    }

    fn parse_component_controls(
        raw: Value,
        component: &str,
    ) -> ClResult<ComponentControls> {
        let wire: WireComponentControls = serde_json::from_value(raw)
            .map_err(|e| ClError::Internal(format!("Bad component controls response: {e}")))?;
        Ok(ComponentControls {
            name: wire.name,
            controls: wire
                .controls
                .iter()
                .map(|c| ControlInfo {
                    name: c.name.clone(),
                    component: Some(component.to_string()),
                    meta: c.meta(),
                    value: c.control_value(),
                    string: c.string.clone(),
                })
                .collect(),
        })
    }

    /// Prepare one write: resolve, validate, coerce
    fn prepare_write(
        &self,
        write: &ControlWrite,
        validate: bool,
    ) -> Result<WireSetItem, WriteResult> {
        let name = write.name.trim();
        if name.is_empty() {
            return Err(WriteResult::failed(&write.name, NAME_FORMAT_HINT));
        }

        match self.index.resolve_name(name) {
            NameResolution::Named(token) => Err(WriteResult::failed(token, NAME_FORMAT_HINT)),
            NameResolution::Handle(handle) => {
                let value = if validate {
                    match coerce_value(&handle.meta, &write.value, &self.validation) {
                        Ok(v) => v,
                        Err(message) => return Err(WriteResult::failed(name, message)),
                    }
                } else {
                    write.value.clone()
                };
                Ok(WireSetItem {
                    name: handle.full_name(),
                    value: value.to_json(),
                    ramp: write.ramp,
                })
            }
            NameResolution::Unindexed { component, .. } => {
                if self.index.is_built() && !self.index.has_component(&component) {
                    return Err(WriteResult::failed(
                        name,
                        format!("Component not found: {component}"),
                    ));
                }
                // Component exists but the control is not indexed; let the
                // engine decide so a stale index cannot block writes
                Ok(WireSetItem {
                    name: name.to_string(),
                    value: write.value.to_json(),
                    ramp: write.ramp,
                })
            }
        }
    }

    /// Issue a write command and merge per-item results back in order
    async fn send_writes(
        &self,
        method: Method,
        params: Value,
        results: &mut [Option<WriteResult>],
        positions: &[usize],
        sent: &[WireSetItem],
    ) -> ClResult<()> {
        match self.command(method, Some(params)).await {
            Ok(raw) => {
                let wire: Vec<WireSetResult> = serde_json::from_value(raw)
                    .map_err(|e| ClError::Internal(format!("Bad set response: {e}")))?;
                for (slot, item) in positions.iter().zip(sent.iter()) {
                    let outcome = wire
                        .iter()
                        .find(|r| r.name == item.name)
                        .cloned()
                        .unwrap_or_else(|| WireSetResult::success(&item.name));
                    results[*slot] = Some(if outcome.is_success() {
                        WriteResult::ok(&item.name)
                    } else {
                        WriteResult::failed(
                            &item.name,
                            outcome.error.unwrap_or_else(|| "Write failed".to_string()),
                        )
                    });
                }
                Ok(())
            }
            Err(e) => {
                // The batch never reached the engine; every pending item
                // fails with the same message, siblings keep their outcomes
                let message = e.to_string();
                for (slot, item) in positions.iter().zip(sent.iter()) {
                    results[*slot] = Some(WriteResult::failed(&item.name, message.clone()));
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ControlSystem for ControlAdapter {
    async fn list_components(&self) -> ClResult<Vec<ComponentInfo>> {
        let raw = self.command(Method::GetComponents, None).await?;
        let wire: Vec<WireComponent> = serde_json::from_value(raw)
            .map_err(|e| ClError::Internal(format!("Bad GetComponents response: {e}")))?;
        Ok(wire
            .into_iter()
            .map(|c| ComponentInfo {
                name: c.name,
                component_type: c.component_type,
                properties: c
                    .properties
                    .into_iter()
                    .map(|p| PropertyInfo {
                        name: p.name,
                        value: p.value,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn list_controls(&self, component: &str) -> ClResult<ComponentControls> {
        let raw = self
            .command(Method::GetControls, Some(json!({ "Name": component })))
            .await?;
        Self::parse_component_controls(raw, component)
    }

    async fn get_component_controls(
        &self,
        component: &str,
        controls: &[String],
    ) -> ClResult<ComponentControls> {
        let items: Vec<Value> = controls.iter().map(|c| json!({ "Name": c })).collect();
        let raw = self
            .command(
                Method::ComponentGet,
                Some(json!({ "Name": component, "Controls": items })),
            )
            .await?;
        Self::parse_component_controls(raw, component)
    }

    async fn get_all_controls(&self) -> ClResult<Vec<ControlInfo>> {
        self.guard_connected()?;
        self.fetch_all_controls().await
    }

    async fn get_controls(&self, names: &[String]) -> ClResult<Vec<ControlReading>> {
        self.guard_connected()?;
        if names.is_empty() {
            return Err(ClError::InvalidArgument("Empty control list".to_string()));
        }
        self.ensure_index().await?;

        let mut readings: Vec<Option<ControlReading>> = vec![None; names.len()];
        let mut wanted: Vec<String> = Vec::new();
        let mut positions: Vec<usize> = Vec::new();

        for (i, raw_name) in names.iter().enumerate() {
            let name = raw_name.trim();
            match self.index.resolve_name(name) {
                NameResolution::Named(token) => {
                    // Named controls are not addressable without component
                    // access; report a placeholder instead of failing the batch
                    readings[i] = Some(ControlReading {
                        name: token,
                        value: ControlValue::Number(0.0),
                        string: "N/A".to_string(),
                    });
                }
                NameResolution::Handle(handle) => {
                    wanted.push(handle.full_name());
                    positions.push(i);
                }
                NameResolution::Unindexed { .. } => {
                    return Err(ClError::NotFound(format!("Control not found: {name}")));
                }
            }
        }

        if !wanted.is_empty() {
            let raw = self
                .command(Method::ControlGet, Some(json!(wanted)))
                .await?;
            let wire: Vec<WireControl> = serde_json::from_value(raw)
                .map_err(|e| ClError::Internal(format!("Bad Control.Get response: {e}")))?;

            for (slot, name) in positions.iter().zip(wanted.iter()) {
                let entry = wire.iter().find(|c| &c.name == name);
                readings[*slot] = Some(match entry {
                    Some(c) => ControlReading {
                        name: name.clone(),
                        value: c.control_value(),
                        string: c.string.clone(),
                    },
                    None => ControlReading {
                        name: name.clone(),
                        value: ControlValue::Number(0.0),
                        string: "N/A".to_string(),
                    },
                });
            }
        }

        Ok(readings.into_iter().flatten().collect())
    }

    async fn set_controls(
        &self,
        writes: &[ControlWrite],
        validate: bool,
    ) -> ClResult<Vec<WriteResult>> {
        self.guard_connected()?;
        if writes.is_empty() {
            return Err(ClError::InvalidArgument("Empty write batch".to_string()));
        }
        self.ensure_index().await?;

        let mut results: Vec<Option<WriteResult>> = vec![None; writes.len()];
        let mut sent: Vec<WireSetItem> = Vec::new();
        let mut positions: Vec<usize> = Vec::new();

        for (i, write) in writes.iter().enumerate() {
            match self.prepare_write(write, validate) {
                Ok(item) => {
                    sent.push(item);
                    positions.push(i);
                }
                Err(failure) => results[i] = Some(failure),
            }
        }

        if !sent.is_empty() {
            let params = json!({ "Controls": sent });
            self.send_writes(Method::ControlSetValues, params, &mut results, &positions, &sent)
                .await?;
        }

        Ok(results.into_iter().flatten().collect())
    }

    async fn set_component_controls(
        &self,
        component: &str,
        writes: &[ControlWrite],
    ) -> ClResult<Vec<WriteResult>> {
        self.guard_connected()?;
        if writes.is_empty() {
            return Err(ClError::InvalidArgument("Empty write batch".to_string()));
        }
        self.ensure_index().await?;

        let mut results: Vec<Option<WriteResult>> = vec![None; writes.len()];
        let mut sent: Vec<WireSetItem> = Vec::new();
        let mut positions: Vec<usize> = Vec::new();

        for (i, write) in writes.iter().enumerate() {
            let control = write.name.trim();
            let full = format!("{component}.{control}");
            let value = match self.index.resolve(&full) {
                Some(handle) => match coerce_value(&handle.meta, &write.value, &self.validation) {
                    Ok(v) => v,
                    Err(message) => {
                        results[i] = Some(WriteResult::failed(control, message));
                        continue;
                    }
                },
                None => write.value.clone(),
            };
            sent.push(WireSetItem {
                name: control.to_string(),
                value: value.to_json(),
                ramp: write.ramp,
            });
            positions.push(i);
        }

        if !sent.is_empty() {
            let params = json!({ "Name": component, "Controls": sent });
            self.send_writes(Method::ComponentSet, params, &mut results, &positions, &sent)
                .await?;
        }

        Ok(results.into_iter().flatten().collect())
    }

    async fn get_status(&self) -> ClResult<EngineStatus> {
        if !self.sdk.is_connected() {
            return Ok(EngineStatus::disconnected());
        }

        match self.command(Method::StatusGet, None).await {
            Ok(raw) => serde_json::from_value(raw)
                .map_err(|e| ClError::Internal(format!("Bad Status.Get response: {e}"))),
            Err(ClError::NotConnected) => Ok(EngineStatus::disconnected()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_core::{ControlMeta, ControlType};
    use cl_engine::SimEngine;

    fn test_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.adapter.retry_delay_ms = 1;
        config
    }

    fn sim() -> SimEngine {
        SimEngine::new()
            .with_component("Main", "gain")
            .with_property("Main", "channels", "2")
            .with_control(
                "Main",
                "gain",
                ControlMeta::of_type(ControlType::Float).with_range(-100.0, 20.0),
                ControlValue::Number(-12.0),
            )
            .with_control(
                "Main",
                "mute",
                ControlMeta::of_type(ControlType::Boolean),
                ControlValue::Number(0.0),
            )
            .with_component("AudioMeter", "meter")
            .with_control(
                "AudioMeter",
                "Level",
                ControlMeta::of_type(ControlType::Float),
                ControlValue::Number(-40.0),
            )
    }

    async fn connected_adapter() -> (SimEngine, ControlAdapter) {
        let engine = sim();
        engine.connect().await.unwrap();
        let adapter = ControlAdapter::new(Arc::new(engine.clone()), &test_config());
        (engine, adapter)
    }

    #[tokio::test]
    async fn test_commands_refused_while_disconnected() {
        let engine = sim();
        let adapter = ControlAdapter::new(Arc::new(engine), &test_config());

        let err = adapter.list_components().await.unwrap_err();
        assert!(matches!(err, ClError::NotConnected));

        let err = adapter
            .get_controls(&["Main.gain".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ClError::NotConnected));
    }

    #[tokio::test]
    async fn test_status_get_succeeds_while_disconnected() {
        let engine = sim();
        let adapter = ControlAdapter::new(Arc::new(engine), &test_config());

        let status = adapter.get_status().await.unwrap();
        assert_eq!(status.state, "Disconnected");
        assert_eq!(status.status.code, 5);
    }

    #[tokio::test]
    async fn test_list_components_and_controls() {
        let (_, adapter) = connected_adapter().await;

        let components = adapter.list_components().await.unwrap();
        assert_eq!(components.len(), 2);
        let main = components.iter().find(|c| c.name == "Main").unwrap();
        assert_eq!(main.component_type, "gain");
        assert_eq!(main.properties[0].name, "channels");

        let controls = adapter.list_controls("Main").await.unwrap();
        assert_eq!(controls.controls.len(), 2);
        assert_eq!(controls.controls[0].full_name(), "Main.gain");
    }

    #[tokio::test]
    async fn test_get_controls_batches_and_preserves_order() {
        let (engine, adapter) = connected_adapter().await;

        let names = vec![
            "AudioMeter.Level".to_string(),
            "MasterVolume".to_string(),
            "  Main.gain  ".to_string(),
        ];
        let readings = adapter.get_controls(&names).await.unwrap();

        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].value, ControlValue::Number(-40.0));
        // Named control comes back as a placeholder
        assert_eq!(readings[1].name, "MasterVolume");
        assert_eq!(readings[1].string, "N/A");
        assert_eq!(readings[2].value, ControlValue::Number(-12.0));

        // One discovery pass plus one batched read
        assert_eq!(engine.calls(Method::ControlGet), 1);
    }

    #[tokio::test]
    async fn test_set_controls_validation_scenario() {
        let (engine, adapter) = connected_adapter().await;

        let writes = vec![
            ControlWrite {
                name: "  Main.mute  ".to_string(),
                value: ControlValue::Text("true".to_string()),
                ramp: None,
            },
            ControlWrite {
                name: "FakeComp.fake".to_string(),
                value: ControlValue::Number(0.0),
                ramp: None,
            },
        ];
        let results = adapter.set_controls(&writes, true).await.unwrap();

        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(
            results[1].error.as_deref(),
            Some("Component not found: FakeComp")
        );
        // The boolean was normalized to 1 on the wire
        assert_eq!(engine.value_of("Main.mute"), Some(ControlValue::Number(1.0)));
    }

    #[tokio::test]
    async fn test_set_rejects_out_of_range() {
        let (engine, adapter) = connected_adapter().await;

        let writes = vec![ControlWrite {
            name: "Main.gain".to_string(),
            value: ControlValue::Number(50.0),
            ramp: None,
        }];
        let results = adapter.set_controls(&writes, true).await.unwrap();
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("above maximum"));
        // Value untouched
        assert_eq!(engine.value_of("Main.gain"), Some(ControlValue::Number(-12.0)));
    }

    #[tokio::test]
    async fn test_validation_skippable_per_call() {
        let (engine, adapter) = connected_adapter().await;

        let writes = vec![ControlWrite {
            name: "Main.gain".to_string(),
            value: ControlValue::Number(50.0),
            ramp: None,
        }];
        let results = adapter.set_controls(&writes, false).await.unwrap();
        assert!(results[0].success);
        assert_eq!(engine.value_of("Main.gain"), Some(ControlValue::Number(50.0)));
    }

    #[tokio::test]
    async fn test_single_token_write_names_expected_format() {
        let (_, adapter) = connected_adapter().await;

        let writes = vec![ControlWrite {
            name: "MasterVolume".to_string(),
            value: ControlValue::Number(1.0),
            ramp: None,
        }];
        let results = adapter.set_controls(&writes, true).await.unwrap();
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some(NAME_FORMAT_HINT));
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let (_, adapter) = connected_adapter().await;

        let writes = vec![ControlWrite {
            name: "Main.gain".to_string(),
            value: ControlValue::Number(-6.0),
            ramp: Some(0.5),
        }];
        let results = adapter.set_controls(&writes, true).await.unwrap();
        assert!(results[0].success);

        let readings = adapter
            .get_controls(&["Main.gain".to_string()])
            .await
            .unwrap();
        assert_eq!(readings[0].value, ControlValue::Number(-6.0));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let (engine, adapter) = connected_adapter().await;
        engine.fail_next_commands(2, "connection timeout");

        let components = adapter.list_components().await.unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(engine.calls(Method::GetComponents), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_message() {
        let (engine, adapter) = connected_adapter().await;
        engine.fail_next_commands(5, "connection timeout");

        let err = adapter.list_components().await.unwrap_err();
        assert!(err.to_string().contains("Command failed after 3 attempts"));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let (engine, adapter) = connected_adapter().await;

        let err = adapter.list_controls("FakeComp").await.unwrap_err();
        assert!(matches!(err, ClError::NotFound(_)));
        assert_eq!(engine.calls(Method::GetControls), 1);
    }

    #[tokio::test]
    async fn test_index_invalidation_triggers_rebuild() {
        let (_, adapter) = connected_adapter().await;

        adapter
            .get_controls(&["Main.gain".to_string()])
            .await
            .unwrap();
        let index = adapter.index();
        assert!(index.is_built());
        assert_eq!(index.rebuild_count(), 1);

        adapter.clear_all_caches();
        assert!(!index.is_built());

        // Same controls resolve again after the rebuild
        adapter
            .get_controls(&["Main.gain".to_string()])
            .await
            .unwrap();
        assert_eq!(index.rebuild_count(), 2);
    }

    #[tokio::test]
    async fn test_set_component_controls_batch() {
        let (engine, adapter) = connected_adapter().await;

        let writes = vec![
            ControlWrite {
                name: "gain".to_string(),
                value: ControlValue::Number(-3.0),
                ramp: None,
            },
            ControlWrite {
                name: "bogus".to_string(),
                value: ControlValue::Number(1.0),
                ramp: None,
            },
        ];
        let results = adapter.set_component_controls("Main", &writes).await.unwrap();
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(engine.value_of("Main.gain"), Some(ControlValue::Number(-3.0)));
    }

    #[tokio::test]
    async fn test_empty_batch_is_invalid_argument() {
        let (_, adapter) = connected_adapter().await;
        let err = adapter.set_controls(&[], true).await.unwrap_err();
        assert!(matches!(err, ClError::InvalidArgument(_)));
    }
}

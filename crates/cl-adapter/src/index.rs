//! Control name index
//!
//! Flat map from full `"Component.Control"` names to handles, built lazily
//! from one discovery pass and invalidated on topology change or long
//! disconnect. Rebuilds swap in a fresh map under a short write lock so
//! readers never see a half-built index.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use cl_core::{ControlInfo, ControlMeta};

/// Resolved reference to one control
#[derive(Debug, Clone, PartialEq)]
pub struct ControlHandle {
    /// Owning component name
    pub component: String,
    /// Control name within the component
    pub control: String,
    /// Metadata captured at index build time
    pub meta: ControlMeta,
}

impl ControlHandle {
    /// Full name as stored in the index
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.component, self.control)
    }
}

/// How a requested name resolved
#[derive(Debug, Clone, PartialEq)]
pub enum NameResolution {
    /// A known (component, control) pair
    Handle(Arc<ControlHandle>),
    /// A plausible split that is not in the index; first segment is the
    /// component guess
    Unindexed { component: String, control: String },
    /// Single token with no dot; treated as a named control
    Named(String),
}

#[derive(Default)]
struct IndexMaps {
    by_name: HashMap<String, Arc<ControlHandle>>,
    /// Component name -> control count, for split-point resolution
    components: HashMap<String, usize>,
}

/// Lazily built control index
pub struct ControlIndex {
    maps: RwLock<IndexMaps>,
    built: AtomicBool,
    rebuilds: AtomicU64,
}

impl ControlIndex {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(IndexMaps::default()),
            built: AtomicBool::new(false),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Whether a build has completed since the last invalidation
    pub fn is_built(&self) -> bool {
        self.built.load(Ordering::Acquire)
    }

    /// Number of indexed controls
    pub fn len(&self) -> usize {
        self.maps.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completed rebuilds since creation
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    /// Replace the index contents from one discovery pass
    pub fn rebuild(&self, controls: &[ControlInfo]) {
        let mut maps = IndexMaps {
            by_name: HashMap::with_capacity(controls.len()),
            components: HashMap::new(),
        };

        for info in controls {
            let Some(component) = info.component.as_deref() else {
                continue;
            };
            let handle = Arc::new(ControlHandle {
                component: component.to_string(),
                control: info.name.clone(),
                meta: info.meta.clone(),
            });
            maps.by_name.insert(handle.full_name(), handle);
            *maps.components.entry(component.to_string()).or_insert(0) += 1;
        }

        let count = maps.by_name.len();
        *self.maps.write() = maps;
        self.built.store(true, Ordering::Release);
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        log::debug!("[Adapter] Control index rebuilt: {count} controls");
    }

    /// Drop the index; the next use triggers a rebuild
    pub fn invalidate(&self) {
        self.built.store(false, Ordering::Release);
        *self.maps.write() = IndexMaps::default();
        log::info!("[Adapter] Control index invalidated");
    }

    /// Exact lookup by full name
    pub fn resolve(&self, full_name: &str) -> Option<Arc<ControlHandle>> {
        self.maps.read().by_name.get(full_name).cloned()
    }

    /// Whether a component name is known
    pub fn has_component(&self, component: &str) -> bool {
        self.maps.read().components.contains_key(component)
    }

    /// Resolve a requested name, handling multi-dot names and named controls
    ///
    /// Standard form is `Component.Control`. When the exact name misses and
    /// the name has several dots, every split point is tried left-to-right
    /// against the known components. Names without a dot resolve as named
    /// controls.
    pub fn resolve_name(&self, name: &str) -> NameResolution {
        if !name.contains('.') {
            return NameResolution::Named(name.to_string());
        }

        if let Some(handle) = self.resolve(name) {
            return NameResolution::Handle(handle);
        }

        let maps = self.maps.read();
        let mut split_points = name.match_indices('.').map(|(i, _)| i);
        // Left-to-right: the first split whose component half exists wins
        if let Some(i) = split_points.find(|&i| maps.components.contains_key(&name[..i])) {
            return NameResolution::Unindexed {
                component: name[..i].to_string(),
                control: name[i + 1..].to_string(),
            };
        }

        // No known component: fall back to the first-dot split
        let i = name.find('.').unwrap_or(0);
        NameResolution::Unindexed {
            component: name[..i].to_string(),
            control: name[i + 1..].to_string(),
        }
    }
}

impl Default for ControlIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_core::{ControlType, ControlValue};

    fn info(component: &str, name: &str) -> ControlInfo {
        ControlInfo {
            name: name.to_string(),
            component: Some(component.to_string()),
            meta: ControlMeta::of_type(ControlType::Float),
            value: ControlValue::Number(0.0),
            string: "0".to_string(),
        }
    }

    fn built_index() -> ControlIndex {
        let index = ControlIndex::new();
        index.rebuild(&[
            info("Main", "gain"),
            info("Main", "mute"),
            info("Main.Output", "level"),
            info("Matrix", "input.1.select"),
        ]);
        index
    }

    #[test]
    fn test_lazy_then_built() {
        let index = ControlIndex::new();
        assert!(!index.is_built());
        assert!(index.resolve("Main.gain").is_none());

        index.rebuild(&[info("Main", "gain")]);
        assert!(index.is_built());
        assert_eq!(index.len(), 1);
        assert_eq!(index.rebuild_count(), 1);
    }

    #[test]
    fn test_invalidate_clears() {
        let index = built_index();
        index.invalidate();
        assert!(!index.is_built());
        assert!(index.is_empty());
        assert!(index.resolve("Main.gain").is_none());
    }

    #[test]
    fn test_exact_resolution() {
        let index = built_index();
        let handle = index.resolve("Main.gain").unwrap();
        assert_eq!(handle.component, "Main");
        assert_eq!(handle.control, "gain");
    }

    #[test]
    fn test_multi_dot_resolution() {
        let index = built_index();
        // "Main.Output.level" exists under component "Main.Output"
        match index.resolve_name("Main.Output.level") {
            NameResolution::Handle(h) => {
                assert_eq!(h.component, "Main.Output");
                assert_eq!(h.control, "level");
            }
            other => panic!("unexpected: {other:?}"),
        }
        // "Matrix.input.1.select" is a control with dots in its name
        match index.resolve_name("Matrix.input.1.select") {
            NameResolution::Handle(h) => {
                assert_eq!(h.component, "Matrix");
                assert_eq!(h.control, "input.1.select");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unindexed_split_prefers_known_component() {
        let index = built_index();
        match index.resolve_name("Main.unknownControl") {
            NameResolution::Unindexed { component, control } => {
                assert_eq!(component, "Main");
                assert_eq!(control, "unknownControl");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_single_token_is_named_control() {
        let index = built_index();
        assert_eq!(
            index.resolve_name("MasterVolume"),
            NameResolution::Named("MasterVolume".to_string())
        );
    }

    #[test]
    fn test_rebuild_swaps_contents() {
        let index = built_index();
        index.rebuild(&[info("Other", "x")]);
        assert!(index.resolve("Main.gain").is_none());
        assert!(index.resolve("Other.x").is_some());
        assert_eq!(index.rebuild_count(), 2);
    }
}

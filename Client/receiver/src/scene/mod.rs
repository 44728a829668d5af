//! Session scene: registers decoded organs by label and links them into a
//! tree according to the configured hierarchy rules.
//!
//! Each arriving entity performs two symmetric lookups per rule: "am I a
//! configured child of someone already present?" and "am I the configured
//! parent of someone already present?". This makes the final tree
//! independent of arrival order.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::DuplicateLabelPolicy;
use crate::error::SceneError;
use crate::types::{OrganMesh, SceneEvent};

pub mod hierarchy;
pub mod palette;

pub use hierarchy::{HierarchyRule, HierarchyRules};

#[derive(Clone, Debug)]
pub struct OrganEntity {
    pub mesh: Arc<OrganMesh>,
    /// Label of the parent entity. A relation only, the parent is not owned.
    pub parent: Option<i32>,
    pub color: [f32; 4],
}

pub type OrganRegistry = HashMap<i32, OrganEntity>;

pub struct SceneAssembler {
    registry: OrganRegistry,
    rules: HierarchyRules,
    duplicate_policy: DuplicateLabelPolicy,
}

impl SceneAssembler {
    pub fn new(rules: HierarchyRules, duplicate_policy: DuplicateLabelPolicy) -> Self {
        Self {
            registry: HashMap::new(),
            rules,
            duplicate_policy,
        }
    }

    /// Registers a decoded mesh and returns the scene changes it caused, in
    /// the order the host has to apply them.
    pub fn register(&mut self, mesh: OrganMesh) -> Result<Vec<SceneEvent>, SceneError> {
        let label = mesh.label;
        let mut events = Vec::new();

        if self.registry.contains_key(&label) {
            match self.duplicate_policy {
                DuplicateLabelPolicy::Reject => return Err(SceneError::DuplicateLabel(label)),
                DuplicateLabelPolicy::Replace => {
                    warn!("Label {} arrived twice, replacing the previous entity", label);
                    self.remove(label, &mut events);
                }
            }
        }

        let mesh = Arc::new(mesh);
        let color = palette::color_for_label(label);
        self.registry.insert(
            label,
            OrganEntity {
                mesh: mesh.clone(),
                parent: None,
                color,
            },
        );
        events.push(SceneEvent::OrganCreated { mesh, color });

        self.resolve_for(label, &mut events);
        Ok(events)
    }

    fn resolve_for(&mut self, label: i32, events: &mut Vec<SceneEvent>) {
        let rules: Vec<HierarchyRule> = self.rules.iter().copied().collect();
        for rule in rules {
            if label == rule.child && self.registry.contains_key(&rule.parent) {
                self.attach(rule.child, rule.parent, events);
            }
            if label == rule.parent && self.registry.contains_key(&rule.child) {
                self.attach(rule.child, rule.parent, events);
            }
        }
    }

    fn attach(&mut self, child: i32, parent: i32, events: &mut Vec<SceneEvent>) {
        let Some(entity) = self.registry.get_mut(&child) else {
            return;
        };
        if entity.parent == Some(parent) {
            return;
        }
        entity.parent = Some(parent);
        info!("Attached label {} under label {}", child, parent);
        events.push(SceneEvent::Reparented { child, parent });
    }

    fn remove(&mut self, label: i32, events: &mut Vec<SceneEvent>) {
        if self.registry.remove(&label).is_none() {
            return;
        }
        events.push(SceneEvent::OrganRemoved { label });

        let mut orphans: Vec<i32> = self
            .registry
            .iter()
            .filter(|(_, entity)| entity.parent == Some(label))
            .map(|(&child, _)| child)
            .collect();
        orphans.sort_unstable();
        for child in orphans {
            if let Some(entity) = self.registry.get_mut(&child) {
                entity.parent = None;
            }
            debug!("Detached label {} from removed label {}", child, label);
            events.push(SceneEvent::Detached { child });
        }
    }

    pub fn get(&self, label: i32) -> Option<&OrganEntity> {
        self.registry.get(&label)
    }

    pub fn parent_of(&self, label: i32) -> Option<i32> {
        self.registry.get(&label).and_then(|entity| entity.parent)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::ValueEnum;
use shared_utils::wire::{DEFAULT_PORT, MAX_JSON_BYTES, MAX_MESH_COUNT, MAX_OBJ_BYTES};

use crate::error::ConfigError;
use crate::scene::HierarchyRules;

/// What happens when a session delivers a label that is already registered.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, ValueEnum)]
pub enum DuplicateLabelPolicy {
    /// Drop the old entity, detach its children and register the new one.
    #[default]
    Replace,
    /// Keep the old entity and skip the new mesh.
    Reject,
}

/// Upper bounds checked against declared lengths before allocating.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FrameLimits {
    pub max_json_bytes: usize,
    pub max_mesh_count: usize,
    pub max_obj_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_json_bytes: MAX_JSON_BYTES,
            max_mesh_count: MAX_MESH_COUNT,
            max_obj_bytes: MAX_OBJ_BYTES,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReceiverConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// Uniform scale applied to every OBJ vertex (producer units to scene units).
    pub unit_scale: f32,
    pub hierarchy: HierarchyRules,
    pub duplicate_policy: DuplicateLabelPolicy,
    pub limits: FrameLimits,
    /// Scene events buffered before a session has to wait for the host.
    pub event_capacity: usize,
    pub metrics_port: Option<u16>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            unit_scale: 0.01,
            hierarchy: HierarchyRules::default(),
            duplicate_policy: DuplicateLabelPolicy::default(),
            limits: FrameLimits::default(),
            event_capacity: 64,
            metrics_port: None,
        }
    }
}

impl ReceiverConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.unit_scale.is_finite() || self.unit_scale == 0.0 {
            return Err(ConfigError::InvalidScale(self.unit_scale));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroLimit("event capacity"));
        }
        if self.limits.max_mesh_count == 0 {
            return Err(ConfigError::ZeroLimit("mesh count limit"));
        }
        if self.limits.max_obj_bytes == 0 {
            return Err(ConfigError::ZeroLimit("OBJ size limit"));
        }
        Ok(())
    }
}

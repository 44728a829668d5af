// File: args.rs
use std::net::IpAddr;

use clap::{Parser, ValueEnum};
use shared_utils::wire::{DEFAULT_PORT, MAX_JSON_BYTES, MAX_MESH_COUNT, MAX_OBJ_BYTES};
use tracing::level_filters::LevelFilter;

use crate::config::{DuplicateLabelPolicy, FrameLimits, ReceiverConfig};
use crate::error::ConfigError;
use crate::scene::{HierarchyRule, HierarchyRules};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogLevel {
    Trace = 0, // Designates very fine-grained informational events, extremely verbose.
    Debug = 1, // Designates fine-grained informational events.
    Info = 2, // Designates informational messages.
    Warn = 3, // Designates hazardous situations.
    Error = 4, // Designates very serious errors.
}

#[derive(Parser, Debug)]
#[command(version, about, long_about="A headless receiver that assembles organ meshes sent over TCP.")]
pub struct Args {
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    #[arg(short, long, default_value = "0.0.0.0")]
    pub bind: IpAddr,
    /// Scale applied to every vertex coordinate
    #[arg(short = 's', long, default_value_t = 0.01)]
    pub unit_scale: f32,
    /// Parent rule as CHILD:PARENT, may be repeated
    #[arg(short, long = "rule", value_name = "CHILD:PARENT", default_value = "9:8")]
    pub rules: Vec<HierarchyRule>,
    /// Do not nest any entity
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub no_hierarchy: bool,
    #[arg(short, long, value_enum, default_value = "replace")]
    pub duplicate_policy: DuplicateLabelPolicy,
    #[arg(long, default_value_t = MAX_JSON_BYTES)]
    pub max_json_bytes: usize,
    #[arg(long, default_value_t = MAX_MESH_COUNT)]
    pub max_mesh_count: usize,
    #[arg(long, default_value_t = MAX_OBJ_BYTES)]
    pub max_obj_bytes: usize,
    #[arg(short, long, default_value_t = 64)]
    pub event_capacity: usize,
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
    /// Serve prometheus metrics on this port
    #[arg(short, long)]
    pub metrics_port: Option<u16>,
    /// Rate at which the headless host drains scene events
    #[arg(short, long, default_value_t = 30)]
    pub fps: u32,
}

impl Args {
    pub fn to_config(&self) -> Result<ReceiverConfig, ConfigError> {
        let hierarchy = if self.no_hierarchy {
            HierarchyRules::empty()
        } else {
            HierarchyRules::new(self.rules.iter().copied())?
        };
        let config = ReceiverConfig {
            bind_address: self.bind,
            port: self.port,
            unit_scale: self.unit_scale,
            hierarchy,
            duplicate_policy: self.duplicate_policy,
            limits: FrameLimits {
                max_json_bytes: self.max_json_bytes,
                max_mesh_count: self.max_mesh_count,
                max_obj_bytes: self.max_obj_bytes,
            },
            event_capacity: self.event_capacity,
            metrics_port: self.metrics_port,
        };
        config.validate()?;
        Ok(config)
    }
}

pub fn parse_args() -> Args {
    Args::parse()
}

pub fn get_log_level_filter(args: &Args) -> LevelFilter {
    level_filter(args.log_level)
}

pub fn level_filter(log_level: LogLevel) -> LevelFilter {
    // Map the LogLevel enum to the LevelFilter enum
    match log_level {
        LogLevel::Trace => LevelFilter::TRACE,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
    }
}

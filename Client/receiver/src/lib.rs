pub mod args;
pub mod config;
pub mod error;
pub mod ffi;
pub mod ingress;
pub mod processing;
pub mod scene;
pub mod storage;
pub mod types;
pub mod utils;

pub use ffi::build_binding_inventory;

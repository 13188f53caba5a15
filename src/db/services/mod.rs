//! The `services` module provides the SeaORM queries behind the repository traits.
//!
//! Each sub-module covers one table and exposes plain async functions over a
//! `DatabaseConnection`. All public functions are re-exported here for convenient access
//! under the `crate::db::services::` path.

pub mod nas_device_service;
pub mod qos_audit_service;
pub mod qos_queue_service;
pub mod settings_service;
pub mod task_service;
pub mod user_service;

pub use nas_device_service::*;
pub use qos_audit_service::*;
pub use qos_queue_service::*;
pub use settings_service::*;
pub use task_service::*;
pub use user_service::*;

//! SeaORM Entity Crate
//!
//! Defines the SeaORM entities that map to database tables.
//! Each entity is defined in its own module.

pub mod nas_device;
pub mod qos_audit_log;
pub mod qos_queue;
pub mod scheduled_task;
pub mod setting;
pub mod user;

// Prelude module for easy importing of all entities and their related types
pub mod prelude {
    pub use super::nas_device::Entity as NasDevice;
    pub use super::nas_device::Model as NasDeviceModel;
    pub use super::nas_device::ActiveModel as NasDeviceActiveModel;
    pub use super::nas_device::Column as NasDeviceColumn;

    pub use super::qos_queue::Entity as QosQueue;
    pub use super::qos_queue::Model as QosQueueModel;
    pub use super::qos_queue::ActiveModel as QosQueueActiveModel;
    pub use super::qos_queue::Column as QosQueueColumn;

    pub use super::qos_audit_log::Entity as QosAuditLog;
    pub use super::qos_audit_log::Model as QosAuditLogModel;
    pub use super::qos_audit_log::ActiveModel as QosAuditLogActiveModel;
    pub use super::qos_audit_log::Column as QosAuditLogColumn;

    pub use super::scheduled_task::Entity as ScheduledTask;
    pub use super::scheduled_task::Model as ScheduledTaskModel;
    pub use super::scheduled_task::ActiveModel as ScheduledTaskActiveModel;
    pub use super::scheduled_task::Column as ScheduledTaskColumn;

    pub use super::setting::Entity as Setting;
    pub use super::setting::Model as SettingModel;
    pub use super::setting::ActiveModel as SettingActiveModel;
    pub use super::setting::Column as SettingColumn;

    pub use super::user::Entity as User;
    pub use super::user::Model as UserModel;
    pub use super::user::ActiveModel as UserActiveModel;
    pub use super::user::Column as UserColumn;
}

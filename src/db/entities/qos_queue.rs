use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::QueueStatus;

/// Desired bandwidth policy for one (user, device) pair and its reconciliation state.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "qos_queues")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub device_id: i64,
    pub device_addr: String,
    pub vendor_code: String,

    pub policy_name: String,
    pub policy_type: String,
    pub up_rate_kbps: i64,
    pub down_rate_kbps: i64,
    pub comm_method: String,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub extra_config: Option<Json>,

    /// Vendor-assigned object id; empty until the device acknowledged creation.
    pub remote_id: String,
    pub status: QueueStatus,
    pub last_error: String,
    pub retry_count: i32,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
    pub synced_at: Option<ChronoDateTimeUtc>,
}

impl Model {
    pub fn has_remote_object(&self) -> bool {
        !self.remote_id.is_empty()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::nas_device::Entity",
        from = "Column::DeviceId",
        to = "super::nas_device::Column::Id",
        on_delete = "Cascade"
    )]
    NasDevice,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::nas_device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::NasDevice.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

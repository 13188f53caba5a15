use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One reconciliation attempt against a device. Rows are append-only.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "qos_audit_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub queue_id: i64,
    pub user_id: i64,
    pub device_id: i64,
    pub action: String,
    pub result: String,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub request_payload: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub response_payload: Option<Json>,
    pub error_message: Option<String>,
    pub executed_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

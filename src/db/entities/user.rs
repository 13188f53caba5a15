use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Subscriber account. Owned by the RADIUS side; read-only here.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub username: String,
    pub up_rate_kbps: i64,
    pub down_rate_kbps: i64,
    pub ip_addr: Option<String>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::qos_queue::Entity")]
    QosQueue,
}

impl Related<super::qos_queue::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QosQueue.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

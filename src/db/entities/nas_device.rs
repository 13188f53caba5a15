use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Sentinel stored in `latency_ms` when every latency attempt failed.
pub const LATENCY_UNREACHABLE: i32 = -1;

/// A network access server. Connectivity fields are maintained by the admin API;
/// the three `last_*` column groups belong to the fleet prober, one group per channel.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "nas_devices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    pub ipaddr: String,
    pub vendor_code: String,
    pub model: Option<String>,
    pub enabled: bool,
    pub qos_enabled: bool,

    pub snmp_enabled: bool,
    pub snmp_port: i32,
    pub snmp_community: Option<String>,

    pub api_enabled: bool,
    pub api_port: i32,
    pub api_username: Option<String>,
    #[serde(skip_serializing)]
    pub api_password: Option<String>,

    // Latency channel
    pub latency_ms: Option<i32>,
    pub last_latency_at: Option<ChronoDateTimeUtc>,
    pub last_latency_msg: Option<String>,

    // SNMP channel
    pub last_snmp_at: Option<ChronoDateTimeUtc>,
    pub last_snmp_ok: Option<bool>,
    pub last_snmp_msg: Option<String>,

    // API channel
    pub last_api_at: Option<ChronoDateTimeUtc>,
    pub last_api_ok: Option<bool>,
    pub last_api_msg: Option<String>,

    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

impl Model {
    pub fn api_credentials(&self) -> Option<(&str, &str)> {
        match (self.api_username.as_deref(), self.api_password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    pub fn snmp_community(&self) -> Option<&str> {
        self.snmp_community.as_deref().filter(|c| !c.is_empty())
    }
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

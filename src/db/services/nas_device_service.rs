//! Device lookups and the prober's column-scoped writes.
//!
//! Each `update_*` function touches only the columns of one probe channel, so the
//! latency, SNMP and API sweeps can write the same row concurrently.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};

use crate::db::entities::nas_device;
use crate::db::repository::{ApiUpdate, LatencyUpdate, SnmpUpdate};

pub async fn get_device_by_id(
    db: &DatabaseConnection,
    id: i64,
) -> Result<Option<nas_device::Model>, DbErr> {
    nas_device::Entity::find_by_id(id).one(db).await
}

pub async fn list_enabled_devices(
    db: &DatabaseConnection,
) -> Result<Vec<nas_device::Model>, DbErr> {
    nas_device::Entity::find()
        .filter(nas_device::Column::Enabled.eq(true))
        .order_by_asc(nas_device::Column::Id)
        .all(db)
        .await
}

pub async fn update_device_latency(
    db: &DatabaseConnection,
    id: i64,
    update: &LatencyUpdate,
) -> Result<(), DbErr> {
    nas_device::Entity::update_many()
        .col_expr(nas_device::Column::LatencyMs, Expr::value(update.latency_ms))
        .col_expr(nas_device::Column::LastLatencyAt, Expr::value(update.probed_at))
        .col_expr(nas_device::Column::LastLatencyMsg, Expr::value(update.message.clone()))
        .filter(nas_device::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

pub async fn update_device_snmp(
    db: &DatabaseConnection,
    id: i64,
    update: &SnmpUpdate,
) -> Result<(), DbErr> {
    let mut stmt = nas_device::Entity::update_many()
        .col_expr(nas_device::Column::LastSnmpAt, Expr::value(update.probed_at))
        .col_expr(nas_device::Column::LastSnmpOk, Expr::value(update.ok))
        .col_expr(nas_device::Column::LastSnmpMsg, Expr::value(update.message.clone()));
    if let Some(model) = &update.model {
        stmt = stmt
            .col_expr(nas_device::Column::Model, Expr::value(model.clone()))
            .col_expr(nas_device::Column::UpdatedAt, Expr::value(Utc::now()));
    }
    stmt.filter(nas_device::Column::Id.eq(id)).exec(db).await?;
    Ok(())
}

pub async fn update_device_api(
    db: &DatabaseConnection,
    id: i64,
    update: &ApiUpdate,
) -> Result<(), DbErr> {
    nas_device::Entity::update_many()
        .col_expr(nas_device::Column::LastApiAt, Expr::value(update.probed_at))
        .col_expr(nas_device::Column::LastApiOk, Expr::value(update.ok))
        .col_expr(nas_device::Column::LastApiMsg, Expr::value(update.message.clone()))
        .filter(nas_device::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

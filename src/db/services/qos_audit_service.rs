use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::db::entities::qos_audit_log;

pub async fn create_audit_log(
    db: &DatabaseConnection,
    entry: qos_audit_log::Model,
) -> Result<qos_audit_log::Model, DbErr> {
    let new_entry = qos_audit_log::ActiveModel {
        queue_id: Set(entry.queue_id),
        user_id: Set(entry.user_id),
        device_id: Set(entry.device_id),
        action: Set(entry.action),
        result: Set(entry.result),
        request_payload: Set(entry.request_payload),
        response_payload: Set(entry.response_payload),
        error_message: Set(entry.error_message),
        executed_at: Set(entry.executed_at),
        ..Default::default()
    };
    new_entry.insert(db).await
}

pub async fn get_audit_logs_by_queue_id(
    db: &DatabaseConnection,
    queue_id: i64,
) -> Result<Vec<qos_audit_log::Model>, DbErr> {
    qos_audit_log::Entity::find()
        .filter(qos_audit_log::Column::QueueId.eq(queue_id))
        .order_by_desc(qos_audit_log::Column::ExecutedAt)
        .all(db)
        .await
}

pub async fn delete_audit_logs_older_than(
    db: &DatabaseConnection,
    days: i64,
) -> Result<u64, DbErr> {
    let cutoff = Utc::now() - Duration::days(days);
    let res = qos_audit_log::Entity::delete_many()
        .filter(qos_audit_log::Column::ExecutedAt.lt(cutoff))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

//! Queries over `qos_queues`.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};

use crate::db::entities::qos_queue;
use crate::db::enums::QueueStatus;
use crate::db::repository::QueueFilter;

pub async fn create_queue(
    db: &DatabaseConnection,
    queue: qos_queue::Model,
) -> Result<qos_queue::Model, DbErr> {
    let new_queue = qos_queue::ActiveModel {
        user_id: Set(queue.user_id),
        device_id: Set(queue.device_id),
        device_addr: Set(queue.device_addr),
        vendor_code: Set(queue.vendor_code),
        policy_name: Set(queue.policy_name),
        policy_type: Set(queue.policy_type),
        up_rate_kbps: Set(queue.up_rate_kbps),
        down_rate_kbps: Set(queue.down_rate_kbps),
        comm_method: Set(queue.comm_method),
        extra_config: Set(queue.extra_config),
        remote_id: Set(queue.remote_id),
        status: Set(queue.status),
        last_error: Set(queue.last_error),
        retry_count: Set(queue.retry_count),
        created_at: Set(queue.created_at),
        updated_at: Set(queue.updated_at),
        synced_at: Set(queue.synced_at),
        ..Default::default()
    };
    new_queue.insert(db).await
}

/// Writes every column of the record.
pub async fn update_queue(
    db: &DatabaseConnection,
    queue: qos_queue::Model,
) -> Result<qos_queue::Model, DbErr> {
    let mut active = queue.into_active_model().reset_all();
    active.updated_at = Set(Utc::now());
    active.update(db).await
}

pub async fn get_queue_by_id(
    db: &DatabaseConnection,
    id: i64,
) -> Result<Option<qos_queue::Model>, DbErr> {
    qos_queue::Entity::find_by_id(id).one(db).await
}

pub async fn get_queue_by_remote_id(
    db: &DatabaseConnection,
    remote_id: &str,
) -> Result<Option<qos_queue::Model>, DbErr> {
    qos_queue::Entity::find()
        .filter(qos_queue::Column::RemoteId.eq(remote_id))
        .one(db)
        .await
}

pub async fn get_pending_queues(
    db: &DatabaseConnection,
    limit: u64,
) -> Result<Vec<qos_queue::Model>, DbErr> {
    qos_queue::Entity::find()
        .filter(qos_queue::Column::Status.eq(QueueStatus::Pending))
        .order_by_asc(qos_queue::Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await
}

pub async fn get_failed_queues(
    db: &DatabaseConnection,
    limit: u64,
    retry_cap: i32,
) -> Result<Vec<qos_queue::Model>, DbErr> {
    qos_queue::Entity::find()
        .filter(qos_queue::Column::Status.eq(QueueStatus::Failed))
        .filter(qos_queue::Column::RetryCount.lt(retry_cap))
        .order_by_asc(qos_queue::Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await
}

pub async fn get_queue_by_user_and_device(
    db: &DatabaseConnection,
    user_id: i64,
    device_id: i64,
) -> Result<Option<qos_queue::Model>, DbErr> {
    qos_queue::Entity::find()
        .filter(qos_queue::Column::UserId.eq(user_id))
        .filter(qos_queue::Column::DeviceId.eq(device_id))
        .one(db)
        .await
}

pub async fn delete_queue(db: &DatabaseConnection, id: i64) -> Result<(), DbErr> {
    qos_queue::Entity::delete_by_id(id).exec(db).await?;
    Ok(())
}

pub async fn delete_queue_by_remote_id(
    db: &DatabaseConnection,
    remote_id: &str,
) -> Result<u64, DbErr> {
    let res = qos_queue::Entity::delete_many()
        .filter(qos_queue::Column::RemoteId.eq(remote_id))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

pub async fn update_queue_status(
    db: &DatabaseConnection,
    id: i64,
    status: QueueStatus,
    error: &str,
) -> Result<(), DbErr> {
    qos_queue::Entity::update_many()
        .col_expr(qos_queue::Column::Status, Expr::value(status))
        .col_expr(qos_queue::Column::LastError, Expr::value(error.to_owned()))
        .col_expr(qos_queue::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(qos_queue::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

pub async fn increment_queue_retry(db: &DatabaseConnection, id: i64) -> Result<(), DbErr> {
    qos_queue::Entity::update_many()
        .col_expr(
            qos_queue::Column::RetryCount,
            Expr::col(qos_queue::Column::RetryCount).add(1),
        )
        .col_expr(qos_queue::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(qos_queue::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

pub async fn list_queues(
    db: &DatabaseConnection,
    filter: &QueueFilter,
    page: u64,
    page_size: u64,
) -> Result<(Vec<qos_queue::Model>, u64), DbErr> {
    let mut condition = Condition::all();
    if let Some(user_id) = filter.user_id {
        condition = condition.add(qos_queue::Column::UserId.eq(user_id));
    }
    if let Some(device_id) = filter.device_id {
        condition = condition.add(qos_queue::Column::DeviceId.eq(device_id));
    }
    if let Some(status) = filter.status {
        condition = condition.add(qos_queue::Column::Status.eq(status));
    }

    let paginator = qos_queue::Entity::find()
        .filter(condition)
        .order_by_asc(qos_queue::Column::CreatedAt)
        .paginate(db, page_size.max(1));
    let total = paginator.num_items().await?;
    let items = paginator.fetch_page(page.saturating_sub(1)).await?;
    Ok((items, total))
}

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};

use crate::db::entities::scheduled_task;
use crate::db::repository::TaskRunRecord;

pub async fn list_enabled_tasks(
    db: &DatabaseConnection,
) -> Result<Vec<scheduled_task::Model>, DbErr> {
    scheduled_task::Entity::find()
        .filter(scheduled_task::Column::Enabled.eq(true))
        .order_by_asc(scheduled_task::Column::Id)
        .all(db)
        .await
}

pub async fn get_task_by_id(
    db: &DatabaseConnection,
    id: i64,
) -> Result<Option<scheduled_task::Model>, DbErr> {
    scheduled_task::Entity::find_by_id(id).one(db).await
}

/// Writes only the run bookkeeping columns; `enabled` and `interval_secs` belong to the
/// admin API.
pub async fn record_task_run(
    db: &DatabaseConnection,
    id: i64,
    run: &TaskRunRecord,
) -> Result<(), DbErr> {
    scheduled_task::Entity::update_many()
        .col_expr(scheduled_task::Column::LastRunAt, Expr::value(run.last_run_at))
        .col_expr(scheduled_task::Column::NextRunAt, Expr::value(run.next_run_at))
        .col_expr(
            scheduled_task::Column::LastResult,
            Expr::value(run.result.as_str().to_owned()),
        )
        .col_expr(scheduled_task::Column::LastMessage, Expr::value(run.message.clone()))
        .col_expr(scheduled_task::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(scheduled_task::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

use sea_orm::{DatabaseConnection, DbErr, EntityTrait};

use crate::db::entities::user;

pub async fn get_user_by_id(
    db: &DatabaseConnection,
    id: i64,
) -> Result<Option<user::Model>, DbErr> {
    user::Entity::find_by_id(id).one(db).await
}

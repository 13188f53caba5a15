use sea_orm::{DatabaseConnection, DbErr, EntityTrait};

use crate::db::entities::setting;

/// Looks up one key/value override; `None` when the key was never set.
pub async fn get_setting(
    db: &DatabaseConnection,
    key: &str,
) -> Result<Option<setting::Model>, DbErr> {
    setting::Entity::find_by_id(key.to_owned()).one(db).await
}

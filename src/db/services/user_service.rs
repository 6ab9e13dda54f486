//! The narrow user reads the core needs: API-key resolution for agent
//! ingestion and bulk owner lookup for the alerter. Account management lives
//! outside this service.

use std::collections::HashMap;

use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::db::entities::{prelude::*, user};

/// Bulk-resolves users so the alerter can do one query instead of one per
/// certificate owner.
pub async fn get_users_by_ids(
    db: &DatabaseConnection,
    user_ids: &[Uuid],
) -> Result<HashMap<Uuid, user::Model>, DbErr> {
    if user_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let users = User::find()
        .filter(user::Column::Id.is_in(user_ids.iter().copied()))
        .all(db)
        .await?;

    Ok(users.into_iter().map(|u| (u.id, u)).collect())
}

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub email: String,
    pub org_name: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    /// SHA-256 hex digest of the agent API key. The raw key is never stored.
    #[serde(skip_serializing)]
    pub api_key_hash: Option<String>,
    pub email_enabled: bool,
    pub is_verified: bool,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::collector::Entity")]
    Collectors,

    #[sea_orm(has_many = "super::monitored_target::Entity")]
    MonitoredTargets,
}

impl Related<super::collector::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Collectors.def()
    }
}

impl Related<super::monitored_target::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitoredTargets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

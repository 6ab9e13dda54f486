use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A certificate reporter: either a physical agent (push, agent-generated id)
/// or the per-user virtual collector backing agentless scans.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "collectors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: Uuid,
    pub hostname: String,
    pub is_virtual: bool,
    pub last_seen_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,

    #[sea_orm(has_many = "super::certificate_instance::Entity")]
    CertificateInstances,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::certificate_instance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CertificateInstances.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

use crate::db::enums::InstanceStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Binds a certificate definition to a collector at one source locator
/// (file path for agents, host:port for cloud scans).
/// Unique on (collector_id, source_uid).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "certificate_instances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub collector_id: String,
    pub certificate_id: Uuid,
    pub source_uid: String,
    pub source_type: String,
    /// Trust verdict at observation time; never recomputed afterwards.
    pub is_trusted: bool,
    pub trust_error: Option<String>,
    pub current_status: InstanceStatus,
    pub scanned_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::collector::Entity",
        from = "Column::CollectorId",
        to = "super::collector::Column::Id",
        on_delete = "Cascade"
    )]
    Collector,

    #[sea_orm(
        belongs_to = "super::certificate::Entity",
        from = "Column::CertificateId",
        to = "super::certificate::Column::Id"
    )]
    Certificate,
}

impl Related<super::collector::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Collector.def()
    }
}

impl Related<super::certificate::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Certificate.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

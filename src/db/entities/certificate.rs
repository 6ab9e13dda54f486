use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// The immutable public facts of one certificate. Deduplicated on
/// (serial_number, issuer_cn, issuer_org, issuer_ou); never updated after
/// insertion, deleted only once no instance references it.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "certificates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub serial_number: String,
    pub issuer_cn: String,
    pub issuer_org: Option<String>,
    pub issuer_ou: Option<String>,
    pub subject_cn: String,
    pub subject_org: Option<String>,
    pub subject_ou: Option<String>,
    pub valid_from: ChronoDateTimeUtc,
    pub valid_until: ChronoDateTimeUtc,
    pub signature_algo: String,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::certificate_instance::Entity")]
    CertificateInstances,
}

impl Related<super::certificate_instance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CertificateInstances.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

//! SeaORM entities, one module per table.

pub mod alert_history;
pub mod certificate;
pub mod certificate_instance;
pub mod collector;
pub mod monitored_target;
pub mod user;

// Prelude module for easy importing of all entities and their related types
pub mod prelude {
    pub use super::user::Entity as User;
    pub use super::user::Model as UserModel;

    pub use super::collector::Entity as Collector;
    pub use super::collector::Model as CollectorModel;

    pub use super::certificate::Entity as Certificate;
    pub use super::certificate::Model as CertificateModel;

    pub use super::certificate_instance::Entity as CertificateInstance;
    pub use super::certificate_instance::Model as CertificateInstanceModel;

    pub use super::monitored_target::Entity as MonitoredTarget;
    pub use super::monitored_target::Model as MonitoredTargetModel;

    pub use super::alert_history::Entity as AlertHistory;
    pub use super::alert_history::Model as AlertHistoryModel;
}

//! Collaborator ports.
//!
//! Everything the engine consumes but does not own: notification delivery,
//! identity and role lookup, the entity directory, the checklist template
//! catalog, and the evidence blob store. Each port ships an in-memory
//! implementation used as the test backend.

pub mod entity;
pub mod evidence;
pub mod identity;
pub mod notify;
pub mod template;

pub use entity::{EntityDirectory, EntityInfo, InMemoryEntityDirectory, SupplierProfile};
pub use evidence::{EvidenceStore, InMemoryEvidenceStore};
pub use identity::{IdentityDirectory, InMemoryIdentityDirectory, User};
pub use notify::{
    InMemoryNotificationSink, NoopNotificationSink, NotificationKind, Notifier, NotificationSink,
    SentNotification,
};
pub use template::{
    InMemoryTemplateCatalog, ScoringConfig, Template, TemplateCatalog, TemplateItem,
    TemplateSection,
};

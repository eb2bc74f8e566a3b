//! Storage collaborator boundary.
//!
//! Handlers never touch a database directly: they resolve a typed filter
//! through the visibility engine and hand it to a [`DirectoryStore`]. The
//! composite lifecycle operations (`insert_user`, `rename_user_email`,
//! `purge_user`) are atomic in every backend — the identity row and the
//! custom-field value maps change together or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::{
    AccessRequest, Diploma, FieldDefinition, Group, Note, Offering, Organization, Payment, Tag,
    Tenant, User,
};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Fixed page size for paged user listings.
pub const PAGE_SIZE: usize = 20;

/// Query predicate over users. Listings are ordered by descending id; when
/// `page` is set the slice `[page*20, (page+1)*20)` of that ordering is
/// returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFilter {
    pub tenant_id: i64,
    pub active_only: bool,
    /// Narrows students to those in a group authored by this teacher
    /// (teachers and admins stay visible).
    pub visible_to_teacher: Option<i64>,
    pub role: Option<String>,
    pub role_in: Option<Vec<String>>,
    pub ids: Option<Vec<i64>>,
    pub page: Option<u32>,
}

/// Query predicate over groups, ordered by creation time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupFilter {
    pub tenant_id: i64,
    pub course_id: Option<i64>,
}

/// Query predicate over notes, ordered by creation time ascending.
/// `empty` short-circuits to no rows (anonymous/student requesters, or a
/// teacher without authorship over the requested student).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteFilter {
    pub tenant_id: i64,
    pub empty: bool,
    pub user_id: Option<i64>,
}

/// Query predicate over diplomas, ordered by id ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiplomaFilter {
    pub tenant_id: i64,
    pub empty: bool,
    pub user_id: Option<i64>,
}

pub type StoreResult<T> = anyhow::Result<T>;

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    // -- tenancy ---------------------------------------------------------
    async fn insert_tenant(&self, tenant: Tenant) -> StoreResult<Tenant>;
    async fn insert_organization(&self, org: Organization) -> StoreResult<Organization>;
    async fn insert_tag(&self, tag: Tag) -> StoreResult<Tag>;
    async fn tenant_by_id(&self, id: i64) -> StoreResult<Option<Tenant>>;
    async fn organization_for_tenant(&self, tenant_id: i64) -> StoreResult<Option<Organization>>;
    async fn tags_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<Tag>>;

    // -- users -----------------------------------------------------------
    /// Persists the user row, its credential and the coerced custom-field
    /// values in one transaction. `user.id` is assigned by the store.
    async fn insert_user(
        &self,
        user: User,
        password_hash: &str,
        field_values: &[(i64, String)],
    ) -> StoreResult<User>;
    async fn user_by_id(&self, tenant_id: i64, id: i64) -> StoreResult<Option<User>>;
    /// Lookup without a tenant scope; only for cross-tenant references the
    /// organization itself owns (its admin account).
    async fn user_by_id_any(&self, id: i64) -> StoreResult<Option<User>>;
    /// Case-insensitive lookup within the tenant.
    async fn user_by_email(&self, tenant_id: i64, email: &str) -> StoreResult<Option<User>>;
    async fn user_by_code(&self, code: Uuid) -> StoreResult<Option<User>>;
    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>>;
    /// Persists profile changes. The email column is deliberately not
    /// written here; identity-key changes go through [`rename_user_email`].
    ///
    /// [`rename_user_email`]: DirectoryStore::rename_user_email
    async fn update_user(&self, user: &User) -> StoreResult<()>;
    /// Atomically re-keys every custom-field value map entry from the old
    /// email to `new_email` and updates the identity row.
    async fn rename_user_email(&self, id: i64, new_email: &str) -> StoreResult<()>;
    async fn set_users_active(&self, tenant_id: i64, ids: &[i64], active: bool) -> StoreResult<()>;
    /// Atomically removes the user's custom-field value map entries and
    /// deletes the row. References from groups, notes and diplomas are
    /// nulled/dropped.
    async fn purge_user(&self, id: i64) -> StoreResult<()>;
    async fn set_password_hash(&self, id: i64, hash: &str) -> StoreResult<()>;

    // -- groups ----------------------------------------------------------
    async fn insert_group(&self, group: Group) -> StoreResult<Group>;
    async fn group_by_id(&self, tenant_id: i64, id: i64) -> StoreResult<Option<Group>>;
    async fn groups_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<Group>>;
    async fn list_groups(&self, filter: &GroupFilter) -> StoreResult<Vec<Group>>;
    /// Persists field changes and reconciles the member set to
    /// `group.members`.
    async fn update_group(&self, group: &Group) -> StoreResult<()>;
    async fn delete_groups(&self, tenant_id: i64, ids: &[i64]) -> StoreResult<()>;

    // -- notes -----------------------------------------------------------
    async fn insert_note(&self, note: Note) -> StoreResult<Note>;
    async fn note_by_id(&self, tenant_id: i64, id: i64) -> StoreResult<Option<Note>>;
    async fn list_notes(&self, filter: &NoteFilter) -> StoreResult<Vec<Note>>;
    async fn update_note(&self, note: &Note) -> StoreResult<()>;
    async fn delete_note(&self, tenant_id: i64, id: i64) -> StoreResult<()>;

    // -- diplomas --------------------------------------------------------
    async fn insert_diploma(&self, diploma: Diploma) -> StoreResult<Diploma>;
    async fn diploma_by_id(&self, tenant_id: i64, id: i64) -> StoreResult<Option<Diploma>>;
    async fn list_diplomas(&self, filter: &DiplomaFilter) -> StoreResult<Vec<Diploma>>;
    async fn update_diploma(&self, diploma: &Diploma) -> StoreResult<()>;
    async fn delete_diploma(&self, tenant_id: i64, id: i64) -> StoreResult<()>;

    // -- custom fields ---------------------------------------------------
    async fn insert_field(&self, def: FieldDefinition) -> StoreResult<FieldDefinition>;
    /// Definitions in definition order (ascending id).
    async fn fields_for_organization(&self, org_id: i64) -> StoreResult<Vec<FieldDefinition>>;
    async fn field_value(&self, field_id: i64, email: &str) -> StoreResult<Option<String>>;
    /// Per-field last-write-wins; `None` removes the entry.
    async fn set_field_value(
        &self,
        field_id: i64,
        email: &str,
        value: Option<&str>,
    ) -> StoreResult<()>;

    // -- collaborator records (courses, webinars, payments) --------------
    async fn insert_offering(&self, offering: Offering) -> StoreResult<Offering>;
    async fn insert_access_request(&self, request: AccessRequest) -> StoreResult<AccessRequest>;
    async fn insert_payment(&self, payment: Payment) -> StoreResult<Payment>;
    async fn offering_by_id(&self, id: i64) -> StoreResult<Option<Offering>>;
    async fn access_requests_for_user(
        &self,
        tenant_id: i64,
        user_id: i64,
    ) -> StoreResult<Vec<AccessRequest>>;
    async fn access_requests_for_group(
        &self,
        tenant_id: i64,
        group_id: i64,
    ) -> StoreResult<Vec<AccessRequest>>;
    async fn payments_for_access_request(&self, request_id: i64) -> StoreResult<Vec<Payment>>;
    /// Paid payments inside `[start, end)` joined to their access request,
    /// scoped by the request's tenant.
    async fn paid_payments_between(
        &self,
        tenant_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<(Payment, AccessRequest)>>;
}

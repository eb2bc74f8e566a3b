//! In-memory backend. Serves two purposes: the storage double for tests and
//! a stand-alone dev mode, so the service can run without Postgres while the
//! frontend is being wired up.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::{
    AccessRequest, Diploma, FieldDefinition, Group, Note, Offering, Organization, Payment, Role,
    Tag, Tenant, User,
};
use uuid::Uuid;

use super::{
    DiplomaFilter, DirectoryStore, GroupFilter, NoteFilter, StoreResult, UserFilter, PAGE_SIZE,
};

struct StoredUser {
    user: User,
    // written by the password operations; credential checks live in the
    // auth service, so nothing here reads it back
    #[allow(dead_code)]
    password_hash: String,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    tenants: HashMap<i64, Tenant>,
    organizations: HashMap<i64, Organization>,
    tags: BTreeMap<i64, Tag>,
    users: BTreeMap<i64, StoredUser>,
    groups: BTreeMap<i64, Group>,
    notes: BTreeMap<i64, Note>,
    diplomas: BTreeMap<i64, Diploma>,
    fields: BTreeMap<i64, FieldDefinition>,
    /// field id -> (email -> stored value); string-keyed on purpose, the
    /// lifecycle coordinator keeps the key set in sync with the user rows.
    field_values: HashMap<i64, HashMap<String, String>>,
    offerings: HashMap<i64, Offering>,
    access_requests: BTreeMap<i64, AccessRequest>,
    payments: BTreeMap<i64, Payment>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn user_matches(&self, user: &User, filter: &UserFilter) -> bool {
        if user.tenant_id != filter.tenant_id {
            return false;
        }
        if filter.active_only && !user.is_active {
            return false;
        }
        if let Some(teacher_id) = filter.visible_to_teacher {
            let visible = match user.role {
                Role::Teacher | Role::Admin => true,
                Role::Student => user.groups.iter().any(|gid| {
                    self.groups
                        .get(gid)
                        .is_some_and(|g| g.author_id == Some(teacher_id))
                }),
            };
            if !visible {
                return false;
            }
        }
        if let Some(role) = &filter.role {
            if user.role.as_str() != role {
                return false;
            }
        }
        if let Some(roles) = &filter.role_in {
            if !roles.iter().any(|r| r == user.role.as_str()) {
                return false;
            }
        }
        if let Some(ids) = &filter.ids {
            if !ids.contains(&user.id) {
                return false;
            }
        }
        true
    }
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// A single demo site so the dev-mode service answers requests out of
    /// the box.
    pub async fn seeded() -> StoreResult<Self> {
        let store = Self::new();
        let org = store
            .insert_organization(Organization {
                id: 0,
                title: "Демо-организация".into(),
                admin_id: None,
                notify_about_clients: false,
            })
            .await?;
        store
            .insert_tenant(Tenant {
                id: 0,
                domain: "demo".into(),
                organization_id: org.id,
                utc_offset_minutes: 180,
            })
            .await?;
        Ok(store)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn insert_tenant(&self, mut tenant: Tenant) -> StoreResult<Tenant> {
        let mut inner = self.lock();
        tenant.id = inner.next_id();
        inner.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn insert_organization(&self, mut org: Organization) -> StoreResult<Organization> {
        let mut inner = self.lock();
        org.id = inner.next_id();
        inner.organizations.insert(org.id, org.clone());
        Ok(org)
    }

    async fn insert_tag(&self, mut tag: Tag) -> StoreResult<Tag> {
        let mut inner = self.lock();
        tag.id = inner.next_id();
        inner.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    async fn tenant_by_id(&self, id: i64) -> StoreResult<Option<Tenant>> {
        Ok(self.lock().tenants.get(&id).cloned())
    }

    async fn organization_for_tenant(&self, tenant_id: i64) -> StoreResult<Option<Organization>> {
        let inner = self.lock();
        Ok(inner
            .tenants
            .get(&tenant_id)
            .and_then(|t| inner.organizations.get(&t.organization_id))
            .cloned())
    }

    async fn tags_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<Tag>> {
        let inner = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| inner.tags.get(id).cloned())
            .collect())
    }

    async fn insert_user(
        &self,
        mut user: User,
        password_hash: &str,
        field_values: &[(i64, String)],
    ) -> StoreResult<User> {
        let mut inner = self.lock();
        if inner.users.values().any(|s| {
            s.user.tenant_id == user.tenant_id && s.user.email.eq_ignore_ascii_case(&user.email)
        }) {
            return Err(anyhow!("duplicate email {} in tenant", user.email));
        }
        user.id = inner.next_id();
        for (field_id, value) in field_values {
            inner
                .field_values
                .entry(*field_id)
                .or_default()
                .insert(user.email.clone(), value.clone());
        }
        inner.users.insert(
            user.id,
            StoredUser {
                user: user.clone(),
                password_hash: password_hash.to_owned(),
            },
        );
        Ok(user)
    }

    async fn user_by_id(&self, tenant_id: i64, id: i64) -> StoreResult<Option<User>> {
        Ok(self
            .lock()
            .users
            .get(&id)
            .filter(|s| s.user.tenant_id == tenant_id)
            .map(|s| s.user.clone()))
    }

    async fn user_by_id_any(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.lock().users.get(&id).map(|s| s.user.clone()))
    }

    async fn user_by_email(&self, tenant_id: i64, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|s| s.user.tenant_id == tenant_id && s.user.email.eq_ignore_ascii_case(email))
            .map(|s| s.user.clone()))
    }

    async fn user_by_code(&self, code: Uuid) -> StoreResult<Option<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|s| s.user.unsubscribe_code == code)
            .map(|s| s.user.clone()))
    }

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let inner = self.lock();
        let mut users: Vec<User> = inner
            .users
            .values()
            .filter(|s| inner.user_matches(&s.user, filter))
            .map(|s| s.user.clone())
            .collect();
        users.sort_by(|a, b| b.id.cmp(&a.id));
        if let Some(page) = filter.page {
            let offset = page as usize * PAGE_SIZE;
            users = users.into_iter().skip(offset).take(PAGE_SIZE).collect();
        }
        Ok(users)
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut inner = self.lock();
        let stored = inner
            .users
            .get_mut(&user.id)
            .ok_or_else(|| anyhow!("user {} not found", user.id))?;
        let email = stored.user.email.clone();
        stored.user = user.clone();
        // identity key changes route through rename_user_email
        stored.user.email = email;
        Ok(())
    }

    async fn rename_user_email(&self, id: i64, new_email: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let old_email = inner
            .users
            .get(&id)
            .map(|s| s.user.email.clone())
            .ok_or_else(|| anyhow!("user {id} not found"))?;
        for map in inner.field_values.values_mut() {
            if let Some(value) = map.remove(&old_email) {
                map.insert(new_email.to_owned(), value);
            }
        }
        if let Some(stored) = inner.users.get_mut(&id) {
            stored.user.email = new_email.to_owned();
        }
        Ok(())
    }

    async fn set_users_active(
        &self,
        tenant_id: i64,
        ids: &[i64],
        active: bool,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        for id in ids {
            if let Some(stored) = inner.users.get_mut(id) {
                if stored.user.tenant_id == tenant_id {
                    stored.user.is_active = active;
                }
            }
        }
        Ok(())
    }

    async fn purge_user(&self, id: i64) -> StoreResult<()> {
        let mut inner = self.lock();
        let stored = inner
            .users
            .remove(&id)
            .ok_or_else(|| anyhow!("user {id} not found"))?;
        let email = stored.user.email;
        for map in inner.field_values.values_mut() {
            map.remove(&email);
        }
        for group in inner.groups.values_mut() {
            group.members.retain(|m| *m != id);
            if group.author_id == Some(id) {
                group.author_id = None;
            }
        }
        for note in inner.notes.values_mut() {
            if note.user_id == Some(id) {
                note.user_id = None;
            }
            if note.author_id == Some(id) {
                note.author_id = None;
            }
        }
        for diploma in inner.diplomas.values_mut() {
            if diploma.user_id == Some(id) {
                diploma.user_id = None;
            }
        }
        Ok(())
    }

    async fn set_password_hash(&self, id: i64, hash: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let stored = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| anyhow!("user {id} not found"))?;
        stored.password_hash = hash.to_owned();
        Ok(())
    }

    async fn insert_group(&self, mut group: Group) -> StoreResult<Group> {
        let mut inner = self.lock();
        group.id = inner.next_id();
        for member in &group.members {
            if let Some(stored) = inner.users.get_mut(member) {
                stored.user.groups.push(group.id);
            }
        }
        inner.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn group_by_id(&self, tenant_id: i64, id: i64) -> StoreResult<Option<Group>> {
        Ok(self
            .lock()
            .groups
            .get(&id)
            .filter(|g| g.tenant_id == tenant_id)
            .cloned())
    }

    async fn groups_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<Group>> {
        let inner = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| inner.groups.get(id).cloned())
            .collect())
    }

    async fn list_groups(&self, filter: &GroupFilter) -> StoreResult<Vec<Group>> {
        let inner = self.lock();
        let mut groups: Vec<Group> = inner
            .groups
            .values()
            .filter(|g| g.tenant_id == filter.tenant_id)
            .filter(|g| filter.course_id.is_none() || g.course_id == filter.course_id)
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.created_at);
        Ok(groups)
    }

    async fn update_group(&self, group: &Group) -> StoreResult<()> {
        let mut inner = self.lock();
        if !inner.groups.contains_key(&group.id) {
            return Err(anyhow!("group {} not found", group.id));
        }
        let member_ids: Vec<i64> = inner.users.keys().copied().collect();
        for uid in member_ids {
            let is_member = group.members.contains(&uid);
            if let Some(stored) = inner.users.get_mut(&uid) {
                let listed = stored.user.groups.contains(&group.id);
                if is_member && !listed {
                    stored.user.groups.push(group.id);
                } else if !is_member && listed {
                    stored.user.groups.retain(|g| *g != group.id);
                }
            }
        }
        inner.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn delete_groups(&self, tenant_id: i64, ids: &[i64]) -> StoreResult<()> {
        let mut inner = self.lock();
        for id in ids {
            let removed = inner
                .groups
                .get(id)
                .is_some_and(|g| g.tenant_id == tenant_id);
            if removed {
                inner.groups.remove(id);
                for stored in inner.users.values_mut() {
                    stored.user.groups.retain(|g| g != id);
                }
            }
        }
        Ok(())
    }

    async fn insert_note(&self, mut note: Note) -> StoreResult<Note> {
        let mut inner = self.lock();
        note.id = inner.next_id();
        inner.notes.insert(note.id, note.clone());
        Ok(note)
    }

    async fn note_by_id(&self, tenant_id: i64, id: i64) -> StoreResult<Option<Note>> {
        Ok(self
            .lock()
            .notes
            .get(&id)
            .filter(|n| n.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_notes(&self, filter: &NoteFilter) -> StoreResult<Vec<Note>> {
        if filter.empty {
            return Ok(Vec::new());
        }
        let inner = self.lock();
        let mut notes: Vec<Note> = inner
            .notes
            .values()
            .filter(|n| n.tenant_id == filter.tenant_id)
            .filter(|n| filter.user_id.is_none() || n.user_id == filter.user_id)
            .cloned()
            .collect();
        notes.sort_by_key(|n| n.created_at);
        Ok(notes)
    }

    async fn update_note(&self, note: &Note) -> StoreResult<()> {
        let mut inner = self.lock();
        if !inner.notes.contains_key(&note.id) {
            return Err(anyhow!("note {} not found", note.id));
        }
        inner.notes.insert(note.id, note.clone());
        Ok(())
    }

    async fn delete_note(&self, tenant_id: i64, id: i64) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.notes.get(&id).is_some_and(|n| n.tenant_id == tenant_id) {
            inner.notes.remove(&id);
        }
        Ok(())
    }

    async fn insert_diploma(&self, mut diploma: Diploma) -> StoreResult<Diploma> {
        let mut inner = self.lock();
        diploma.id = inner.next_id();
        inner.diplomas.insert(diploma.id, diploma.clone());
        Ok(diploma)
    }

    async fn diploma_by_id(&self, tenant_id: i64, id: i64) -> StoreResult<Option<Diploma>> {
        Ok(self
            .lock()
            .diplomas
            .get(&id)
            .filter(|d| d.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_diplomas(&self, filter: &DiplomaFilter) -> StoreResult<Vec<Diploma>> {
        if filter.empty {
            return Ok(Vec::new());
        }
        let inner = self.lock();
        let mut diplomas: Vec<Diploma> = inner
            .diplomas
            .values()
            .filter(|d| d.tenant_id == filter.tenant_id)
            .filter(|d| filter.user_id.is_none() || d.user_id == filter.user_id)
            .cloned()
            .collect();
        diplomas.sort_by_key(|d| d.id);
        Ok(diplomas)
    }

    async fn update_diploma(&self, diploma: &Diploma) -> StoreResult<()> {
        let mut inner = self.lock();
        if !inner.diplomas.contains_key(&diploma.id) {
            return Err(anyhow!("diploma {} not found", diploma.id));
        }
        inner.diplomas.insert(diploma.id, diploma.clone());
        Ok(())
    }

    async fn delete_diploma(&self, tenant_id: i64, id: i64) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner
            .diplomas
            .get(&id)
            .is_some_and(|d| d.tenant_id == tenant_id)
        {
            inner.diplomas.remove(&id);
        }
        Ok(())
    }

    async fn insert_field(&self, mut def: FieldDefinition) -> StoreResult<FieldDefinition> {
        let mut inner = self.lock();
        if inner
            .fields
            .values()
            .any(|f| f.organization_id == def.organization_id && f.name == def.name)
        {
            return Err(anyhow!("field '{}' already defined", def.name));
        }
        def.id = inner.next_id();
        inner.fields.insert(def.id, def.clone());
        Ok(def)
    }

    async fn fields_for_organization(&self, org_id: i64) -> StoreResult<Vec<FieldDefinition>> {
        Ok(self
            .lock()
            .fields
            .values()
            .filter(|f| f.organization_id == org_id)
            .cloned()
            .collect())
    }

    async fn field_value(&self, field_id: i64, email: &str) -> StoreResult<Option<String>> {
        Ok(self
            .lock()
            .field_values
            .get(&field_id)
            .and_then(|map| map.get(email))
            .cloned())
    }

    async fn set_field_value(
        &self,
        field_id: i64,
        email: &str,
        value: Option<&str>,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        let map = inner.field_values.entry(field_id).or_default();
        match value {
            Some(value) => {
                map.insert(email.to_owned(), value.to_owned());
            }
            None => {
                map.remove(email);
            }
        }
        Ok(())
    }

    async fn insert_offering(&self, mut offering: Offering) -> StoreResult<Offering> {
        let mut inner = self.lock();
        offering.id = inner.next_id();
        inner.offerings.insert(offering.id, offering.clone());
        Ok(offering)
    }

    async fn insert_access_request(
        &self,
        mut request: AccessRequest,
    ) -> StoreResult<AccessRequest> {
        let mut inner = self.lock();
        request.id = inner.next_id();
        inner.access_requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn insert_payment(&self, mut payment: Payment) -> StoreResult<Payment> {
        let mut inner = self.lock();
        payment.id = inner.next_id();
        inner.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn offering_by_id(&self, id: i64) -> StoreResult<Option<Offering>> {
        Ok(self.lock().offerings.get(&id).cloned())
    }

    async fn access_requests_for_user(
        &self,
        tenant_id: i64,
        user_id: i64,
    ) -> StoreResult<Vec<AccessRequest>> {
        Ok(self
            .lock()
            .access_requests
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.user_id == Some(user_id))
            .cloned()
            .collect())
    }

    async fn access_requests_for_group(
        &self,
        tenant_id: i64,
        group_id: i64,
    ) -> StoreResult<Vec<AccessRequest>> {
        Ok(self
            .lock()
            .access_requests
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.group_id == Some(group_id))
            .cloned()
            .collect())
    }

    async fn payments_for_access_request(&self, request_id: i64) -> StoreResult<Vec<Payment>> {
        Ok(self
            .lock()
            .payments
            .values()
            .filter(|p| p.access_request_id == request_id)
            .cloned()
            .collect())
    }

    async fn paid_payments_between(
        &self,
        tenant_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<(Payment, AccessRequest)>> {
        let inner = self.lock();
        Ok(inner
            .payments
            .values()
            .filter(|p| p.is_paid && p.paid_at >= start && p.paid_at < end)
            .filter_map(|p| {
                inner
                    .access_requests
                    .get(&p.access_request_id)
                    .filter(|r| r.tenant_id == tenant_id)
                    .map(|r| (p.clone(), r.clone()))
            })
            .collect())
    }
}

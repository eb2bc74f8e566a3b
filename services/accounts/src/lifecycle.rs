//! Identity Lifecycle Coordinator.
//!
//! Every user state transition runs through here so the custom-field value
//! maps stay keyed by a live email: rename-on-email-change and
//! remove-on-purge are explicit steps inside the store's transactional
//! composite operations, not side effects. Notification dispatch is
//! best-effort and never rolls a transition back.

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHasher,
};
use chrono::Utc;
use dto::{ImportReport, RawRow, RegisterRequest, UpdateUserRequest};
use models::{Organization, Role, Tenant, User};
use rand::{distr::Alphanumeric, Rng};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::fields::{self, FieldRegistry};
use crate::notify::{self, Notifier};
use crate::store::DirectoryStore;
use crate::transfer;

const GENERATED_PASSWORD_LEN: usize = 8;
const IMPORT_MANDATORY_ERROR: &str = "Поля имя, фамилия и email являются обязательными";

pub struct Lifecycle<'a> {
    store: &'a dyn DirectoryStore,
    notifier: &'a dyn Notifier,
}

impl<'a> Lifecycle<'a> {
    pub fn new(store: &'a dyn DirectoryStore, notifier: &'a dyn Notifier) -> Self {
        Self { store, notifier }
    }

    /// Create a user in the tenant. Submitted custom-field entries are
    /// coerced up front; the identity row, credential and field values are
    /// persisted in one store transaction; the onboarding mail (and the
    /// optional organization-admin copy) happens after commit and never
    /// fails the creation.
    pub async fn register(&self, tenant: &Tenant, req: RegisterRequest) -> ApiResult<User> {
        let org = self.organization(tenant).await?;
        let defs = self.store.fields_for_organization(org.id).await?;
        let writes = fields::coerce_entries(&defs, &req.custom_fields, tenant.timezone())?;
        let values: Vec<(i64, String)> = writes
            .into_iter()
            .filter_map(|(id, value)| value.map(|v| (id, v)))
            .collect();
        self.create_user(tenant, &org, req, &values).await
    }

    /// Shared create path for registration and bulk import (the importer
    /// writes bare student rows, so it skips the custom-field gate).
    async fn create_user(
        &self,
        tenant: &Tenant,
        org: &Organization,
        req: RegisterRequest,
        values: &[(i64, String)],
    ) -> ApiResult<User> {
        let email = req.email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(ApiError::validation("email", "некорректный адрес"));
        }
        if self.store.user_by_email(tenant.id, &email).await?.is_some() {
            return Err(ApiError::conflict(
                "пользователь с таким email уже существует",
            ));
        }

        let password = req
            .password
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(generate_password);
        let hash = hash_password(&password)?;

        let user = User {
            id: 0,
            tenant_id: tenant.id,
            email,
            first_name: req.first_name,
            last_name: req.last_name,
            middle_name: req.middle_name,
            avatar: None,
            role: req.role.unwrap_or(Role::Student),
            groups: req.groups,
            tags: req.tags,
            city: req.city,
            position: String::new(),
            grade: req.grade,
            gender: req.gender,
            speciality: req.speciality,
            examination: req.examination,
            phone: req.phone,
            address: String::new(),
            about: String::new(),
            is_active: true,
            is_staff: false,
            is_paid: true,
            is_approved: false,
            registered_at: Utc::now(),
            unsubscribe_code: Uuid::new_v4(),
            is_unsubscribed: false,
        };
        let user = self.store.insert_user(user, &hash, values).await?;
        tracing::info!(user = user.id, tenant = tenant.id, "user registered");

        self.send_onboarding(tenant, org, &user, &password).await;
        Ok(user)
    }

    /// Profile update. An email change re-keys every custom-field value map
    /// entry before the new address is visible to readers, then the rest of
    /// the row is written.
    pub async fn update(
        &self,
        tenant: &Tenant,
        id: i64,
        req: UpdateUserRequest,
    ) -> ApiResult<User> {
        let mut user = self
            .store
            .user_by_id(tenant.id, id)
            .await?
            .ok_or_else(|| ApiError::not_found("пользователь не найден"))?;

        if let Some(new_email) = &req.email {
            let new_email = new_email.trim().to_lowercase();
            if new_email.is_empty() || !new_email.contains('@') {
                return Err(ApiError::validation("email", "некорректный адрес"));
            }
            if new_email != user.email {
                if self
                    .store
                    .user_by_email(tenant.id, &new_email)
                    .await?
                    .is_some()
                {
                    return Err(ApiError::conflict(
                        "пользователь с таким email уже существует",
                    ));
                }
                self.store.rename_user_email(user.id, &new_email).await?;
                user.email = new_email;
            }
        }

        apply_profile_changes(&mut user, &req);
        self.store.update_user(&user).await?;

        if let Some(entries) = &req.custom_fields {
            let org = self.organization(tenant).await?;
            let defs = self.store.fields_for_organization(org.id).await?;
            let writes = fields::coerce_entries(&defs, entries, tenant.timezone())?;
            FieldRegistry::new(self.store)
                .apply(&user.email, &writes)
                .await?;
        }
        Ok(user)
    }

    /// Soft delete: the rows stay, custom-field values stay (the account may
    /// be reactivated).
    pub async fn deactivate(&self, tenant: &Tenant, ids: &[i64]) -> ApiResult<()> {
        self.store.set_users_active(tenant.id, ids, false).await?;
        Ok(())
    }

    pub async fn activate_by_code(&self, code: Uuid) -> ApiResult<()> {
        let user = self
            .store
            .user_by_code(code)
            .await?
            .ok_or_else(|| ApiError::not_found("неизвестный код активации"))?;
        self.store
            .set_users_active(user.tenant_id, &[user.id], true)
            .await?;
        Ok(())
    }

    /// Hard delete. The store scrubs the user's custom-field value map
    /// entries in the same transaction as the row delete, so no stale email
    /// key survives.
    pub async fn purge(&self, tenant: &Tenant, id: i64) -> ApiResult<()> {
        let user = self
            .store
            .user_by_id(tenant.id, id)
            .await?
            .ok_or_else(|| ApiError::not_found("пользователь не найден"))?;
        self.store.purge_user(user.id).await?;
        tracing::info!(user = id, tenant = tenant.id, "user purged");
        Ok(())
    }

    pub async fn password_change(&self, tenant: &Tenant, id: i64, password: &str) -> ApiResult<()> {
        let user = self
            .store
            .user_by_id(tenant.id, id)
            .await?
            .ok_or_else(|| ApiError::not_found("пользователь не найден"))?;
        let hash = hash_password(password)?;
        self.store.set_password_hash(user.id, &hash).await?;
        Ok(())
    }

    pub async fn password_reset(&self, tenant: &Tenant, email: &str) -> ApiResult<()> {
        let user = self
            .store
            .user_by_email(tenant.id, email)
            .await?
            .ok_or_else(|| ApiError::not_found("пользователь не найден"))?;
        let password = generate_password();
        let hash = hash_password(&password)?;
        self.store.set_password_hash(user.id, &hash).await?;
        self.deliver(
            &user,
            notify::PASSWORD_RESET_SUBJECT,
            &notify::password_reset_body(&password),
        )
        .await;
        Ok(())
    }

    /// Fresh random credential per id. A missing user or a failed delivery
    /// is logged and skipped; the rest of the batch proceeds.
    pub async fn batch_reset(&self, tenant: &Tenant, ids: &[i64]) -> ApiResult<u32> {
        let mut reset = 0;
        for id in ids {
            let user = match self.store.user_by_id(tenant.id, *id).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    tracing::warn!(user = id, "batch reset skipped unknown user");
                    continue;
                }
                Err(error) => {
                    tracing::warn!(user = id, error = %error, "batch reset lookup failed");
                    continue;
                }
            };
            let password = generate_password();
            let hash = hash_password(&password)?;
            if let Err(error) = self.store.set_password_hash(user.id, &hash).await {
                tracing::warn!(user = id, error = %error, "batch reset write failed");
                continue;
            }
            reset += 1;
            self.deliver(
                &user,
                notify::BATCH_RESET_SUBJECT,
                &notify::batch_reset_body(&password),
            )
            .await;
        }
        Ok(reset)
    }

    /// Row-by-row import. A row missing a mandatory column aborts the whole
    /// batch before any write; past that gate each row fails independently.
    /// Rows whose email already exists are skipped without counting.
    pub async fn import(&self, tenant: &Tenant, rows: &[RawRow]) -> ApiResult<ImportReport> {
        let mut report = ImportReport::default();
        if rows.iter().any(|row| transfer::parse_row(row).is_none()) {
            report.error = IMPORT_MANDATORY_ERROR.to_owned();
            return Ok(report);
        }

        let org = self.organization(tenant).await?;
        for row in rows {
            let Some(parsed) = transfer::parse_row(row) else {
                continue;
            };
            let request = RegisterRequest {
                email: parsed.email,
                password: None,
                role: Some(Role::Student),
                first_name: parsed.first_name,
                middle_name: parsed.middle_name,
                last_name: parsed.last_name,
                city: String::new(),
                grade: String::new(),
                speciality: String::new(),
                gender: String::new(),
                examination: String::new(),
                phone: parsed.phone,
                custom_fields: Vec::new(),
                groups: Vec::new(),
                tags: Vec::new(),
            };
            match self.create_user(tenant, &org, request, &[]).await {
                Ok(_) => report.counts.created += 1,
                Err(ApiError::Conflict(_)) => {}
                Err(error) => {
                    tracing::warn!(error = %error, "import row failed");
                    report.counts.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn organization(&self, tenant: &Tenant) -> ApiResult<Organization> {
        self.store
            .organization_for_tenant(tenant.id)
            .await?
            .ok_or_else(|| ApiError::not_found("организация не найдена"))
    }

    async fn send_onboarding(
        &self,
        tenant: &Tenant,
        org: &Organization,
        user: &User,
        password: &str,
    ) {
        self.deliver(
            user,
            &notify::onboarding_subject(&org.title),
            &notify::onboarding_body(&tenant.domain, user, password),
        )
        .await;

        if !org.notify_about_clients {
            return;
        }
        let admin = match org.admin_id {
            Some(admin_id) => self.store.user_by_id_any(admin_id).await.ok().flatten(),
            None => None,
        };
        if let Some(admin) = admin {
            self.deliver(
                &admin,
                notify::admin_new_user_subject(user),
                &notify::admin_new_user_body(user),
            )
            .await;
        }
    }

    async fn deliver(&self, user: &User, subject: &str, body: &str) {
        if let Err(error) = self.notifier.send(user, subject, body).await {
            tracing::warn!(
                recipient = %user.email,
                error = %error,
                "notification delivery failed"
            );
        }
    }
}

fn apply_profile_changes(user: &mut User, req: &UpdateUserRequest) {
    if let Some(v) = &req.role {
        user.role = *v;
    }
    if let Some(v) = &req.first_name {
        user.first_name = v.clone();
    }
    if let Some(v) = &req.middle_name {
        user.middle_name = v.clone();
    }
    if let Some(v) = &req.last_name {
        user.last_name = v.clone();
    }
    if let Some(v) = &req.avatar {
        user.avatar = Some(v.clone());
    }
    if let Some(v) = &req.city {
        user.city = v.clone();
    }
    if let Some(v) = &req.position {
        user.position = v.clone();
    }
    if let Some(v) = &req.grade {
        user.grade = v.clone();
    }
    if let Some(v) = &req.gender {
        user.gender = v.clone();
    }
    if let Some(v) = &req.speciality {
        user.speciality = v.clone();
    }
    if let Some(v) = &req.examination {
        user.examination = v.clone();
    }
    if let Some(v) = &req.phone {
        user.phone = v.clone();
    }
    if let Some(v) = &req.address {
        user.address = v.clone();
    }
    if let Some(v) = &req.about {
        user.about = v.clone();
    }
    if let Some(v) = req.is_approved {
        user.is_approved = v;
    }
    if let Some(v) = &req.groups {
        user.groups = v.clone();
    }
    if let Some(v) = &req.tags {
        user.tags = v.clone();
    }
}

fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldRegistry;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use models::{FieldDefinition, FieldKind};
    use serde_json::json;
    use std::sync::Mutex;

    /// Test double: records every delivery, optionally failing for one
    /// address to simulate an undeliverable contact.
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String, String)>>,
        fail_for: Option<String>,
    }

    impl RecordingNotifier {
        fn failing_for(email: &str) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_for: Some(email.to_owned()),
            }
        }

        fn sent(&self) -> Vec<(String, String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, recipient: &User, subject: &str, body: &str) -> anyhow::Result<()> {
            if self.fail_for.as_deref() == Some(recipient.email.as_str()) {
                return Err(anyhow::anyhow!("mailbox unavailable"));
            }
            self.sent.lock().unwrap().push((
                recipient.email.clone(),
                subject.to_owned(),
                body.to_owned(),
            ));
            Ok(())
        }
    }

    async fn site(store: &MemoryStore) -> (Tenant, Organization) {
        let org = store
            .insert_organization(Organization {
                id: 0,
                title: "Учебный центр".into(),
                admin_id: None,
                notify_about_clients: false,
            })
            .await
            .unwrap();
        let tenant = store
            .insert_tenant(Tenant {
                id: 0,
                domain: "sdo".into(),
                organization_id: org.id,
                utc_offset_minutes: 180,
            })
            .await
            .unwrap();
        (tenant, org)
    }

    fn request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: Some("123qwe".into()),
            role: None,
            first_name: "Иван".into(),
            middle_name: String::new(),
            last_name: "Иванов".into(),
            city: String::new(),
            grade: String::new(),
            speciality: String::new(),
            gender: String::new(),
            examination: String::new(),
            phone: String::new(),
            custom_fields: Vec::new(),
            groups: Vec::new(),
            tags: Vec::new(),
        }
    }

    async fn licensed_field(store: &MemoryStore, org_id: i64, required: bool) -> FieldDefinition {
        store
            .insert_field(FieldDefinition {
                id: 0,
                organization_id: org_id,
                name: "Licensed".into(),
                kind: FieldKind::Dropdown,
                required,
                visible: true,
                choices: vec!["Yes".into(), "No".into()],
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email_case_insensitively() {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();
        let (tenant, _) = site(&store).await;
        let lifecycle = Lifecycle::new(&store, &notifier);

        lifecycle.register(&tenant, request("ivanov@sdo.ru")).await.unwrap();
        let err = lifecycle
            .register(&tenant, request("IVANOV@sdo.ru"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn register_requires_required_custom_field() {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();
        let (tenant, org) = site(&store).await;
        let field = licensed_field(&store, org.id, true).await;
        let lifecycle = Lifecycle::new(&store, &notifier);

        let err = lifecycle
            .register(&tenant, request("ivanov@sdo.ru"))
            .await
            .unwrap_err();
        match err {
            ApiError::Validation { field, .. } => assert_eq!(field, "Licensed"),
            other => panic!("expected validation error, got {other:?}"),
        }

        let mut req = request("ivanov@sdo.ru");
        req.custom_fields = vec![("Licensed".to_string(), json!("Yes"))];
        let user = lifecycle.register(&tenant, req).await.unwrap();

        assert_eq!(
            store.field_value(field.id, &user.email).await.unwrap(),
            Some("Yes".to_string())
        );
        let rendered = FieldRegistry::new(&store)
            .render_for_user(org.id, &user)
            .await
            .unwrap();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].name, "Licensed");
        assert_eq!(rendered[0].value.as_deref(), Some("Yes"));
    }

    #[tokio::test]
    async fn register_generates_credential_and_notifies() {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();
        let (tenant, _) = site(&store).await;
        let lifecycle = Lifecycle::new(&store, &notifier);

        let mut req = request("ivanov@sdo.ru");
        req.password = None;
        lifecycle.register(&tenant, req).await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ivanov@sdo.ru");
        assert_eq!(sent[0].1, "Учебный центр");
    }

    #[tokio::test]
    async fn admin_copy_respects_organization_opt_in() {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();
        let (tenant, _) = site(&store).await;
        let lifecycle = Lifecycle::new(&store, &notifier);
        let admin = lifecycle
            .register(&tenant, {
                let mut r = request("admin@sdo.ru");
                r.role = Some(Role::Admin);
                r
            })
            .await
            .unwrap();
        // an opted-in organization on a second site, run by the same admin
        let org2 = store
            .insert_organization(Organization {
                id: 0,
                title: "Филиал".into(),
                admin_id: Some(admin.id),
                notify_about_clients: true,
            })
            .await
            .unwrap();
        let tenant2 = store
            .insert_tenant(Tenant {
                id: 0,
                domain: "branch".into(),
                organization_id: org2.id,
                utc_offset_minutes: 180,
            })
            .await
            .unwrap();

        lifecycle
            .register(&tenant2, request("student@branch.ru"))
            .await
            .unwrap();

        let sent = notifier.sent();
        let admin_mail: Vec<_> = sent.iter().filter(|(to, _, _)| to == "admin@sdo.ru").collect();
        assert_eq!(admin_mail.len(), 1);
        assert_eq!(admin_mail[0].1, "Новый ученик");
    }

    #[tokio::test]
    async fn email_change_rekeys_field_values() {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();
        let (tenant, org) = site(&store).await;
        let field = licensed_field(&store, org.id, false).await;
        let lifecycle = Lifecycle::new(&store, &notifier);

        let mut req = request("old@sdo.ru");
        req.custom_fields = vec![("Licensed".to_string(), json!("No"))];
        let user = lifecycle.register(&tenant, req).await.unwrap();

        let update = UpdateUserRequest {
            email: Some("new@sdo.ru".into()),
            ..UpdateUserRequest::default()
        };
        let updated = lifecycle.update(&tenant, user.id, update).await.unwrap();
        assert_eq!(updated.email, "new@sdo.ru");

        assert_eq!(store.field_value(field.id, "old@sdo.ru").await.unwrap(), None);
        assert_eq!(
            store.field_value(field.id, "new@sdo.ru").await.unwrap(),
            Some("No".to_string())
        );
    }

    #[tokio::test]
    async fn purge_scrubs_field_values() {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();
        let (tenant, org) = site(&store).await;
        let field = licensed_field(&store, org.id, false).await;
        let lifecycle = Lifecycle::new(&store, &notifier);

        let mut req = request("ivanov@sdo.ru");
        req.custom_fields = vec![("Licensed".to_string(), json!("Yes"))];
        let user = lifecycle.register(&tenant, req).await.unwrap();

        lifecycle.purge(&tenant, user.id).await.unwrap();

        assert_eq!(
            store.field_value(field.id, "ivanov@sdo.ru").await.unwrap(),
            None
        );
        assert!(store.user_by_id(tenant.id, user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deactivate_keeps_field_values_for_reactivation() {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();
        let (tenant, org) = site(&store).await;
        let field = licensed_field(&store, org.id, false).await;
        let lifecycle = Lifecycle::new(&store, &notifier);

        let mut req = request("ivanov@sdo.ru");
        req.custom_fields = vec![("Licensed".to_string(), json!("Yes"))];
        let user = lifecycle.register(&tenant, req).await.unwrap();

        lifecycle.deactivate(&tenant, &[user.id]).await.unwrap();
        let stored = store.user_by_id(tenant.id, user.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(
            store.field_value(field.id, &user.email).await.unwrap(),
            Some("Yes".to_string())
        );

        lifecycle.activate_by_code(user.unsubscribe_code).await.unwrap();
        let stored = store.user_by_id(tenant.id, user.id).await.unwrap().unwrap();
        assert!(stored.is_active);
    }

    #[tokio::test]
    async fn unknown_activation_code_is_not_found() {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();
        let lifecycle = Lifecycle::new(&store, &notifier);
        let err = lifecycle.activate_by_code(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn batch_reset_survives_undeliverable_contact() {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::failing_for("b@sdo.ru");
        let (tenant, _) = site(&store).await;
        let lifecycle = Lifecycle::new(&store, &notifier);

        let a = lifecycle.register(&tenant, request("a@sdo.ru")).await.unwrap();
        let b = lifecycle.register(&tenant, request("b@sdo.ru")).await.unwrap();
        let c = lifecycle.register(&tenant, request("c@sdo.ru")).await.unwrap();

        let reset = lifecycle
            .batch_reset(&tenant, &[a.id, b.id, c.id])
            .await
            .unwrap();
        assert_eq!(reset, 3);

        // the two deliverable recipients got distinct generated passwords
        let bodies: Vec<String> = notifier
            .sent()
            .iter()
            .filter(|(_, subject, _)| subject == notify::BATCH_RESET_SUBJECT)
            .map(|(_, _, body)| body.clone())
            .collect();
        assert_eq!(bodies.len(), 2);
        assert_ne!(bodies[0], bodies[1]);
    }

    #[tokio::test]
    async fn import_aborts_on_missing_mandatory_columns() {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();
        let (tenant, _) = site(&store).await;
        let lifecycle = Lifecycle::new(&store, &notifier);

        let rows: Vec<RawRow> = vec![
            vec![
                Some("Иван".into()),
                None,
                Some("Иванов".into()),
                Some("i@sdo.ru".into()),
                None,
            ],
            vec![
                Some("Пётр".into()),
                None,
                Some("Петров".into()),
                Some("p@sdo.ru".into()),
                None,
            ],
            // email column missing
            vec![Some("Сидор".into()), None, Some("Сидоров".into()), None, None],
        ];

        let report = lifecycle.import(&tenant, &rows).await.unwrap();
        assert_eq!(report.counts.created, 0);
        assert_eq!(report.counts.failed, 0);
        assert!(!report.error.is_empty());
        assert!(store
            .user_by_email(tenant.id, "i@sdo.ru")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn import_writes_bare_rows_even_with_required_fields_defined() {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();
        let (tenant, org) = site(&store).await;
        licensed_field(&store, org.id, true).await;
        let lifecycle = Lifecycle::new(&store, &notifier);

        let rows: Vec<RawRow> = vec![vec![
            Some("Иван".into()),
            None,
            Some("Иванов".into()),
            Some("i@sdo.ru".into()),
            None,
        ]];
        let report = lifecycle.import(&tenant, &rows).await.unwrap();
        assert_eq!(report.counts.created, 1);
        assert_eq!(report.counts.failed, 0);
    }

    #[tokio::test]
    async fn import_creates_rows_and_skips_existing_emails() {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::default();
        let (tenant, _) = site(&store).await;
        let lifecycle = Lifecycle::new(&store, &notifier);
        lifecycle.register(&tenant, request("old@sdo.ru")).await.unwrap();

        let row = |first: &str, last: &str, email: &str| -> RawRow {
            vec![
                Some(first.into()),
                None,
                Some(last.into()),
                Some(email.into()),
                None,
            ]
        };
        let rows = vec![
            row("Иван", "Иванов", "i@sdo.ru"),
            row("Пётр", "Петров", "old@sdo.ru"),
            row("Сидор", "Сидоров", "s@sdo.ru"),
        ];

        let report = lifecycle.import(&tenant, &rows).await.unwrap();
        assert_eq!(report.counts.created, 2);
        assert_eq!(report.counts.failed, 0);
        assert!(report.error.is_empty());

        let imported = store
            .user_by_email(tenant.id, "i@sdo.ru")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(imported.role, Role::Student);
    }
}

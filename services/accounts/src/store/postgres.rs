//! Postgres backend. Runtime queries only; the composite lifecycle
//! operations wrap their steps in a single transaction so a crash mid-way
//! can never leave the value maps and the identity rows disagreeing.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::{
    AccessRequest, Diploma, FieldDefinition, FieldKind, Group, Note, NoteKind, Offering,
    OfferingKind, Organization, Payment, Role, Tag, Tenant, User,
};
use sqlx::{postgres::PgRow, Pool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::{
    DiplomaFilter, DirectoryStore, GroupFilter, NoteFilter, StoreResult, UserFilter, PAGE_SIZE,
};

const USER_SELECT: &str = r#"
    SELECT u.id, u.tenant_id, u.email, u.first_name, u.last_name, u.middle_name,
           u.avatar, u.role, u.city, u.position, u.grade, u.gender, u.speciality,
           u.examination, u.phone, u.address, u.about, u.is_active, u.is_staff,
           u.is_paid, u.is_approved, u.registered_at, u.unsubscribe_code,
           u.is_unsubscribed,
           COALESCE((SELECT ARRAY_AGG(ug.group_id ORDER BY ug.group_id)
                       FROM user_groups ug WHERE ug.user_id = u.id), '{}') AS group_ids,
           COALESCE((SELECT ARRAY_AGG(ut.tag_id ORDER BY ut.tag_id)
                       FROM user_tags ut WHERE ut.user_id = u.id), '{}') AS tag_ids
      FROM users u
"#;

const GROUP_SELECT: &str = r#"
    SELECT g.id, g.tenant_id, g.author_id, g.title, g.course_id, g.limit_access,
           g.date_start, g.date_end, g.duration, g.created_at,
           COALESCE((SELECT ARRAY_AGG(ug.user_id ORDER BY ug.user_id)
                       FROM user_groups ug WHERE ug.group_id = g.id), '{}') AS member_ids
      FROM groups g
"#;

pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn role_from_str(raw: &str) -> anyhow::Result<Role> {
    Role::parse(raw).ok_or_else(|| anyhow!("unknown role '{raw}'"))
}

fn note_kind_to_str(kind: NoteKind) -> &'static str {
    match kind {
        NoteKind::Diagnosis => "Клинический диагноз",
        NoteKind::Complaints => "Жалобы",
        NoteKind::CurrentState => "Текущее состояние",
        NoteKind::Notes => "Заметки",
    }
}

fn note_kind_from_str(raw: &str) -> anyhow::Result<NoteKind> {
    match raw {
        "Клинический диагноз" => Ok(NoteKind::Diagnosis),
        "Жалобы" => Ok(NoteKind::Complaints),
        "Текущее состояние" => Ok(NoteKind::CurrentState),
        "Заметки" => Ok(NoteKind::Notes),
        other => Err(anyhow!("unknown note kind '{other}'")),
    }
}

fn field_kind_to_str(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Checkbox => "checkbox",
        FieldKind::Text => "text",
        FieldKind::TextArea => "text_area",
        FieldKind::Dropdown => "dropdown",
        FieldKind::MultiChoice => "multi_choice",
        FieldKind::Date => "date",
        FieldKind::DateTime => "date_time",
    }
}

fn field_kind_from_str(raw: &str) -> anyhow::Result<FieldKind> {
    match raw {
        "checkbox" => Ok(FieldKind::Checkbox),
        "text" => Ok(FieldKind::Text),
        "text_area" => Ok(FieldKind::TextArea),
        "dropdown" => Ok(FieldKind::Dropdown),
        "multi_choice" => Ok(FieldKind::MultiChoice),
        "date" => Ok(FieldKind::Date),
        "date_time" => Ok(FieldKind::DateTime),
        other => Err(anyhow!("unknown field kind '{other}'")),
    }
}

fn offering_kind_to_str(kind: OfferingKind) -> &'static str {
    match kind {
        OfferingKind::Course => "course",
        OfferingKind::Webinar => "webinar",
    }
}

fn offering_kind_from_str(raw: &str) -> anyhow::Result<OfferingKind> {
    match raw {
        "course" => Ok(OfferingKind::Course),
        "webinar" => Ok(OfferingKind::Webinar),
        other => Err(anyhow!("unknown offering kind '{other}'")),
    }
}

fn row_to_user(row: &PgRow) -> anyhow::Result<User> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        middle_name: row.try_get("middle_name")?,
        avatar: row.try_get("avatar")?,
        role: role_from_str(&role)?,
        groups: row.try_get("group_ids")?,
        tags: row.try_get("tag_ids")?,
        city: row.try_get("city")?,
        position: row.try_get("position")?,
        grade: row.try_get("grade")?,
        gender: row.try_get("gender")?,
        speciality: row.try_get("speciality")?,
        examination: row.try_get("examination")?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
        about: row.try_get("about")?,
        is_active: row.try_get("is_active")?,
        is_staff: row.try_get("is_staff")?,
        is_paid: row.try_get("is_paid")?,
        is_approved: row.try_get("is_approved")?,
        registered_at: row.try_get("registered_at")?,
        unsubscribe_code: row.try_get("unsubscribe_code")?,
        is_unsubscribed: row.try_get("is_unsubscribed")?,
    })
}

fn row_to_group(row: &PgRow) -> anyhow::Result<Group> {
    let limit_access: i16 = row.try_get("limit_access")?;
    let duration: i16 = row.try_get("duration")?;
    Ok(Group {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        author_id: row.try_get("author_id")?,
        title: row.try_get("title")?,
        course_id: row.try_get("course_id")?,
        limit_access: limit_access.max(0) as u16,
        date_start: row.try_get("date_start")?,
        date_end: row.try_get("date_end")?,
        duration: duration.max(0) as u16,
        created_at: row.try_get("created_at")?,
        members: row.try_get("member_ids")?,
    })
}

fn row_to_note(row: &PgRow) -> anyhow::Result<Note> {
    let kind: String = row.try_get("kind")?;
    Ok(Note {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        author_id: row.try_get("author_id")?,
        user_id: row.try_get("user_id")?,
        kind: note_kind_from_str(&kind)?,
        title: row.try_get("title")?,
        text: row.try_get("text")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_diploma(row: &PgRow) -> anyhow::Result<Diploma> {
    Ok(Diploma {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        user_id: row.try_get("user_id")?,
        description: row.try_get("description")?,
        image: row.try_get("image")?,
    })
}

fn row_to_field(row: &PgRow) -> anyhow::Result<FieldDefinition> {
    let kind: String = row.try_get("kind")?;
    Ok(FieldDefinition {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        name: row.try_get("name")?,
        kind: field_kind_from_str(&kind)?,
        required: row.try_get("required")?,
        visible: row.try_get("visible")?,
        choices: row.try_get("choices")?,
    })
}

fn row_to_access_request(row: &PgRow) -> anyhow::Result<AccessRequest> {
    Ok(AccessRequest {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        user_id: row.try_get("user_id")?,
        group_id: row.try_get("group_id")?,
        offering_id: row.try_get("offering_id")?,
        access: row.try_get("access")?,
    })
}

#[async_trait]
impl DirectoryStore for PostgresStore {
    async fn insert_tenant(&self, tenant: Tenant) -> StoreResult<Tenant> {
        let row = sqlx::query(
            r#"INSERT INTO tenants (domain, organization_id, utc_offset_minutes)
               VALUES ($1, $2, $3) RETURNING id"#,
        )
        .bind(&tenant.domain)
        .bind(tenant.organization_id)
        .bind(tenant.utc_offset_minutes)
        .fetch_one(&self.pool)
        .await?;
        Ok(Tenant {
            id: row.try_get("id")?,
            ..tenant
        })
    }

    async fn insert_organization(&self, org: Organization) -> StoreResult<Organization> {
        let row = sqlx::query(
            r#"INSERT INTO organizations (title, admin_id, notify_about_clients)
               VALUES ($1, $2, $3) RETURNING id"#,
        )
        .bind(&org.title)
        .bind(org.admin_id)
        .bind(org.notify_about_clients)
        .fetch_one(&self.pool)
        .await?;
        Ok(Organization {
            id: row.try_get("id")?,
            ..org
        })
    }

    async fn insert_tag(&self, tag: Tag) -> StoreResult<Tag> {
        let row = sqlx::query(
            r#"INSERT INTO tags (organization_id, title) VALUES ($1, $2) RETURNING id"#,
        )
        .bind(tag.organization_id)
        .bind(&tag.title)
        .fetch_one(&self.pool)
        .await?;
        Ok(Tag {
            id: row.try_get("id")?,
            ..tag
        })
    }

    async fn tenant_by_id(&self, id: i64) -> StoreResult<Option<Tenant>> {
        let row = sqlx::query(
            r#"SELECT id, domain, organization_id, utc_offset_minutes FROM tenants WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(Tenant {
                id: row.try_get("id")?,
                domain: row.try_get("domain")?,
                organization_id: row.try_get("organization_id")?,
                utc_offset_minutes: row.try_get("utc_offset_minutes")?,
            })
        })
        .transpose()
    }

    async fn organization_for_tenant(&self, tenant_id: i64) -> StoreResult<Option<Organization>> {
        let row = sqlx::query(
            r#"SELECT o.id, o.title, o.admin_id, o.notify_about_clients
                 FROM organizations o
                 JOIN tenants t ON t.organization_id = o.id
                WHERE t.id = $1"#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(Organization {
                id: row.try_get("id")?,
                title: row.try_get("title")?,
                admin_id: row.try_get("admin_id")?,
                notify_about_clients: row.try_get("notify_about_clients")?,
            })
        })
        .transpose()
    }

    async fn tags_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<Tag>> {
        let rows = sqlx::query(
            r#"SELECT id, organization_id, title FROM tags WHERE id = ANY($1) ORDER BY id"#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Tag {
                    id: row.try_get("id")?,
                    organization_id: row.try_get("organization_id")?,
                    title: row.try_get("title")?,
                })
            })
            .collect()
    }

    async fn insert_user(
        &self,
        user: User,
        password_hash: &str,
        field_values: &[(i64, String)],
    ) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"INSERT INTO users (tenant_id, email, password_hash, first_name, last_name,
                                  middle_name, avatar, role, city, position, grade, gender,
                                  speciality, examination, phone, address, about, is_active,
                                  is_staff, is_paid, is_approved, registered_at,
                                  unsubscribe_code, is_unsubscribed)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                       $16, $17, $18, $19, $20, $21, $22, $23, $24)
               RETURNING id"#,
        )
        .bind(user.tenant_id)
        .bind(&user.email)
        .bind(password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.middle_name)
        .bind(&user.avatar)
        .bind(user.role.as_str())
        .bind(&user.city)
        .bind(&user.position)
        .bind(&user.grade)
        .bind(&user.gender)
        .bind(&user.speciality)
        .bind(&user.examination)
        .bind(&user.phone)
        .bind(&user.address)
        .bind(&user.about)
        .bind(user.is_active)
        .bind(user.is_staff)
        .bind(user.is_paid)
        .bind(user.is_approved)
        .bind(user.registered_at)
        .bind(user.unsubscribe_code)
        .bind(user.is_unsubscribed)
        .fetch_one(&mut *tx)
        .await?;
        let id: i64 = row.try_get("id")?;

        for group_id in &user.groups {
            sqlx::query(
                r#"INSERT INTO user_groups (user_id, group_id) VALUES ($1, $2)
                   ON CONFLICT DO NOTHING"#,
            )
            .bind(id)
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        }
        for tag_id in &user.tags {
            sqlx::query(
                r#"INSERT INTO user_tags (user_id, tag_id) VALUES ($1, $2)
                   ON CONFLICT DO NOTHING"#,
            )
            .bind(id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await?;
        }
        for (field_id, value) in field_values {
            sqlx::query(
                r#"INSERT INTO custom_field_values (field_id, email, value)
                   VALUES ($1, $2, $3)
                   ON CONFLICT (field_id, email) DO UPDATE SET value = EXCLUDED.value"#,
            )
            .bind(field_id)
            .bind(&user.email)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(User { id, ..user })
    }

    async fn user_by_id(&self, tenant_id: i64, id: i64) -> StoreResult<Option<User>> {
        let sql = format!("{USER_SELECT} WHERE u.tenant_id = $1 AND u.id = $2");
        let row = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn user_by_id_any(&self, id: i64) -> StoreResult<Option<User>> {
        let sql = format!("{USER_SELECT} WHERE u.id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn user_by_email(&self, tenant_id: i64, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("{USER_SELECT} WHERE u.tenant_id = $1 AND LOWER(u.email) = LOWER($2)");
        let row = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn user_by_code(&self, code: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("{USER_SELECT} WHERE u.unsubscribe_code = $1");
        let row = sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn list_users(&self, filter: &UserFilter) -> StoreResult<Vec<User>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(USER_SELECT);
        qb.push(" WHERE u.tenant_id = ").push_bind(filter.tenant_id);
        if filter.active_only {
            qb.push(" AND u.is_active = TRUE");
        }
        if let Some(teacher_id) = filter.visible_to_teacher {
            qb.push(
                " AND (u.role IN ('teacher', 'admin') OR (u.role = 'student' AND EXISTS ( \
                 SELECT 1 FROM user_groups ug JOIN groups g ON g.id = ug.group_id \
                 WHERE ug.user_id = u.id AND g.author_id = ",
            );
            qb.push_bind(teacher_id);
            qb.push(")))");
        }
        if let Some(role) = &filter.role {
            qb.push(" AND u.role = ").push_bind(role.clone());
        }
        if let Some(roles) = &filter.role_in {
            qb.push(" AND u.role = ANY(").push_bind(roles.clone()).push(")");
        }
        if let Some(ids) = &filter.ids {
            qb.push(" AND u.id = ANY(").push_bind(ids.clone()).push(")");
        }
        qb.push(" ORDER BY u.id DESC");
        if let Some(page) = filter.page {
            qb.push(" LIMIT ").push_bind(PAGE_SIZE as i64);
            qb.push(" OFFSET ").push_bind(page as i64 * PAGE_SIZE as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_user).collect()
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"UPDATE users
                  SET first_name = $2, last_name = $3, middle_name = $4, avatar = $5,
                      role = $6, city = $7, position = $8, grade = $9, gender = $10,
                      speciality = $11, examination = $12, phone = $13, address = $14,
                      about = $15, is_approved = $16, is_unsubscribed = $17
                WHERE id = $1"#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.middle_name)
        .bind(&user.avatar)
        .bind(user.role.as_str())
        .bind(&user.city)
        .bind(&user.position)
        .bind(&user.grade)
        .bind(&user.gender)
        .bind(&user.speciality)
        .bind(&user.examination)
        .bind(&user.phone)
        .bind(&user.address)
        .bind(&user.about)
        .bind(user.is_approved)
        .bind(user.is_unsubscribed)
        .execute(&mut *tx)
        .await?;

        sqlx::query(r#"DELETE FROM user_groups WHERE user_id = $1 AND group_id <> ALL($2)"#)
            .bind(user.id)
            .bind(&user.groups)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"INSERT INTO user_groups (user_id, group_id)
               SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING"#,
        )
        .bind(user.id)
        .bind(&user.groups)
        .execute(&mut *tx)
        .await?;

        sqlx::query(r#"DELETE FROM user_tags WHERE user_id = $1 AND tag_id <> ALL($2)"#)
            .bind(user.id)
            .bind(&user.tags)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"INSERT INTO user_tags (user_id, tag_id)
               SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING"#,
        )
        .bind(user.id)
        .bind(&user.tags)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn rename_user_email(&self, id: i64, new_email: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let old_email: Option<String> =
            sqlx::query_scalar(r#"SELECT email FROM users WHERE id = $1 FOR UPDATE"#)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let old_email = old_email.ok_or_else(|| anyhow!("user {id} not found"))?;

        // re-key the value maps of the user's organization first, then the
        // identity row; both become visible together on commit
        sqlx::query(
            r#"UPDATE custom_field_values v
                  SET email = $3
                 FROM custom_fields cf, tenants t, users u
                WHERE v.field_id = cf.id
                  AND u.id = $1
                  AND t.id = u.tenant_id
                  AND cf.organization_id = t.organization_id
                  AND v.email = $2"#,
        )
        .bind(id)
        .bind(&old_email)
        .bind(new_email)
        .execute(&mut *tx)
        .await?;

        sqlx::query(r#"UPDATE users SET email = $2 WHERE id = $1"#)
            .bind(id)
            .bind(new_email)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_users_active(
        &self,
        tenant_id: i64,
        ids: &[i64],
        active: bool,
    ) -> StoreResult<()> {
        sqlx::query(r#"UPDATE users SET is_active = $3 WHERE tenant_id = $1 AND id = ANY($2)"#)
            .bind(tenant_id)
            .bind(ids)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_user(&self, id: i64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"DELETE FROM custom_field_values v
                USING custom_fields cf, tenants t, users u
                WHERE v.field_id = cf.id
                  AND u.id = $1
                  AND t.id = u.tenant_id
                  AND cf.organization_id = t.organization_id
                  AND v.email = u.email"#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        // group/note/diploma references degrade via their FK actions
        let result = sqlx::query(r#"DELETE FROM users WHERE id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("user {id} not found"));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_password_hash(&self, id: i64, hash: &str) -> StoreResult<()> {
        let result = sqlx::query(r#"UPDATE users SET password_hash = $2 WHERE id = $1"#)
            .bind(id)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("user {id} not found"));
        }
        Ok(())
    }

    async fn insert_group(&self, group: Group) -> StoreResult<Group> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"INSERT INTO groups (tenant_id, author_id, title, course_id, limit_access,
                                   date_start, date_end, duration, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING id"#,
        )
        .bind(group.tenant_id)
        .bind(group.author_id)
        .bind(&group.title)
        .bind(group.course_id)
        .bind(group.limit_access as i16)
        .bind(group.date_start)
        .bind(group.date_end)
        .bind(group.duration as i16)
        .bind(group.created_at)
        .fetch_one(&mut *tx)
        .await?;
        let id: i64 = row.try_get("id")?;

        for member in &group.members {
            sqlx::query(
                r#"INSERT INTO user_groups (user_id, group_id) VALUES ($1, $2)
                   ON CONFLICT DO NOTHING"#,
            )
            .bind(member)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Group { id, ..group })
    }

    async fn group_by_id(&self, tenant_id: i64, id: i64) -> StoreResult<Option<Group>> {
        let sql = format!("{GROUP_SELECT} WHERE g.tenant_id = $1 AND g.id = $2");
        let row = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_group).transpose()
    }

    async fn groups_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<Group>> {
        let sql = format!("{GROUP_SELECT} WHERE g.id = ANY($1) ORDER BY g.id");
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_group).collect()
    }

    async fn list_groups(&self, filter: &GroupFilter) -> StoreResult<Vec<Group>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(GROUP_SELECT);
        qb.push(" WHERE g.tenant_id = ").push_bind(filter.tenant_id);
        if let Some(course_id) = filter.course_id {
            qb.push(" AND g.course_id = ").push_bind(course_id);
        }
        qb.push(" ORDER BY g.created_at");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_group).collect()
    }

    async fn update_group(&self, group: &Group) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"UPDATE groups
                  SET title = $2, course_id = $3, limit_access = $4, date_start = $5,
                      date_end = $6, duration = $7
                WHERE id = $1"#,
        )
        .bind(group.id)
        .bind(&group.title)
        .bind(group.course_id)
        .bind(group.limit_access as i16)
        .bind(group.date_start)
        .bind(group.date_end)
        .bind(group.duration as i16)
        .execute(&mut *tx)
        .await?;

        sqlx::query(r#"DELETE FROM user_groups WHERE group_id = $1 AND user_id <> ALL($2)"#)
            .bind(group.id)
            .bind(&group.members)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"INSERT INTO user_groups (user_id, group_id)
               SELECT UNNEST($2::BIGINT[]), $1 ON CONFLICT DO NOTHING"#,
        )
        .bind(group.id)
        .bind(&group.members)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_groups(&self, tenant_id: i64, ids: &[i64]) -> StoreResult<()> {
        sqlx::query(r#"DELETE FROM groups WHERE tenant_id = $1 AND id = ANY($2)"#)
            .bind(tenant_id)
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_note(&self, note: Note) -> StoreResult<Note> {
        let row = sqlx::query(
            r#"INSERT INTO notes (tenant_id, author_id, user_id, kind, title, text, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id"#,
        )
        .bind(note.tenant_id)
        .bind(note.author_id)
        .bind(note.user_id)
        .bind(note_kind_to_str(note.kind))
        .bind(&note.title)
        .bind(&note.text)
        .bind(note.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(Note {
            id: row.try_get("id")?,
            ..note
        })
    }

    async fn note_by_id(&self, tenant_id: i64, id: i64) -> StoreResult<Option<Note>> {
        let row = sqlx::query(r#"SELECT * FROM notes WHERE tenant_id = $1 AND id = $2"#)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_note).transpose()
    }

    async fn list_notes(&self, filter: &NoteFilter) -> StoreResult<Vec<Note>> {
        if filter.empty {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM notes");
        qb.push(" WHERE tenant_id = ").push_bind(filter.tenant_id);
        if let Some(user_id) = filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        qb.push(" ORDER BY created_at");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_note).collect()
    }

    async fn update_note(&self, note: &Note) -> StoreResult<()> {
        sqlx::query(
            r#"UPDATE notes SET user_id = $2, kind = $3, title = $4, text = $5 WHERE id = $1"#,
        )
        .bind(note.id)
        .bind(note.user_id)
        .bind(note_kind_to_str(note.kind))
        .bind(&note.title)
        .bind(&note.text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_note(&self, tenant_id: i64, id: i64) -> StoreResult<()> {
        sqlx::query(r#"DELETE FROM notes WHERE tenant_id = $1 AND id = $2"#)
            .bind(tenant_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_diploma(&self, diploma: Diploma) -> StoreResult<Diploma> {
        let row = sqlx::query(
            r#"INSERT INTO diplomas (tenant_id, user_id, description, image)
               VALUES ($1, $2, $3, $4) RETURNING id"#,
        )
        .bind(diploma.tenant_id)
        .bind(diploma.user_id)
        .bind(&diploma.description)
        .bind(&diploma.image)
        .fetch_one(&self.pool)
        .await?;
        Ok(Diploma {
            id: row.try_get("id")?,
            ..diploma
        })
    }

    async fn diploma_by_id(&self, tenant_id: i64, id: i64) -> StoreResult<Option<Diploma>> {
        let row = sqlx::query(r#"SELECT * FROM diplomas WHERE tenant_id = $1 AND id = $2"#)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_diploma).transpose()
    }

    async fn list_diplomas(&self, filter: &DiplomaFilter) -> StoreResult<Vec<Diploma>> {
        if filter.empty {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM diplomas");
        qb.push(" WHERE tenant_id = ").push_bind(filter.tenant_id);
        if let Some(user_id) = filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        qb.push(" ORDER BY id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_diploma).collect()
    }

    async fn update_diploma(&self, diploma: &Diploma) -> StoreResult<()> {
        sqlx::query(
            r#"UPDATE diplomas SET user_id = $2, description = $3, image = $4 WHERE id = $1"#,
        )
        .bind(diploma.id)
        .bind(diploma.user_id)
        .bind(&diploma.description)
        .bind(&diploma.image)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_diploma(&self, tenant_id: i64, id: i64) -> StoreResult<()> {
        sqlx::query(r#"DELETE FROM diplomas WHERE tenant_id = $1 AND id = $2"#)
            .bind(tenant_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_field(&self, def: FieldDefinition) -> StoreResult<FieldDefinition> {
        let row = sqlx::query(
            r#"INSERT INTO custom_fields (organization_id, name, kind, required, visible, choices)
               VALUES ($1, $2, $3, $4, $5, $6) RETURNING id"#,
        )
        .bind(def.organization_id)
        .bind(&def.name)
        .bind(field_kind_to_str(def.kind))
        .bind(def.required)
        .bind(def.visible)
        .bind(&def.choices)
        .fetch_one(&self.pool)
        .await?;
        Ok(FieldDefinition {
            id: row.try_get("id")?,
            ..def
        })
    }

    async fn fields_for_organization(&self, org_id: i64) -> StoreResult<Vec<FieldDefinition>> {
        let rows = sqlx::query(
            r#"SELECT id, organization_id, name, kind, required, visible, choices
                 FROM custom_fields WHERE organization_id = $1 ORDER BY id"#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_field).collect()
    }

    async fn field_value(&self, field_id: i64, email: &str) -> StoreResult<Option<String>> {
        let value = sqlx::query_scalar(
            r#"SELECT value FROM custom_field_values WHERE field_id = $1 AND email = $2"#,
        )
        .bind(field_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn set_field_value(
        &self,
        field_id: i64,
        email: &str,
        value: Option<&str>,
    ) -> StoreResult<()> {
        match value {
            Some(value) => {
                sqlx::query(
                    r#"INSERT INTO custom_field_values (field_id, email, value)
                       VALUES ($1, $2, $3)
                       ON CONFLICT (field_id, email) DO UPDATE SET value = EXCLUDED.value"#,
                )
                .bind(field_id)
                .bind(email)
                .bind(value)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"DELETE FROM custom_field_values WHERE field_id = $1 AND email = $2"#,
                )
                .bind(field_id)
                .bind(email)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn insert_offering(&self, offering: Offering) -> StoreResult<Offering> {
        let row = sqlx::query(
            r#"INSERT INTO offerings (tenant_id, title, kind, authors)
               VALUES ($1, $2, $3, $4) RETURNING id"#,
        )
        .bind(offering.tenant_id)
        .bind(&offering.title)
        .bind(offering_kind_to_str(offering.kind))
        .bind(&offering.authors)
        .fetch_one(&self.pool)
        .await?;
        Ok(Offering {
            id: row.try_get("id")?,
            ..offering
        })
    }

    async fn insert_access_request(&self, request: AccessRequest) -> StoreResult<AccessRequest> {
        let row = sqlx::query(
            r#"INSERT INTO access_requests (tenant_id, user_id, group_id, offering_id, access)
               VALUES ($1, $2, $3, $4, $5) RETURNING id"#,
        )
        .bind(request.tenant_id)
        .bind(request.user_id)
        .bind(request.group_id)
        .bind(request.offering_id)
        .bind(request.access)
        .fetch_one(&self.pool)
        .await?;
        Ok(AccessRequest {
            id: row.try_get("id")?,
            ..request
        })
    }

    async fn insert_payment(&self, payment: Payment) -> StoreResult<Payment> {
        let row = sqlx::query(
            r#"INSERT INTO payments (access_request_id, amount, is_paid, paid_at)
               VALUES ($1, $2, $3, $4) RETURNING id"#,
        )
        .bind(payment.access_request_id)
        .bind(payment.amount)
        .bind(payment.is_paid)
        .bind(payment.paid_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(Payment {
            id: row.try_get("id")?,
            ..payment
        })
    }

    async fn offering_by_id(&self, id: i64) -> StoreResult<Option<Offering>> {
        let row = sqlx::query(
            r#"SELECT id, tenant_id, title, kind, authors FROM offerings WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            let kind: String = row.try_get("kind")?;
            Ok(Offering {
                id: row.try_get("id")?,
                tenant_id: row.try_get("tenant_id")?,
                title: row.try_get("title")?,
                kind: offering_kind_from_str(&kind)?,
                authors: row.try_get("authors")?,
            })
        })
        .transpose()
    }

    async fn access_requests_for_user(
        &self,
        tenant_id: i64,
        user_id: i64,
    ) -> StoreResult<Vec<AccessRequest>> {
        let rows = sqlx::query(
            r#"SELECT * FROM access_requests WHERE tenant_id = $1 AND user_id = $2 ORDER BY id"#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_access_request).collect()
    }

    async fn access_requests_for_group(
        &self,
        tenant_id: i64,
        group_id: i64,
    ) -> StoreResult<Vec<AccessRequest>> {
        let rows = sqlx::query(
            r#"SELECT * FROM access_requests WHERE tenant_id = $1 AND group_id = $2 ORDER BY id"#,
        )
        .bind(tenant_id)
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_access_request).collect()
    }

    async fn payments_for_access_request(&self, request_id: i64) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query(
            r#"SELECT id, access_request_id, amount, is_paid, paid_at
                 FROM payments WHERE access_request_id = $1 ORDER BY id"#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Payment {
                    id: row.try_get("id")?,
                    access_request_id: row.try_get("access_request_id")?,
                    amount: row.try_get("amount")?,
                    is_paid: row.try_get("is_paid")?,
                    paid_at: row.try_get("paid_at")?,
                })
            })
            .collect()
    }

    async fn paid_payments_between(
        &self,
        tenant_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<(Payment, AccessRequest)>> {
        let rows = sqlx::query(
            r#"SELECT p.id AS p_id, p.access_request_id, p.amount, p.is_paid, p.paid_at,
                      r.id AS r_id, r.tenant_id, r.user_id, r.group_id, r.offering_id, r.access
                 FROM payments p
                 JOIN access_requests r ON r.id = p.access_request_id
                WHERE r.tenant_id = $1 AND p.is_paid AND p.paid_at >= $2 AND p.paid_at < $3
                ORDER BY p.id"#,
        )
        .bind(tenant_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let payment = Payment {
                    id: row.try_get("p_id")?,
                    access_request_id: row.try_get("access_request_id")?,
                    amount: row.try_get("amount")?,
                    is_paid: row.try_get("is_paid")?,
                    paid_at: row.try_get("paid_at")?,
                };
                let request = AccessRequest {
                    id: row.try_get("r_id")?,
                    tenant_id: row.try_get("tenant_id")?,
                    user_id: row.try_get("user_id")?,
                    group_id: row.try_get("group_id")?,
                    offering_id: row.try_get("offering_id")?,
                    access: row.try_get("access")?,
                };
                Ok((payment, request))
            })
            .collect()
    }
}

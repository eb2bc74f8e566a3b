//! Visibility Filter Engine: maps a requester (role + tenant) and the
//! request's query parameters to a typed store filter.
//!
//! Every rule narrows, never widens: the tenant scope is always present and
//! handlers have no way around these filters. Unparsable optional query
//! parameters degrade to "filter ignored" — they never surface as errors.

use dto::{DiplomaListParams, GroupListParams, NoteListParams, UserListParams};
use models::{OfferingKind, Role, User};

use crate::auth::Requester;
use crate::store::{DiplomaFilter, DirectoryStore, GroupFilter, NoteFilter, StoreResult, UserFilter};

/// Users: same tenant, active only. A teacher sees colleagues, admins, and
/// exactly the students enrolled in a group the teacher authored.
pub fn user_filter(requester: &Requester, tenant_id: i64, params: &UserListParams) -> UserFilter {
    let mut filter = UserFilter {
        tenant_id,
        active_only: true,
        ..UserFilter::default()
    };

    if let Requester::Known {
        id,
        role: Role::Teacher,
        ..
    } = requester
    {
        filter.visible_to_teacher = Some(*id);
    }

    if let Some(role) = params.role.as_deref() {
        if !role.is_empty() {
            filter.role = Some(role.to_owned());
        }
    }

    if let Some(raw) = params.filter.as_deref() {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
            if let Some(roles) = value.get("role").and_then(|r| r.as_array()) {
                filter.role_in = Some(
                    roles
                        .iter()
                        .filter_map(|r| r.as_str().map(str::to_owned))
                        .collect(),
                );
            }
        }
    }

    filter.page = params.page.as_deref().and_then(|p| p.parse().ok());
    filter
}

/// Groups: same tenant; the course filter applies only when it parses.
pub fn group_filter(tenant_id: i64, params: &GroupListParams) -> GroupFilter {
    GroupFilter {
        tenant_id,
        course_id: params.course.as_deref().and_then(|c| c.parse().ok()),
    }
}

/// Diplomas: same tenant; `my` pins the requester as owner, an explicit
/// user id pins that owner. Both at once must agree or nothing matches.
pub fn diploma_filter(
    requester: &Requester,
    tenant_id: i64,
    params: &DiplomaListParams,
) -> DiplomaFilter {
    let mut filter = DiplomaFilter {
        tenant_id,
        ..DiplomaFilter::default()
    };

    if params.my.is_some() {
        match requester.id() {
            Some(id) => filter.user_id = Some(id),
            None => filter.empty = true,
        }
    }

    if let Some(user_id) = params.user.as_deref().and_then(|u| u.parse::<i64>().ok()) {
        if filter.user_id.is_some_and(|mine| mine != user_id) {
            filter.empty = true;
        } else {
            filter.user_id = Some(user_id);
        }
    }

    filter
}

/// Notes: hidden from anonymous and student requesters. A teacher asking
/// about a specific student sees the notes only when one of the student's
/// access requests (direct or via a group) points at a course the teacher
/// authors. Admins see the tenant-scoped set.
pub async fn note_filter(
    store: &dyn DirectoryStore,
    requester: &Requester,
    tenant_id: i64,
    params: &NoteListParams,
) -> StoreResult<NoteFilter> {
    let mut filter = NoteFilter {
        tenant_id,
        ..NoteFilter::default()
    };

    let role = match requester.role() {
        None | Some(Role::Student) => {
            filter.empty = true;
            return Ok(filter);
        }
        Some(role) => role,
    };

    filter.user_id = params.user.as_deref().and_then(|u| u.parse().ok());

    if role == Role::Teacher {
        if let Some(student_id) = filter.user_id {
            let teacher_id = requester.id().unwrap_or_default();
            let student = store.user_by_id(tenant_id, student_id).await?;
            let allowed = match student {
                Some(student) => {
                    teaches_student(store, tenant_id, teacher_id, &student).await?
                }
                None => false,
            };
            if !allowed {
                filter.empty = true;
            }
        }
    }

    Ok(filter)
}

/// Whether the teacher authors a course reachable from the student's access
/// requests, directly or through one of the student's groups.
pub async fn teaches_student(
    store: &dyn DirectoryStore,
    tenant_id: i64,
    teacher_id: i64,
    student: &User,
) -> StoreResult<bool> {
    let mut requests = store.access_requests_for_user(tenant_id, student.id).await?;
    for group_id in &student.groups {
        requests.extend(store.access_requests_for_group(tenant_id, *group_id).await?);
    }
    for request in requests {
        let Some(offering_id) = request.offering_id else {
            continue;
        };
        if let Some(offering) = store.offering_by_id(offering_id).await? {
            if offering.kind == OfferingKind::Course && offering.authors.contains(&teacher_id) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// The `my_student` check: admins and anonymous requesters short-circuit to
/// true; a teacher must author a course the student has a *direct* access
/// request against.
pub async fn is_my_student(
    store: &dyn DirectoryStore,
    requester: &Requester,
    tenant_id: i64,
    student_id: i64,
) -> StoreResult<bool> {
    let teacher_id = match requester {
        Requester::Anonymous => return Ok(true),
        Requester::Known { role: Role::Admin, .. } => return Ok(true),
        Requester::Known { id, .. } => *id,
    };
    for request in store.access_requests_for_user(tenant_id, student_id).await? {
        let Some(offering_id) = request.offering_id else {
            continue;
        };
        if let Some(offering) = store.offering_by_id(offering_id).await? {
            if offering.kind == OfferingKind::Course && offering.authors.contains(&teacher_id) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, PAGE_SIZE};
    use chrono::Utc;
    use models::{
        AccessRequest, Group, Note, NoteKind, Offering, Organization, Tenant, User,
    };
    use uuid::Uuid;

    async fn site(store: &MemoryStore) -> Tenant {
        let org = store
            .insert_organization(Organization {
                id: 0,
                title: "Орг".into(),
                admin_id: None,
                notify_about_clients: false,
            })
            .await
            .unwrap();
        store
            .insert_tenant(Tenant {
                id: 0,
                domain: "sdo".into(),
                organization_id: org.id,
                utc_offset_minutes: 180,
            })
            .await
            .unwrap()
    }

    fn blank_user(tenant_id: i64, email: &str, role: Role) -> User {
        User {
            id: 0,
            tenant_id,
            email: email.into(),
            first_name: "Имя".into(),
            last_name: "Фамилия".into(),
            middle_name: String::new(),
            avatar: None,
            role,
            groups: vec![],
            tags: vec![],
            city: String::new(),
            position: String::new(),
            grade: String::new(),
            gender: String::new(),
            speciality: String::new(),
            examination: String::new(),
            phone: String::new(),
            address: String::new(),
            about: String::new(),
            is_active: true,
            is_staff: false,
            is_paid: true,
            is_approved: false,
            registered_at: Utc::now(),
            unsubscribe_code: Uuid::new_v4(),
            is_unsubscribed: false,
        }
    }

    async fn add_user(store: &MemoryStore, tenant_id: i64, email: &str, role: Role) -> User {
        store
            .insert_user(blank_user(tenant_id, email, role), "hash", &[])
            .await
            .unwrap()
    }

    fn known(user: &User) -> Requester {
        Requester::Known {
            id: user.id,
            tenant_id: user.tenant_id,
            role: user.role,
        }
    }

    #[tokio::test]
    async fn teacher_sees_only_own_students() {
        let store = MemoryStore::new();
        let tenant = site(&store).await;
        let teacher = add_user(&store, tenant.id, "t@sdo.ru", Role::Teacher).await;
        let other_teacher = add_user(&store, tenant.id, "t2@sdo.ru", Role::Teacher).await;
        let admin = add_user(&store, tenant.id, "a@sdo.ru", Role::Admin).await;
        let mine = add_user(&store, tenant.id, "s1@sdo.ru", Role::Student).await;
        let foreign = add_user(&store, tenant.id, "s2@sdo.ru", Role::Student).await;

        store
            .insert_group(Group {
                id: 0,
                tenant_id: tenant.id,
                author_id: Some(teacher.id),
                title: "Моя группа".into(),
                course_id: None,
                limit_access: 10,
                date_start: None,
                date_end: None,
                duration: 30,
                created_at: Utc::now(),
                members: vec![mine.id],
            })
            .await
            .unwrap();
        store
            .insert_group(Group {
                id: 0,
                tenant_id: tenant.id,
                author_id: Some(other_teacher.id),
                title: "Чужая группа".into(),
                course_id: None,
                limit_access: 10,
                date_start: None,
                date_end: None,
                duration: 30,
                created_at: Utc::now(),
                members: vec![foreign.id],
            })
            .await
            .unwrap();

        let filter = user_filter(&known(&teacher), tenant.id, &UserListParams::default());
        let visible = store.list_users(&filter).await.unwrap();
        let ids: Vec<i64> = visible.iter().map(|u| u.id).collect();

        assert!(ids.contains(&teacher.id));
        assert!(ids.contains(&other_teacher.id));
        assert!(ids.contains(&admin.id));
        assert!(ids.contains(&mine.id));
        assert!(!ids.contains(&foreign.id));
    }

    #[tokio::test]
    async fn inactive_and_foreign_tenant_users_are_hidden() {
        let store = MemoryStore::new();
        let tenant = site(&store).await;
        let other = site(&store).await;
        let admin = add_user(&store, tenant.id, "a@sdo.ru", Role::Admin).await;
        let gone = add_user(&store, tenant.id, "gone@sdo.ru", Role::Student).await;
        add_user(&store, other.id, "b@other.ru", Role::Student).await;
        store
            .set_users_active(tenant.id, &[gone.id], false)
            .await
            .unwrap();

        let filter = user_filter(&known(&admin), tenant.id, &UserListParams::default());
        let visible = store.list_users(&filter).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, admin.id);
    }

    #[tokio::test]
    async fn role_set_filter_ands_in() {
        let store = MemoryStore::new();
        let tenant = site(&store).await;
        let admin = add_user(&store, tenant.id, "a@sdo.ru", Role::Admin).await;
        add_user(&store, tenant.id, "t@sdo.ru", Role::Teacher).await;
        add_user(&store, tenant.id, "s@sdo.ru", Role::Student).await;

        let params = UserListParams {
            filter: Some(r#"{"role": ["student", "teacher"]}"#.into()),
            ..UserListParams::default()
        };
        let visible = store
            .list_users(&user_filter(&known(&admin), tenant.id, &params))
            .await
            .unwrap();
        assert_eq!(visible.len(), 2);

        // garbage in the filter parameter is ignored, not an error
        let params = UserListParams {
            filter: Some("{not json".into()),
            ..UserListParams::default()
        };
        let visible = store
            .list_users(&user_filter(&known(&admin), tenant.id, &params))
            .await
            .unwrap();
        assert_eq!(visible.len(), 3);
    }

    #[tokio::test]
    async fn pagination_slices_by_descending_id() {
        let store = MemoryStore::new();
        let tenant = site(&store).await;
        let mut ids = Vec::new();
        for i in 0..45 {
            ids.push(add_user(&store, tenant.id, &format!("u{i}@sdo.ru"), Role::Student).await.id);
        }
        let admin = add_user(&store, tenant.id, "a@sdo.ru", Role::Admin).await;
        ids.push(admin.id);

        ids.sort_by(|a, b| b.cmp(a));

        let params = UserListParams {
            page: Some("1".into()),
            ..UserListParams::default()
        };
        let page = store
            .list_users(&user_filter(&known(&admin), tenant.id, &params))
            .await
            .unwrap();

        assert_eq!(page.len(), PAGE_SIZE);
        let expected: Vec<i64> = ids[PAGE_SIZE..2 * PAGE_SIZE].to_vec();
        let got: Vec<i64> = page.iter().map(|u| u.id).collect();
        assert_eq!(got, expected);

        // unparsable page parameter falls back to the full listing
        let params = UserListParams {
            page: Some("abc".into()),
            ..UserListParams::default()
        };
        let all = store
            .list_users(&user_filter(&known(&admin), tenant.id, &params))
            .await
            .unwrap();
        assert_eq!(all.len(), 46);
    }

    #[tokio::test]
    async fn unparsable_course_filter_is_ignored() {
        let store = MemoryStore::new();
        let tenant = site(&store).await;
        let filter = group_filter(
            tenant.id,
            &GroupListParams {
                course: Some("abc".into()),
            },
        );
        assert_eq!(filter.course_id, None);
    }

    #[tokio::test]
    async fn notes_hidden_from_anonymous_and_students() {
        let store = MemoryStore::new();
        let tenant = site(&store).await;
        let student = add_user(&store, tenant.id, "s@sdo.ru", Role::Student).await;
        store
            .insert_note(Note {
                id: 0,
                tenant_id: tenant.id,
                author_id: None,
                user_id: Some(student.id),
                kind: NoteKind::Notes,
                title: None,
                text: Some("запись".into()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        for requester in [Requester::Anonymous, known(&student)] {
            let filter = note_filter(&store, &requester, tenant.id, &NoteListParams::default())
                .await
                .unwrap();
            assert!(store.list_notes(&filter).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn teacher_note_access_requires_course_authorship() {
        let store = MemoryStore::new();
        let tenant = site(&store).await;
        let teacher = add_user(&store, tenant.id, "t@sdo.ru", Role::Teacher).await;
        let student = add_user(&store, tenant.id, "s@sdo.ru", Role::Student).await;
        store
            .insert_note(Note {
                id: 0,
                tenant_id: tenant.id,
                author_id: Some(teacher.id),
                user_id: Some(student.id),
                kind: NoteKind::Diagnosis,
                title: Some("Заголовок".into()),
                text: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let params = NoteListParams {
            user: Some(student.id.to_string()),
        };

        // no access request at all -> hidden
        let filter = note_filter(&store, &known(&teacher), tenant.id, &params)
            .await
            .unwrap();
        assert!(store.list_notes(&filter).await.unwrap().is_empty());

        // access request against a course the teacher authors -> visible
        let course = store
            .insert_offering(Offering {
                id: 0,
                tenant_id: tenant.id,
                title: "Курс".into(),
                kind: OfferingKind::Course,
                authors: vec![teacher.id],
            })
            .await
            .unwrap();
        store
            .insert_access_request(AccessRequest {
                id: 0,
                tenant_id: tenant.id,
                user_id: Some(student.id),
                group_id: None,
                offering_id: Some(course.id),
                access: true,
            })
            .await
            .unwrap();

        let filter = note_filter(&store, &known(&teacher), tenant.id, &params)
            .await
            .unwrap();
        assert_eq!(store.list_notes(&filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn teacher_note_access_via_student_group() {
        let store = MemoryStore::new();
        let tenant = site(&store).await;
        let teacher = add_user(&store, tenant.id, "t@sdo.ru", Role::Teacher).await;
        let student = add_user(&store, tenant.id, "s@sdo.ru", Role::Student).await;
        let group = store
            .insert_group(Group {
                id: 0,
                tenant_id: tenant.id,
                author_id: None,
                title: "Группа".into(),
                course_id: None,
                limit_access: 10,
                date_start: None,
                date_end: None,
                duration: 30,
                created_at: Utc::now(),
                members: vec![student.id],
            })
            .await
            .unwrap();
        let course = store
            .insert_offering(Offering {
                id: 0,
                tenant_id: tenant.id,
                title: "Курс".into(),
                kind: OfferingKind::Course,
                authors: vec![teacher.id],
            })
            .await
            .unwrap();
        store
            .insert_access_request(AccessRequest {
                id: 0,
                tenant_id: tenant.id,
                user_id: None,
                group_id: Some(group.id),
                offering_id: Some(course.id),
                access: true,
            })
            .await
            .unwrap();

        let student = store.user_by_id(tenant.id, student.id).await.unwrap().unwrap();
        assert!(teaches_student(&store, tenant.id, teacher.id, &student)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn diploma_filter_mine_and_user_must_agree() {
        let store = MemoryStore::new();
        let tenant = site(&store).await;
        let user = add_user(&store, tenant.id, "u@sdo.ru", Role::Student).await;

        let mine = diploma_filter(
            &known(&user),
            tenant.id,
            &DiplomaListParams {
                my: Some("1".into()),
                user: None,
            },
        );
        assert_eq!(mine.user_id, Some(user.id));
        assert!(!mine.empty);

        let conflicting = diploma_filter(
            &known(&user),
            tenant.id,
            &DiplomaListParams {
                my: Some("1".into()),
                user: Some((user.id + 1).to_string()),
            },
        );
        assert!(conflicting.empty);

        let anonymous_mine = diploma_filter(
            &Requester::Anonymous,
            tenant.id,
            &DiplomaListParams {
                my: Some("1".into()),
                user: None,
            },
        );
        assert!(anonymous_mine.empty);
    }
}

//! REST binding. Handlers extract the requester, resolve the tenant, run
//! the request through the visibility engine or the lifecycle coordinator,
//! and shape the response views.

pub mod diplomas;
pub mod groups;
pub mod notes;
pub mod users;

use chrono::Utc;
use dto::{GroupView, RefView, UserView, DEFAULT_AVATAR};
use models::{Group, OfferingKind, Role, Tenant, User};

use crate::auth::Requester;
use crate::fields::FieldRegistry;
use crate::store::{DirectoryStore, StoreResult};

/// Full user view with related group/tag titles and rendered custom fields.
pub(crate) async fn user_view(
    store: &dyn DirectoryStore,
    tenant: &Tenant,
    user: &User,
) -> StoreResult<UserView> {
    let groups = store
        .groups_by_ids(&user.groups)
        .await?
        .into_iter()
        .map(|g| RefView {
            id: g.id,
            title: g.title,
        })
        .collect();
    let tags = store
        .tags_by_ids(&user.tags)
        .await?
        .into_iter()
        .map(|t| RefView {
            id: t.id,
            title: t.title,
        })
        .collect();

    let custom_fields = match store.organization_for_tenant(tenant.id).await? {
        Some(org) => {
            FieldRegistry::new(store)
                .render_for_user(org.id, user)
                .await?
        }
        None => Vec::new(),
    };

    Ok(UserView {
        id: user.id,
        email: user.email.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        middle_name: user.middle_name.clone(),
        full_name: user.full_name(),
        short_name: user.short_name(),
        avatar: user
            .avatar
            .clone()
            .unwrap_or_else(|| DEFAULT_AVATAR.to_owned()),
        role: user.role.into(),
        groups,
        tags,
        city: user.city.clone(),
        position: user.position.clone(),
        grade: user.grade.clone(),
        gender: user.gender.clone(),
        speciality: user.speciality.clone(),
        examination: user.examination.clone(),
        phone: user.phone.clone(),
        address: user.address.clone(),
        about: user.about.clone(),
        is_approved: user.is_approved,
        registered_at: user.registered_at,
        custom_fields,
    })
}

pub(crate) async fn maybe_user_view(
    store: &dyn DirectoryStore,
    tenant: &Tenant,
    user_id: Option<i64>,
) -> StoreResult<Option<UserView>> {
    match user_id {
        Some(id) => match store.user_by_id(tenant.id, id).await? {
            Some(user) => Ok(Some(user_view(store, tenant, &user).await?)),
            None => Ok(None),
        },
        None => Ok(None),
    }
}

/// Group view with its roster, paid-seat count, derived status and the
/// requester-dependent edit flag.
pub(crate) async fn group_view(
    store: &dyn DirectoryStore,
    tenant: &Tenant,
    requester: &Requester,
    group: &Group,
) -> StoreResult<GroupView> {
    let mut users = Vec::with_capacity(group.members.len());
    for member in &group.members {
        if let Some(user) = store.user_by_id(tenant.id, *member).await? {
            users.push(user_view(store, tenant, &user).await?);
        }
    }

    let requests = store
        .access_requests_for_group(tenant.id, group.id)
        .await?;
    let is_active = requests.iter().any(|r| r.access);
    let mut payment = 0u32;
    for request in &requests {
        if store
            .payments_for_access_request(request.id)
            .await?
            .iter()
            .any(|p| p.is_paid)
        {
            payment += 1;
        }
    }

    let can_edit = match requester {
        Requester::Anonymous => false,
        Requester::Known {
            role: Role::Admin, ..
        } => true,
        Requester::Known {
            role: Role::Student,
            ..
        } => false,
        Requester::Known {
            id,
            role: Role::Teacher,
            ..
        } => {
            let mut allowed = group.author_id == Some(*id);
            if !allowed {
                for request in &requests {
                    let Some(offering_id) = request.offering_id else {
                        continue;
                    };
                    if let Some(offering) = store.offering_by_id(offering_id).await? {
                        if offering.kind == OfferingKind::Course && offering.authors.contains(id) {
                            allowed = true;
                            break;
                        }
                    }
                }
            }
            allowed
        }
    };

    let today = Utc::now().with_timezone(&tenant.timezone()).date_naive();

    Ok(GroupView {
        id: group.id,
        title: group.title.clone(),
        author_id: group.author_id,
        course_id: group.course_id,
        limit_access: group.limit_access,
        date_start: group.date_start,
        date_end: group.date_end,
        duration: group.duration,
        created_at: group.created_at,
        users,
        is_active,
        can_edit,
        status: group.status(today).to_owned(),
        payment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use models::{AccessRequest, Offering, Organization, Payment, Tag, Tenant};
    use uuid::Uuid;

    async fn site(store: &MemoryStore) -> (Tenant, Organization) {
        let org = store
            .insert_organization(Organization {
                id: 0,
                title: "Орг".into(),
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

    async fn add_user(store: &MemoryStore, tenant_id: i64, email: &str, role: Role) -> User {
        let user = User {
            id: 0,
            tenant_id,
            email: email.into(),
            first_name: "Иван".into(),
            last_name: "Иванов".into(),
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
        };
        store.insert_user(user, "hash", &[]).await.unwrap()
    }

    #[tokio::test]
    async fn user_view_resolves_relations_and_avatar_fallback() {
        let store = MemoryStore::new();
        let (tenant, org) = site(&store).await;
        let tag = store
            .insert_tag(Tag {
                id: 0,
                organization_id: org.id,
                title: "VIP".into(),
            })
            .await
            .unwrap();
        let mut user = add_user(&store, tenant.id, "u@sdo.ru", Role::Student).await;
        user.tags = vec![tag.id];
        store.update_user(&user).await.unwrap();
        let user = store.user_by_id(tenant.id, user.id).await.unwrap().unwrap();

        let view = user_view(&store, &tenant, &user).await.unwrap();
        assert_eq!(view.avatar, dto::DEFAULT_AVATAR);
        assert_eq!(view.role.value, "student");
        assert_eq!(view.role.title, "Ученик");
        assert_eq!(view.tags.len(), 1);
        assert_eq!(view.tags[0].title, "VIP");
        assert_eq!(view.full_name, user.full_name());
    }

    #[tokio::test]
    async fn group_view_edit_rules_and_paid_seats() {
        let store = MemoryStore::new();
        let (tenant, _) = site(&store).await;
        let owner = add_user(&store, tenant.id, "t@sdo.ru", Role::Teacher).await;
        let outsider = add_user(&store, tenant.id, "t2@sdo.ru", Role::Teacher).await;
        let student = add_user(&store, tenant.id, "s@sdo.ru", Role::Student).await;

        let group = store
            .insert_group(Group {
                id: 0,
                tenant_id: tenant.id,
                author_id: Some(owner.id),
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
        let request = store
            .insert_access_request(AccessRequest {
                id: 0,
                tenant_id: tenant.id,
                user_id: None,
                group_id: Some(group.id),
                offering_id: None,
                access: true,
            })
            .await
            .unwrap();
        store
            .insert_payment(Payment {
                id: 0,
                access_request_id: request.id,
                amount: 1000,
                is_paid: true,
                paid_at: Utc::now(),
            })
            .await
            .unwrap();

        let known = |u: &User| Requester::Known {
            id: u.id,
            tenant_id: u.tenant_id,
            role: u.role,
        };

        let view = group_view(&store, &tenant, &known(&owner), &group)
            .await
            .unwrap();
        assert!(view.can_edit);
        assert!(view.is_active);
        assert_eq!(view.payment, 1);
        assert_eq!(view.users.len(), 1);
        assert_eq!(view.status, "Обучение");

        let view = group_view(&store, &tenant, &known(&outsider), &group)
            .await
            .unwrap();
        assert!(!view.can_edit);

        let view = group_view(&store, &tenant, &known(&student), &group)
            .await
            .unwrap();
        assert!(!view.can_edit);

        let view = group_view(&store, &tenant, &Requester::Anonymous, &group)
            .await
            .unwrap();
        assert!(!view.can_edit);
    }

    #[tokio::test]
    async fn outside_teacher_gains_edit_via_course_authorship() {
        let store = MemoryStore::new();
        let (tenant, _) = site(&store).await;
        let teacher = add_user(&store, tenant.id, "t@sdo.ru", Role::Teacher).await;
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
                members: vec![],
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
                access: false,
            })
            .await
            .unwrap();

        let requester = Requester::Known {
            id: teacher.id,
            tenant_id: tenant.id,
            role: teacher.role,
        };
        let view = group_view(&store, &tenant, &requester, &group).await.unwrap();
        assert!(view.can_edit);
        assert!(!view.is_active);
    }
}

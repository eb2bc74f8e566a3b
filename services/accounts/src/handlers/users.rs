use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{Duration, NaiveDate};
use dto::{
    ActivateParams, BatchIdsRequest, ExportParams, MyStudentResponse, PasswordChangeRequest,
    PasswordResetRequest, RawRow, RegisterRequest, SalesParams, SalesRow, UpdateUserRequest,
    UserListParams, UserView, DEFAULT_AVATAR,
};
use models::{OfferingKind, Role};
use serde_json::json;

use super::user_view;
use crate::auth::{self, Requester};
use crate::error::{ApiError, ApiResult};
use crate::fields::{self, FieldRegistry};
use crate::lifecycle::Lifecycle;
use crate::state::AppState;
use crate::store::UserFilter;
use crate::transfer;
use crate::visibility;

const SALES_DATE_FORMAT: &str = "%d.%m.%Y";

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<UserListParams>,
) -> ApiResult<Json<Vec<UserView>>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let filter = visibility::user_filter(&requester, tenant.id, &params);
    let users = state.store.list_users(&filter).await?;

    let mut views = Vec::with_capacity(users.len());
    for user in &users {
        views.push(user_view(state.store.as_ref(), &tenant, user).await?);
    }
    Ok(Json(views))
}

pub async fn detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<UserView>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    // the detail path obeys the same narrowing as the listing
    let mut filter = visibility::user_filter(&requester, tenant.id, &UserListParams::default());
    filter.ids = Some(vec![id]);
    let user = state
        .store
        .list_users(&filter)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::not_found("пользователь не найден"))?;
    Ok(Json(user_view(state.store.as_ref(), &tenant, &user).await?))
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let user = Lifecycle::new(state.store.as_ref(), state.notifier.as_ref())
        .register(&tenant, req)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": user.id }))))
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<UserView>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let user = Lifecycle::new(state.store.as_ref(), state.notifier.as_ref())
        .update(&tenant, id, req)
        .await?;
    Ok(Json(user_view(state.store.as_ref(), &tenant, &user).await?))
}

/// Delete is a soft delete: the account is deactivated, its custom-field
/// values stay in place for a possible reactivation.
pub async fn destroy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    Lifecycle::new(state.store.as_ref(), state.notifier.as_ref())
        .deactivate(&tenant, &[id])
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Admin-only hard delete with the custom-field scrub cascade.
pub async fn purge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let requester = auth::requester(&state, &headers);
    if !requester.is_admin() {
        return Err(ApiError::forbidden("требуются права администратора"));
    }
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    Lifecycle::new(state.store.as_ref(), state.notifier.as_ref())
        .purge(&tenant, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let requester = auth::requester(&state, &headers);
    match requester {
        Requester::Known { id, .. } => {
            let tenant = auth::current_tenant(&state, &headers, &requester).await?;
            let user = state
                .store
                .user_by_id(tenant.id, id)
                .await?
                .ok_or_else(|| ApiError::not_found("пользователь не найден"))?;
            let view = user_view(state.store.as_ref(), &tenant, &user).await?;
            Ok(Json(serde_json::to_value(view).map_err(anyhow::Error::from)?))
        }
        Requester::Anonymous => Ok(Json(json!({
            "role": { "value": "anonymous", "title": "anonymous" },
            "avatar": DEFAULT_AVATAR,
        }))),
    }
}

pub async fn activate(
    State(state): State<AppState>,
    Query(params): Query<ActivateParams>,
) -> ApiResult<StatusCode> {
    Lifecycle::new(state.store.as_ref(), state.notifier.as_ref())
        .activate_by_code(params.code)
        .await?;
    Ok(StatusCode::OK)
}

pub async fn password_change(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<PasswordChangeRequest>,
) -> ApiResult<StatusCode> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    Lifecycle::new(state.store.as_ref(), state.notifier.as_ref())
        .password_change(&tenant, id, &req.password)
        .await?;
    Ok(StatusCode::OK)
}

pub async fn password_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PasswordResetRequest>,
) -> ApiResult<StatusCode> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    Lifecycle::new(state.store.as_ref(), state.notifier.as_ref())
        .password_reset(&tenant, &req.email)
        .await?;
    Ok(StatusCode::OK)
}

pub async fn batch_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BatchIdsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let reset = Lifecycle::new(state.store.as_ref(), state.notifier.as_ref())
        .batch_reset(&tenant, &req.ids)
        .await?;
    Ok(Json(json!({ "reset": reset })))
}

pub async fn batch_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BatchIdsRequest>,
) -> ApiResult<StatusCode> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    Lifecycle::new(state.store.as_ref(), state.notifier.as_ref())
        .deactivate(&tenant, &req.ids)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn my_student(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<MyStudentResponse>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let result =
        visibility::is_my_student(state.store.as_ref(), &requester, tenant.id, id).await?;
    Ok(Json(MyStudentResponse { result }))
}

/// The organization's custom-field schema in edit form, for profile forms.
pub async fn field_schema(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<dto::FieldSchemaView>>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let org = state
        .store
        .organization_for_tenant(tenant.id)
        .await?
        .ok_or_else(|| ApiError::not_found("организация не найдена"))?;

    let views = FieldRegistry::new(state.store.as_ref())
        .definitions(org.id)
        .await?
        .into_iter()
        .map(|def| dto::FieldSchemaView {
            choices: fields::edit_choices(&def),
            name: def.name,
            kind: def.kind,
            required: def.required,
            visible: def.visible,
        })
        .collect();
    Ok(Json(views))
}

/// Per-teacher totals of paid course/webinar payments inside the date
/// range. An unparsable range yields an empty report, not an error.
pub async fn sales(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SalesParams>,
) -> ApiResult<Json<Vec<SalesRow>>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;

    let parse = |raw: &str| NaiveDate::parse_from_str(raw, SALES_DATE_FORMAT).ok();
    let (Some(start), Some(end)) = (parse(&params.date_start), parse(&params.date_end)) else {
        return Ok(Json(Vec::new()));
    };
    let start = start.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
    let end = (end.and_hms_opt(0, 0, 0).unwrap_or_default() + Duration::days(1)).and_utc();

    let teachers = state
        .store
        .list_users(&UserFilter {
            tenant_id: tenant.id,
            role: Some(Role::Teacher.as_str().to_owned()),
            ..UserFilter::default()
        })
        .await?;

    let mut totals: HashMap<i64, (i64, i64)> = HashMap::new();
    for (payment, request) in state
        .store
        .paid_payments_between(tenant.id, start, end)
        .await?
    {
        let Some(offering_id) = request.offering_id else {
            continue;
        };
        let Some(offering) = state.store.offering_by_id(offering_id).await? else {
            continue;
        };
        for author in &offering.authors {
            let entry = totals.entry(*author).or_default();
            match offering.kind {
                OfferingKind::Course => entry.0 += payment.amount,
                OfferingKind::Webinar => entry.1 += payment.amount,
            }
        }
    }

    let rows = teachers
        .iter()
        .filter_map(|teacher| {
            let (courses, webinars) = totals.get(&teacher.id).copied().unwrap_or_default();
            (courses != 0 || webinars != 0).then(|| SalesRow {
                id: teacher.id,
                full_name: teacher.full_name(),
                courses,
                webinars,
            })
        })
        .collect();
    Ok(Json(rows))
}

/// Row values for the export collaborator; the header row comes first, the
/// spreadsheet formatting happens downstream.
pub async fn export(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ExportParams>,
) -> ApiResult<Json<Vec<[String; 4]>>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let ids: Vec<i64> = params
        .users
        .split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect();

    let users = state
        .store
        .list_users(&UserFilter {
            tenant_id: tenant.id,
            active_only: true,
            ids: Some(ids),
            ..UserFilter::default()
        })
        .await?;

    let mut rows = vec![transfer::EXPORT_HEADER.map(str::to_owned)];
    rows.extend(users.iter().map(transfer::export_row));
    Ok(Json(rows))
}

pub async fn import(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(rows): Json<Vec<RawRow>>,
) -> ApiResult<(StatusCode, Json<dto::ImportReport>)> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let report = Lifecycle::new(state.store.as_ref(), state.notifier.as_ref())
        .import(&tenant, &rows)
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

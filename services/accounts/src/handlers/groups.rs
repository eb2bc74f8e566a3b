use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use dto::{BatchIdsRequest, GroupListParams, GroupView, GroupWriteRequest};
use models::Group;

use super::group_view;
use crate::auth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::visibility;

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<GroupListParams>,
) -> ApiResult<Json<Vec<GroupView>>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let filter = visibility::group_filter(tenant.id, &params);
    let groups = state.store.list_groups(&filter).await?;

    let mut views = Vec::with_capacity(groups.len());
    for group in &groups {
        views.push(group_view(state.store.as_ref(), &tenant, &requester, group).await?);
    }
    Ok(Json(views))
}

pub async fn detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<GroupView>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let group = state
        .store
        .group_by_id(tenant.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("группа не найдена"))?;
    Ok(Json(
        group_view(state.store.as_ref(), &tenant, &requester, &group).await?,
    ))
}

/// The creating requester becomes the group's author.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GroupWriteRequest>,
) -> ApiResult<(StatusCode, Json<GroupView>)> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;

    let group = state
        .store
        .insert_group(Group {
            id: 0,
            tenant_id: tenant.id,
            author_id: requester.id(),
            title: req.title,
            course_id: req.course_id,
            limit_access: req.limit_access,
            date_start: req.date_start,
            date_end: req.date_end,
            duration: req.duration,
            created_at: Utc::now(),
            members: req.users,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(group_view(state.store.as_ref(), &tenant, &requester, &group).await?),
    ))
}

/// Member changes are a reconcile: newcomers join, leavers drop, everyone
/// else keeps their row.
pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<GroupWriteRequest>,
) -> ApiResult<Json<GroupView>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let mut group = state
        .store
        .group_by_id(tenant.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("группа не найдена"))?;

    group.title = req.title;
    group.course_id = req.course_id;
    group.limit_access = req.limit_access;
    group.date_start = req.date_start;
    group.date_end = req.date_end;
    group.duration = req.duration;
    group.members = req.users;
    state.store.update_group(&group).await?;

    Ok(Json(
        group_view(state.store.as_ref(), &tenant, &requester, &group).await?,
    ))
}

pub async fn destroy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    state.store.delete_groups(tenant.id, &[id]).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Groups are hard-deleted in batch, unlike users.
pub async fn batch_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BatchIdsRequest>,
) -> ApiResult<StatusCode> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    state.store.delete_groups(tenant.id, &req.ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

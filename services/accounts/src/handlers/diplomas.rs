use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use dto::{DiplomaListParams, DiplomaView, DiplomaWriteRequest, DEFAULT_CERTIFICATE};
use models::Diploma;

use super::maybe_user_view;
use crate::auth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::store::DirectoryStore;
use crate::visibility;

async fn diploma_view(
    store: &dyn DirectoryStore,
    tenant: &models::Tenant,
    diploma: &Diploma,
) -> ApiResult<DiplomaView> {
    Ok(DiplomaView {
        id: diploma.id,
        description: diploma.description.clone(),
        image: diploma
            .image
            .clone()
            .unwrap_or_else(|| DEFAULT_CERTIFICATE.to_owned()),
        user: maybe_user_view(store, tenant, diploma.user_id).await?,
    })
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DiplomaListParams>,
) -> ApiResult<Json<Vec<DiplomaView>>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let filter = visibility::diploma_filter(&requester, tenant.id, &params);
    let diplomas = state.store.list_diplomas(&filter).await?;

    let mut views = Vec::with_capacity(diplomas.len());
    for diploma in &diplomas {
        views.push(diploma_view(state.store.as_ref(), &tenant, diploma).await?);
    }
    Ok(Json(views))
}

pub async fn detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<DiplomaView>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let diploma = state
        .store
        .diploma_by_id(tenant.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("диплом не найден"))?;
    Ok(Json(
        diploma_view(state.store.as_ref(), &tenant, &diploma).await?,
    ))
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DiplomaWriteRequest>,
) -> ApiResult<(StatusCode, Json<DiplomaView>)> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;

    let diploma = state
        .store
        .insert_diploma(Diploma {
            id: 0,
            tenant_id: tenant.id,
            user_id: Some(req.user_id),
            description: req.description,
            image: req.image,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(diploma_view(state.store.as_ref(), &tenant, &diploma).await?),
    ))
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<DiplomaWriteRequest>,
) -> ApiResult<Json<DiplomaView>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let mut diploma = state
        .store
        .diploma_by_id(tenant.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("диплом не найден"))?;

    diploma.user_id = Some(req.user_id);
    diploma.description = req.description;
    diploma.image = req.image.or(diploma.image);
    state.store.update_diploma(&diploma).await?;

    Ok(Json(
        diploma_view(state.store.as_ref(), &tenant, &diploma).await?,
    ))
}

pub async fn destroy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    state.store.delete_diploma(tenant.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

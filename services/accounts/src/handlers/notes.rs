use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use dto::{NoteListParams, NoteView, NoteWriteRequest};
use models::Note;

use super::maybe_user_view;
use crate::auth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::store::DirectoryStore;
use crate::visibility;

async fn note_view(
    store: &dyn DirectoryStore,
    tenant: &models::Tenant,
    note: &Note,
) -> ApiResult<NoteView> {
    Ok(NoteView {
        id: note.id,
        kind: note.kind,
        title: note.title.clone(),
        text: note.text.clone(),
        created_at: note.created_at,
        user: maybe_user_view(store, tenant, note.user_id).await?,
        author: maybe_user_view(store, tenant, note.author_id).await?,
    })
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<NoteListParams>,
) -> ApiResult<Json<Vec<NoteView>>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let filter =
        visibility::note_filter(state.store.as_ref(), &requester, tenant.id, &params).await?;
    let notes = state.store.list_notes(&filter).await?;

    let mut views = Vec::with_capacity(notes.len());
    for note in &notes {
        views.push(note_view(state.store.as_ref(), &tenant, note).await?);
    }
    Ok(Json(views))
}

pub async fn detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<NoteView>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    // same gate as the listing: students and anonymous see nothing
    let filter = visibility::note_filter(
        state.store.as_ref(),
        &requester,
        tenant.id,
        &NoteListParams::default(),
    )
    .await?;
    if filter.empty {
        return Err(ApiError::not_found("запись не найдена"));
    }
    let note = state
        .store
        .note_by_id(tenant.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("запись не найдена"))?;
    Ok(Json(note_view(state.store.as_ref(), &tenant, &note).await?))
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NoteWriteRequest>,
) -> ApiResult<(StatusCode, Json<NoteView>)> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;

    let note = state
        .store
        .insert_note(Note {
            id: 0,
            tenant_id: tenant.id,
            author_id: requester.id(),
            user_id: Some(req.user_id),
            kind: req.kind,
            title: req.title,
            text: req.text,
            created_at: Utc::now(),
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(note_view(state.store.as_ref(), &tenant, &note).await?),
    ))
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<NoteWriteRequest>,
) -> ApiResult<Json<NoteView>> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    let mut note = state
        .store
        .note_by_id(tenant.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("запись не найдена"))?;

    note.user_id = Some(req.user_id);
    note.kind = req.kind;
    note.title = req.title;
    note.text = req.text;
    state.store.update_note(&note).await?;

    Ok(Json(note_view(state.store.as_ref(), &tenant, &note).await?))
}

pub async fn destroy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let requester = auth::requester(&state, &headers);
    let tenant = auth::current_tenant(&state, &headers, &requester).await?;
    state.store.delete_note(tenant.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

use axum::extract::{Path, Query, State};
use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use groupsync_domain::adoption::DirectoryChange;
use groupsync_domain::entity::{Source, Versioned};
use groupsync_domain::lists::{ListCreate, ListUpdate, MailingList, Visibility};
use groupsync_domain::members::{Member, MemberCreate, MemberUpdate};
use groupsync_domain::services::{Service, ServiceCreate, ServiceKind, ServiceUpdate};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, middleware as app_middleware, observability, state::AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/services", post(create_service))
        .route(
            "/v1/services/:uid",
            get(get_service).put(update_service).delete(delete_service),
        )
        .route("/v1/services/:uid/lists", post(create_list))
        .route(
            "/v1/lists/:uid",
            get(get_list).put(update_list).delete(delete_list),
        )
        .route("/v1/lists/:uid/members", post(create_member))
        .route("/v1/lists/:uid/members/exists", get(member_exists))
        .route(
            "/v1/members/:uid",
            get(get_member).put(update_member).delete(delete_member),
        )
        .route("/v1/webhooks/directory", post(directory_webhook))
        .layer(middleware::from_fn(app_middleware::track_metrics))
        .layer(app_middleware::trace_layer())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => body.into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Revision the caller believes is current; writes are rejected with a
/// conflict when it is stale.
#[derive(Debug, Deserialize)]
struct RevisionQuery {
    revision: u64,
}

#[derive(Debug, Deserialize)]
struct CreateServiceRequest {
    project_id: String,
    kind: ServiceKind,
    prefix: Option<String>,
    external_group_id: Option<String>,
    #[serde(default)]
    owners: Vec<String>,
    #[serde(default)]
    description: String,
}

async fn create_service(
    State(state): State<AppState>,
    Json(payload): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<Versioned<Service>>), ApiError> {
    // http callers are always api-source; directory identifiers only
    // enter through the webhook surface
    let created = state
        .service_writer
        .create(ServiceCreate {
            project_id: payload.project_id,
            kind: payload.kind,
            prefix: payload.prefix,
            external_group_id: payload.external_group_id,
            owners: payload.owners,
            description: payload.description,
            source: Source::Api,
            external_id: None,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_service(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<Versioned<Service>>, ApiError> {
    let service = state.services.get(&uid).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(service))
}

#[derive(Debug, Deserialize)]
struct UpdateServiceRequest {
    expected_revision: u64,
    owners: Option<Vec<String>>,
    description: Option<String>,
}

async fn update_service(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(payload): Json<UpdateServiceRequest>,
) -> Result<Json<Versioned<Service>>, ApiError> {
    let updated = state
        .service_writer
        .update(
            &uid,
            ServiceUpdate {
                owners: payload.owners,
                description: payload.description,
            },
            payload.expected_revision,
        )
        .await?;
    Ok(Json(updated))
}

async fn delete_service(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(query): Query<RevisionQuery>,
) -> Result<StatusCode, ApiError> {
    state.service_writer.delete(&uid, query.revision).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CreateListRequest {
    group_name: String,
    visibility: Visibility,
    #[serde(default)]
    description: String,
    #[serde(default)]
    owners: Vec<String>,
    #[serde(default)]
    moderated: bool,
}

async fn create_list(
    State(state): State<AppState>,
    Path(service_uid): Path<String>,
    Json(payload): Json<CreateListRequest>,
) -> Result<(StatusCode, Json<Versioned<MailingList>>), ApiError> {
    let created = state
        .list_writer
        .create(ListCreate {
            service_uid,
            group_name: payload.group_name,
            visibility: payload.visibility,
            description: payload.description,
            owners: payload.owners,
            moderated: payload.moderated,
            source: Source::Api,
            external_id: None,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_list(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<Versioned<MailingList>>, ApiError> {
    let list = state.lists.get(&uid).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(list))
}

#[derive(Debug, Deserialize)]
struct UpdateListRequest {
    expected_revision: u64,
    visibility: Option<Visibility>,
    description: Option<String>,
    owners: Option<Vec<String>>,
    moderated: Option<bool>,
}

async fn update_list(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(payload): Json<UpdateListRequest>,
) -> Result<Json<Versioned<MailingList>>, ApiError> {
    let updated = state
        .list_writer
        .update(
            &uid,
            ListUpdate {
                visibility: payload.visibility,
                description: payload.description,
                owners: payload.owners,
                moderated: payload.moderated,
            },
            payload.expected_revision,
        )
        .await?;
    Ok(Json(updated))
}

async fn delete_list(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(query): Query<RevisionQuery>,
) -> Result<StatusCode, ApiError> {
    state.list_writer.delete(&uid, query.revision).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CreateMemberRequest {
    email: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    moderated: bool,
}

async fn create_member(
    State(state): State<AppState>,
    Path(list_uid): Path<String>,
    Json(payload): Json<CreateMemberRequest>,
) -> Result<(StatusCode, Json<Versioned<Member>>), ApiError> {
    let created = state
        .member_writer
        .create(MemberCreate {
            list_uid,
            email: payload.email,
            display_name: payload.display_name,
            moderated: payload.moderated,
            source: Source::Api,
            external_id: None,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
struct MemberExistsQuery {
    email: String,
}

#[derive(Serialize)]
struct MemberExistsResponse {
    exists: bool,
}

async fn member_exists(
    State(state): State<AppState>,
    Path(list_uid): Path<String>,
    Query(query): Query<MemberExistsQuery>,
) -> Result<Json<MemberExistsResponse>, ApiError> {
    let exists = state
        .member_writer
        .member_exists(&list_uid, &query.email)
        .await?;
    Ok(Json(MemberExistsResponse { exists }))
}

async fn get_member(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<Versioned<Member>>, ApiError> {
    let member = state.members.get(&uid).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(member))
}

#[derive(Debug, Deserialize)]
struct UpdateMemberRequest {
    expected_revision: u64,
    display_name: Option<String>,
    moderated: Option<bool>,
}

async fn update_member(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(payload): Json<UpdateMemberRequest>,
) -> Result<Json<Versioned<Member>>, ApiError> {
    let updated = state
        .member_writer
        .update(
            &uid,
            MemberUpdate {
                display_name: payload.display_name,
                moderated: payload.moderated,
            },
            payload.expected_revision,
        )
        .await?;
    Ok(Json(updated))
}

async fn delete_member(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(query): Query<RevisionQuery>,
) -> Result<StatusCode, ApiError> {
    state.member_writer.delete(&uid, query.revision).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn change_label(change: &DirectoryChange) -> &'static str {
    match change {
        DirectoryChange::GroupCreated { .. } => "group_created",
        DirectoryChange::GroupRemoved { .. } => "group_removed",
        DirectoryChange::MemberAdded { .. } => "member_added",
        DirectoryChange::MemberRemoved { .. } => "member_removed",
    }
}

async fn directory_webhook(
    State(state): State<AppState>,
    Json(change): Json<DirectoryChange>,
) -> Result<StatusCode, ApiError> {
    let label = change_label(&change);
    match state.adoption.apply(change).await {
        Ok(()) => {
            observability::register_directory_webhook(label, "applied");
            Ok(StatusCode::ACCEPTED)
        }
        Err(err) => {
            observability::register_directory_webhook(label, "failed");
            Err(err.into())
        }
    }
}

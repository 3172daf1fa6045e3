use axum::extract::{Extension, Path, State};
use axum::{
    Json, Router,
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use validator::Validate;
use voluntra_domain::documents::{Event, EventStatus, ParticipantStatusEntry};
use voluntra_domain::events::{EventDraft, Registration};
use voluntra_domain::moderation::{ModerationRequest, ModerationResponse};
use voluntra_domain::participants::{
    BulkRemovalReport, EventWithStats, ParticipantRecord, ParticipantStats, RemovalOutcome,
};

use crate::middleware::AuthContext;
use crate::{
    error::ApiError, middleware as app_middleware, observability, state::AppState, validation,
};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/events", post(create_event))
        .route("/v1/events/:event_id", delete(delete_event))
        .route("/v1/events/:event_id/status", post(transition_event_status))
        .route(
            "/v1/events/:event_id/registration",
            post(register_volunteer).delete(unregister_volunteer),
        )
        .route("/v1/events/:event_id/participants", get(list_participants))
        .route(
            "/v1/events/:event_id/participants/stats",
            get(participant_stats),
        )
        .route(
            "/v1/events/:event_id/participants/bulk-remove",
            post(bulk_remove_participants),
        )
        .route(
            "/v1/events/:event_id/participants/:participant_id",
            delete(remove_participant),
        )
        .route(
            "/v1/events/:event_id/participants/:participant_id/status",
            put(update_participant_status),
        )
        .route(
            "/v1/organizations/:organization_id/events",
            get(list_organization_events),
        )
        .route("/v1/chat/moderation", post(moderate_chat))
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(protected)
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ));

    if !state.config.is_test() {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    data_backend: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
        data_backend: state.config.data_backend.clone(),
    })
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateEventRequest {
    #[validate(length(min = 1, max = 200))]
    title: String,
    #[serde(default)]
    #[validate(length(max = 5000))]
    description: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    location: String,
    #[serde(default)]
    date: Option<i64>,
    #[validate(range(min = 1, max = 10000))]
    max_volunteers: u32,
    #[serde(default)]
    with_chat: bool,
    #[serde(default)]
    draft: bool,
}

async fn create_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    validation::validate(&payload)?;
    let session = auth.session()?;
    let draft = EventDraft {
        title: payload.title,
        description: payload.description,
        location: payload.location,
        date_ms: payload.date,
        max_volunteers: payload.max_volunteers,
        with_chat: payload.with_chat,
        draft: payload.draft,
    };
    let event = state.events.create_event(&session, draft).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn delete_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(event_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let event_id = validation::path_id("event_id", &event_id)?;
    let session = auth.session()?;
    let organization_id = session.require_organization()?;
    state.events.delete_event(event_id, organization_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
struct StatusRequest {
    #[validate(length(min = 1, max = 32))]
    status: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventStatusResponse {
    event_id: String,
    status: EventStatus,
}

async fn transition_event_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(event_id): Path<String>,
    Json(payload): Json<StatusRequest>,
) -> Result<Json<EventStatusResponse>, ApiError> {
    validation::validate(&payload)?;
    let event_id = validation::path_id("event_id", &event_id)?;
    let session = auth.session()?;
    let organization_id = session.require_organization()?;
    let status = state
        .events
        .transition_event_status(event_id, &payload.status, organization_id)
        .await?;
    Ok(Json(EventStatusResponse {
        event_id: event_id.to_string(),
        status,
    }))
}

async fn register_volunteer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(event_id): Path<String>,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let event_id = validation::path_id("event_id", &event_id)?;
    let session = auth.session()?;
    let registration = state.events.register_volunteer(event_id, &session).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

async fn unregister_volunteer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(event_id): Path<String>,
) -> Result<Json<Registration>, ApiError> {
    let event_id = validation::path_id("event_id", &event_id)?;
    let session = auth.session()?;
    let registration = state.events.unregister_volunteer(event_id, &session).await?;
    Ok(Json(registration))
}

async fn list_participants(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<ParticipantRecord>>, ApiError> {
    let event_id = validation::path_id("event_id", &event_id)?;
    let session = auth.session()?;
    let participants = state
        .participants
        .list_participants(event_id, &session)
        .await?;
    Ok(Json(participants))
}

async fn participant_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(event_id): Path<String>,
) -> Result<Json<ParticipantStats>, ApiError> {
    let event_id = validation::path_id("event_id", &event_id)?;
    let session = auth.session()?;
    let stats = state
        .participants
        .participant_stats(event_id, &session)
        .await?;
    Ok(Json(stats))
}

async fn remove_participant(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((event_id, participant_id)): Path<(String, String)>,
) -> Result<Json<RemovalOutcome>, ApiError> {
    let event_id = validation::path_id("event_id", &event_id)?;
    let participant_id = validation::path_id("participant_id", &participant_id)?;
    let session = auth.session()?;
    let organization_id = session.require_organization()?;
    let outcome = state
        .participants
        .remove_participant(event_id, participant_id, organization_id)
        .await?;
    Ok(Json(outcome))
}

async fn update_participant_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((event_id, participant_id)): Path<(String, String)>,
    Json(payload): Json<StatusRequest>,
) -> Result<Json<ParticipantStatusEntry>, ApiError> {
    validation::validate(&payload)?;
    let event_id = validation::path_id("event_id", &event_id)?;
    let participant_id = validation::path_id("participant_id", &participant_id)?;
    let session = auth.session()?;
    let organization_id = session.require_organization()?;
    let entry = state
        .participants
        .update_participant_status(event_id, participant_id, &payload.status, organization_id)
        .await?;
    Ok(Json(entry))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct BulkRemoveRequest {
    #[validate(length(min = 1, max = 500))]
    participant_ids: Vec<String>,
}

async fn bulk_remove_participants(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(event_id): Path<String>,
    Json(payload): Json<BulkRemoveRequest>,
) -> Result<Json<BulkRemovalReport>, ApiError> {
    validation::validate(&payload)?;
    let event_id = validation::path_id("event_id", &event_id)?;
    for participant_id in &payload.participant_ids {
        validation::path_id("participant_ids", participant_id)?;
    }
    let session = auth.session()?;
    let organization_id = session.require_organization()?;
    let report = state
        .participants
        .bulk_remove_participants(event_id, &payload.participant_ids, organization_id)
        .await;
    Ok(Json(report))
}

async fn list_organization_events(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(organization_id): Path<String>,
) -> Result<Json<Vec<EventWithStats>>, ApiError> {
    let organization_id = validation::path_id("organization_id", &organization_id)?;
    let session = auth.session()?;
    if !session.role.is_admin() && session.require_organization()? != organization_id {
        return Err(ApiError::Forbidden(
            "organizations can only list their own events".into(),
        ));
    }
    let events = state
        .participants
        .list_organization_events_with_stats(organization_id)
        .await?;
    Ok(Json(events))
}

async fn moderate_chat(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<ModerationRequest>,
) -> Result<Json<ModerationResponse>, ApiError> {
    let response = state
        .moderation
        .handle(auth.user_id().as_deref(), payload)
        .await?;
    Ok(Json(response))
}

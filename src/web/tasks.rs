use crate::db;
use crate::domain::models::{swept_status, Position};
use crate::domain::Actor;
use crate::params::{self, Parameter};
use crate::services::task_rating::{self, TaskRatingError};
use crate::state::SharedState;
use crate::web::session::CurrentEmployee;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub employee_id: Uuid,
    pub name: String,
    pub description: String,
    pub deadline_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct SetDeadlineRequest {
    pub deadline_at: Option<DateTime<Utc>>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(detail).delete(remove))
        .route("/:id/submit", post(submit))
        .route("/:id/deadline", put(set_deadline))
        .with_state(state)
}

fn is_manager(position: Position) -> bool {
    matches!(position, Position::Ceo | Position::HumanResources)
}

/// Tasks belonging to HR are only the executive's business.
fn may_touch(requester: &crate::db::DbEmployee, owner_position: Position) -> bool {
    match requester.position {
        Position::Ceo => true,
        Position::HumanResources => owner_position != Position::Ceo,
        _ => false,
    }
}

async fn list(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
) -> Result<impl IntoResponse, StatusCode> {
    let tasks = if is_manager(me.position) {
        db::list_tasks(&state.pool).await
    } else {
        db::list_tasks_for_employee(&state.pool, me.id).await
    }
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(tasks))
}

async fn create(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let owner = db::find_employee(&state.pool, payload.employee_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if !may_touch(&me, owner.position) {
        return Err(StatusCode::FORBIDDEN);
    }

    let task = db::create_task(
        &state.pool,
        &Actor::username(me.username.as_str()),
        owner.id,
        &payload.name,
        &payload.description,
        payload.deadline_at,
        None,
    )
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn detail(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let task = db::find_task(&state.pool, id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if task.employee_id != me.id && !is_manager(me.position) {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(Json(task))
}

async fn submit(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, StatusCode> {
    let task = db::find_task(&state.pool, id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if task.employee_id != me.id {
        return Err(StatusCode::FORBIDDEN);
    }

    // The recurring rating task is not closed by a plain submit; the weekly
    // evaluation workflow settles it together with the scores.
    let rating_task_name = params::get_str(&state.pool, Parameter::WeeklyRateTaskName)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if task.name == rating_task_name {
        return Ok(Redirect::to("/evaluation/weekly").into_response());
    }

    let outcome = task_rating::submit_task(
        &state.pool,
        &Actor::username(me.username.as_str()),
        &me,
        &task,
    )
    .await
    .map_err(rating_error_status)?;

    Ok(Json(serde_json::json!({
        "status": outcome.status,
        "oversight_created": outcome.oversight_created,
    }))
    .into_response())
}

async fn set_deadline(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetDeadlineRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let task = db::find_task(&state.pool, id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let owner = db::find_employee(&state.pool, task.employee_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if !may_touch(&me, owner.position) {
        return Err(StatusCode::FORBIDDEN);
    }

    let actor = Actor::username(me.username.as_str());
    db::set_task_deadline(&state.pool, &actor, id, payload.deadline_at)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    // Moving the deadline may flip an overdue task back to in progress (and
    // vice versa) right away rather than waiting for the sweep.
    if let Some(status) =
        swept_status(task.status, payload.deadline_at, task.submitted_at, Utc::now())
    {
        db::set_task_status(&state.pool, &actor, id, status)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn remove(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let task = db::find_task(&state.pool, id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let owner = db::find_employee(&state.pool, task.employee_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if !may_touch(&me, owner.position) {
        return Err(StatusCode::FORBIDDEN);
    }

    db::delete_task(&state.pool, &Actor::username(me.username.as_str()), id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn rating_error_status(err: TaskRatingError) -> StatusCode {
    match err {
        TaskRatingError::AlreadySubmitted
        | TaskRatingError::NotSubmitted
        | TaskRatingError::AlreadyRated => StatusCode::CONFLICT,
        TaskRatingError::RateOutOfRange => StatusCode::UNPROCESSABLE_ENTITY,
        TaskRatingError::Other(e) => {
            tracing::error!("task rating failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

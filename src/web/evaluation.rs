use crate::db::{self, DbTask, DbWeek};
use crate::domain::models::Position;
use crate::domain::Actor;
use crate::evaluation;
use crate::services::{task_rating, weekly_cycle};
use crate::state::SharedState;
use crate::web::session::CurrentEmployee;
use crate::web::tasks::rating_error_status;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Serialize)]
pub struct WeeklyBoard {
    pub week: Option<DbWeek>,
    pub employees: Vec<WeeklyBoardRow>,
    pub warnings: Vec<String>,
}

#[derive(Serialize)]
pub struct WeeklyBoardRow {
    pub employee_id: Uuid,
    pub name: String,
    pub position: Position,
}

#[derive(Deserialize)]
pub struct WeeklyRatingsRequest {
    pub scores: HashMap<Uuid, f64>,
}

#[derive(Deserialize)]
pub struct RateTaskRequest {
    pub task_id: Uuid,
    pub rate: f64,
}

#[derive(Serialize)]
pub struct UnratedTaskRow {
    #[serde(flatten)]
    pub task: DbTask,
    pub employee_name: String,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(board))
        .route("/fleet", get(fleet))
        .route("/weekly", get(weekly_board).post(submit_weekly))
        .route("/tasks", get(unrated_tasks).post(rate_task))
        .route("/:employee_id", get(employee_evaluation))
        .with_state(state)
}

fn is_rater(position: Position) -> bool {
    matches!(position, Position::Ceo | Position::HumanResources)
}

/// Per-employee scores for everyone but the executive.
async fn board(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_rater(me.position) {
        return Err(StatusCode::FORBIDDEN);
    }
    let evaluations = evaluation::evaluate_all(&state.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(evaluations))
}

async fn fleet(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_rater(me.position) {
        return Err(StatusCode::FORBIDDEN);
    }
    let fleet = evaluation::fleet_evaluation(&state.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(fleet))
}

async fn employee_evaluation(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
    Path(employee_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_rater(me.position) && me.id != employee_id {
        return Err(StatusCode::FORBIDDEN);
    }
    let employee = db::find_employee(&state.pool, employee_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let evaluation = evaluation::evaluate_employee(&state.pool, employee)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(evaluation))
}

/// The week awaiting ratings plus the employees to score. Viewing the board
/// already collapses any backlog of unrated weeks down to the newest one.
async fn weekly_board(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_rater(me.position) {
        return Err(StatusCode::FORBIDDEN);
    }
    let actor = Actor::username(me.username.as_str());
    // Viewing the board may discard a stale backlog; that happens atomically.
    let mut tx = state
        .pool
        .begin()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let resolution = weekly_cycle::resolve_week_to_rate(&mut tx, &actor)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    tx.commit()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let employees =
        db::list_employees_excluding(&state.pool, &[Position::Ceo, Position::HumanResources])
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(WeeklyBoard {
        week: resolution.week,
        employees: employees
            .into_iter()
            .map(|e| WeeklyBoardRow {
                employee_id: e.id,
                name: e.name,
                position: e.position,
            })
            .collect(),
        warnings: resolution.warnings,
    }))
}

async fn submit_weekly(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
    Json(payload): Json<WeeklyRatingsRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_rater(me.position) {
        return Err(StatusCode::FORBIDDEN);
    }
    let actor = Actor::username(me.username.as_str());
    let submission = weekly_cycle::submit_weekly_ratings(&state.pool, &actor, &payload.scores)
        .await
        .map_err(|err| match err {
            weekly_cycle::WeeklyCycleError::NoOpenWeek => StatusCode::CONFLICT,
            weekly_cycle::WeeklyCycleError::MissingRating(_)
            | weekly_cycle::WeeklyCycleError::RatingOutOfRange(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            weekly_cycle::WeeklyCycleError::Other(e) => {
                tracing::error!("weekly rating submission failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    Ok(Json(serde_json::json!({
        "week_id": submission.week_id,
        "rated_employees": submission.rated_employees,
        "hr_auto_rate": submission.hr_auto_rate,
        "warnings": submission.warnings,
    })))
}

/// Submitted tasks awaiting a quality score. HR's own tasks only appear to
/// the executive so nobody grades their own work.
async fn unrated_tasks(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_rater(me.position) {
        return Err(StatusCode::FORBIDDEN);
    }
    let tasks = db::list_unrated_submitted_tasks(&state.pool, me.position.is_executive())
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut rows = Vec::with_capacity(tasks.len());
    for task in tasks {
        let name = db::find_employee(&state.pool, task.employee_id)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .map(|e| e.name)
            .unwrap_or_default();
        rows.push(UnratedTaskRow {
            task,
            employee_name: name,
        });
    }
    Ok(Json(rows))
}

async fn rate_task(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
    Json(payload): Json<RateTaskRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_rater(me.position) {
        return Err(StatusCode::FORBIDDEN);
    }
    let task = db::find_task(&state.pool, payload.task_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let owner = db::find_employee(&state.pool, task.employee_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    // HR rating its own tasks would be self-grading; those go to the
    // executive.
    if owner.position == Position::HumanResources && !me.position.is_executive() {
        return Err(StatusCode::FORBIDDEN);
    }

    let outcome = task_rating::rate_task(
        &state.pool,
        &Actor::username(me.username.as_str()),
        &me,
        &task,
        payload.rate,
    )
    .await
    .map_err(rating_error_status)?;

    Ok(Json(serde_json::json!({
        "task_id": task.id,
        "on_time_rate": outcome.on_time_rate,
        "rate": payload.rate,
        "warnings": outcome.warnings,
    })))
}

use crate::db::{self, DbEmployee};
use crate::domain::models::Position;
use crate::domain::Actor;
use crate::evaluation;
use crate::state::SharedState;
use crate::web::session::CurrentEmployee;
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHasher,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct CreateEmployeeRequest {
    pub name: String,
    pub username: String,
    pub password: String,
    pub position: Position,
}

#[derive(Deserialize)]
pub struct UpdateEmployeeRequest {
    pub name: String,
    pub position: Position,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(detail).put(update).delete(remove))
        .with_state(state)
}

/// Staff records are managed by HR; the executive's own record is off limits
/// to anyone but the executive.
fn may_manage(requester: &DbEmployee, target_position: Position) -> bool {
    match requester.position {
        Position::Ceo => true,
        Position::HumanResources => target_position != Position::Ceo,
        _ => false,
    }
}

async fn list(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
) -> Result<impl IntoResponse, StatusCode> {
    if !matches!(me.position, Position::Ceo | Position::HumanResources) {
        return Err(StatusCode::FORBIDDEN);
    }
    let employees = db::list_employees(&state.pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(employees))
}

async fn create(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
    Json(payload): Json<CreateEmployeeRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if !may_manage(&me, payload.position) {
        return Err(StatusCode::FORBIDDEN);
    }
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .to_string();

    let employee = db::create_employee(
        &state.pool,
        &Actor::username(me.username.as_str()),
        &payload.name,
        &payload.username,
        &hash,
        payload.position,
    )
    .await
    .map_err(|e| {
        tracing::error!("employee creation failed: {}", e);
        StatusCode::CONFLICT
    })?;
    Ok((StatusCode::CREATED, Json(employee)))
}

async fn detail(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    if !matches!(me.position, Position::Ceo | Position::HumanResources) && me.id != id {
        return Err(StatusCode::FORBIDDEN);
    }
    let employee = db::find_employee(&state.pool, id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if employee.position == Position::Ceo && !me.position.is_executive() {
        return Err(StatusCode::FORBIDDEN);
    }

    // The evaluation payload carries the record itself alongside the scores.
    let evaluation = evaluation::evaluate_employee(&state.pool, employee)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(evaluation))
}

async fn update(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateEmployeeRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let target = db::find_employee(&state.pool, id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if !may_manage(&me, target.position) || !may_manage(&me, payload.position) {
        return Err(StatusCode::FORBIDDEN);
    }

    db::update_employee(
        &state.pool,
        &Actor::username(me.username.as_str()),
        id,
        &payload.name,
        payload.position,
    )
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove(
    State(state): State<SharedState>,
    CurrentEmployee(me): CurrentEmployee,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let target = db::find_employee(&state.pool, id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if !may_manage(&me, target.position) || target.id == me.id {
        return Err(StatusCode::FORBIDDEN);
    }

    db::delete_employee(&state.pool, &Actor::username(me.username.as_str()), id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn employee(position: Position) -> DbEmployee {
        DbEmployee {
            id: Uuid::new_v4(),
            name: "Test".into(),
            username: "test".into(),
            password_hash: String::new(),
            position,
            created_at: Utc::now(),
            created_by: "test".into(),
            updated_at: Utc::now(),
            updated_by: "test".into(),
        }
    }

    #[test]
    fn test_hr_cannot_touch_the_executive_record() {
        let hr = employee(Position::HumanResources);
        assert!(may_manage(&hr, Position::Designer));
        assert!(!may_manage(&hr, Position::Ceo));
    }

    #[test]
    fn test_executive_manages_everyone() {
        let ceo = employee(Position::Ceo);
        assert!(may_manage(&ceo, Position::Ceo));
        assert!(may_manage(&ceo, Position::HumanResources));
    }

    #[test]
    fn test_rank_and_file_manage_nobody() {
        let designer = employee(Position::Designer);
        assert!(!may_manage(&designer, Position::Designer));
    }
}

pub mod engine;

use crate::db::{self, DbEmployee};
use crate::domain::models::Position;
use anyhow::Result;
use chrono::Utc;
use engine::{RatedTaskSample, WeeklyRateSample};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

/// The full evaluation record for one employee.
#[derive(Debug, Serialize)]
pub struct Evaluation {
    pub employee: DbEmployee,
    pub monthly_rate: f64,
    pub weekly_rate: f64,
    pub monthly_task_rate: f64,
    pub monthly_overall_evaluation: f64,
    pub all_time_evaluation: f64,
}

/// Fleet-wide averages over every non-executive employee, each skipping
/// employees whose metric is still 0.
#[derive(Debug, Serialize)]
pub struct FleetEvaluation {
    pub weekly: f64,
    pub monthly: f64,
    pub monthly_task_rate: f64,
    pub monthly_overall: f64,
}

async fn weekly_samples(pool: &PgPool, employee_id: Uuid) -> Result<Vec<WeeklyRateSample>> {
    let rows: Vec<(f64, chrono::DateTime<Utc>)> = sqlx::query_as(
        "SELECT rate, created_at FROM weekly_rates WHERE employee_id = $1 ORDER BY created_at DESC",
    )
    .bind(employee_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(rate, created_at)| WeeklyRateSample { rate, created_at })
        .collect())
}

/// Rated tasks only; a task that never got its rating is silently skipped by
/// the join, not treated as zero.
async fn rated_task_samples(pool: &PgPool, employee_id: Uuid) -> Result<Vec<RatedTaskSample>> {
    let rows: Vec<(f64, f64, chrono::DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT tr.on_time_rate, tr.rate, t.created_at
        FROM tasks t
        JOIN task_rates tr ON tr.task_id = t.id
        WHERE t.employee_id = $1
        "#,
    )
    .bind(employee_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(on_time_rate, rate, created_at)| RatedTaskSample {
            on_time_rate,
            rate,
            created_at,
        })
        .collect())
}

/// The rate tied to the most-recently-created week, 0 when the employee has
/// no weekly history or no rate for that week.
async fn latest_week_rate(pool: &PgPool, employee_id: Uuid, has_history: bool) -> Result<f64> {
    if !has_history {
        return Ok(0.0);
    }
    let Some(week) = db::latest_week(pool).await? else {
        return Ok(0.0);
    };
    let row: Option<(f64,)> = sqlx::query_as(
        "SELECT rate FROM weekly_rates WHERE week_id = $1 AND employee_id = $2",
    )
    .bind(week.id)
    .bind(employee_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(rate,)| rate).unwrap_or(0.0))
}

/// The task-rate metric alone, over a custom trailing window. The weekly
/// cycle uses it to score HR from the past week's rated tasks.
pub async fn task_rate_from(pool: &PgPool, employee_id: Uuid, days: i64) -> Result<f64> {
    let samples = rated_task_samples(pool, employee_id).await?;
    Ok(engine::task_rate_from(&samples, Utc::now(), days))
}

/// Fetches each sample set once and derives every metric from it.
pub async fn evaluate_employee(pool: &PgPool, employee: DbEmployee) -> Result<Evaluation> {
    let now = Utc::now();
    let weekly = weekly_samples(pool, employee.id).await?;
    let tasks = rated_task_samples(pool, employee.id).await?;
    let weekly_rate = latest_week_rate(pool, employee.id, !weekly.is_empty()).await?;

    Ok(Evaluation {
        monthly_rate: engine::monthly_rate(&weekly, now),
        weekly_rate,
        monthly_task_rate: engine::monthly_task_rate(&tasks, now),
        monthly_overall_evaluation: engine::monthly_overall_evaluation(&weekly, &tasks, now),
        all_time_evaluation: engine::all_time_evaluation(&weekly, &tasks),
        employee,
    })
}

/// Evaluations for every employee except the top executive, ordered
/// case-insensitively by name.
pub async fn evaluate_all(pool: &PgPool) -> Result<Vec<Evaluation>> {
    let employees = db::list_employees_excluding(pool, &[Position::Ceo]).await?;
    let mut evaluations = Vec::with_capacity(employees.len());
    for employee in employees {
        evaluations.push(evaluate_employee(pool, employee).await?);
    }
    Ok(evaluations)
}

pub async fn fleet_evaluation(pool: &PgPool) -> Result<FleetEvaluation> {
    let evaluations = evaluate_all(pool).await?;
    let weekly: Vec<f64> = evaluations.iter().map(|e| e.weekly_rate).collect();
    let monthly: Vec<f64> = evaluations.iter().map(|e| e.monthly_rate).collect();
    let task: Vec<f64> = evaluations.iter().map(|e| e.monthly_task_rate).collect();
    let overall: Vec<f64> = evaluations
        .iter()
        .map(|e| e.monthly_overall_evaluation)
        .collect();
    Ok(FleetEvaluation {
        weekly: engine::fleet_average(&weekly),
        monthly: engine::fleet_average(&monthly),
        monthly_task_rate: engine::fleet_average(&task),
        monthly_overall: engine::fleet_average(&overall),
    })
}

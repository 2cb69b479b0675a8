//! Submission and rating of tasks, including the HR oversight reminder that
//! shadows every non-HR submission until somebody rates it.

use crate::db::{self, DbEmployee, DbTask};
use crate::domain::models::{Position, TaskStatus};
use crate::domain::Actor;
use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::PgPool;

pub const OVERSIGHT_TASK_NAME: &str = "Rate task";
const OVERSIGHT_DEADLINE_DAYS: i64 = 3;

/// Full marks when the work landed before the deadline, half otherwise.
pub const ON_TIME_SCORE: f64 = 5.0;
pub const LATE_SCORE: f64 = 2.5;

#[derive(Debug, thiserror::Error)]
pub enum TaskRatingError {
    #[error("task was already submitted")]
    AlreadySubmitted,
    #[error("task has not been submitted yet")]
    NotSubmitted,
    #[error("task was already rated")]
    AlreadyRated,
    #[error("rate must be between 0 and 5")]
    RateOutOfRange,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct SubmissionOutcome {
    pub status: TaskStatus,
    pub oversight_created: bool,
}

/// Marks a task submitted, deriving its timeliness from the deadline, and
/// hands HR a reminder task keyed to it when the submitter is not HR.
pub async fn submit_task(
    pool: &PgPool,
    actor: &Actor,
    submitter: &DbEmployee,
    task: &DbTask,
) -> Result<SubmissionOutcome, TaskRatingError> {
    if !matches!(task.status, TaskStatus::InProgress | TaskStatus::Overdue) {
        return Err(TaskRatingError::AlreadySubmitted);
    }

    let now = Utc::now();
    let status = match task.deadline_at {
        Some(deadline) if now > deadline => TaskStatus::LateSubmission,
        _ => TaskStatus::OnTime,
    };
    db::submit_task(pool, actor, task.id, status, now)
        .await
        .map_err(TaskRatingError::Other)?;

    let mut oversight_created = false;
    if submitter.position != Position::HumanResources {
        match db::find_employee_by_position(pool, Position::HumanResources).await? {
            Some(hr) => {
                let description = format!(
                    "Don't forget to rate {}'s submitted task: '{}'.",
                    submitter.name, task.name
                );
                db::create_task(
                    pool,
                    actor,
                    hr.id,
                    OVERSIGHT_TASK_NAME,
                    &description,
                    Some(now + Duration::days(OVERSIGHT_DEADLINE_DAYS)),
                    Some(task.id),
                )
                .await?;
                oversight_created = true;
            }
            None => {
                tracing::warn!(
                    "no HR employee to remind about rating task {}",
                    task.id
                );
            }
        }
    }

    Ok(SubmissionOutcome {
        status,
        oversight_created,
    })
}

pub struct RatingOutcome {
    pub on_time_rate: f64,
    pub warnings: Vec<String>,
}

/// Records the quality rating for a submitted task. The timeliness component
/// is derived, not chosen by the rater. The oversight reminder attached to
/// the task is settled as a side effect: an HR rater gets it auto-submitted
/// and scored by whether the reminder itself was still in progress, while an
/// executive rating directly makes the reminder moot and it is removed.
pub async fn rate_task(
    pool: &PgPool,
    actor: &Actor,
    rater: &DbEmployee,
    task: &DbTask,
    rate: f64,
) -> Result<RatingOutcome, TaskRatingError> {
    if !matches!(task.status, TaskStatus::OnTime | TaskStatus::LateSubmission) {
        return Err(TaskRatingError::NotSubmitted);
    }
    if task.is_rated || db::find_task_rate(pool, task.id).await?.is_some() {
        return Err(TaskRatingError::AlreadyRated);
    }
    if !(0.0..=5.0).contains(&rate) {
        return Err(TaskRatingError::RateOutOfRange);
    }

    let on_time_rate = if task.status == TaskStatus::OnTime {
        ON_TIME_SCORE
    } else {
        LATE_SCORE
    };
    db::create_task_rate(pool, actor, task.id, on_time_rate, rate).await?;
    db::mark_task_rated(pool, actor, task.id).await?;

    let mut warnings = Vec::new();
    match db::find_oversight_task(pool, task.id).await? {
        Some(oversight) if rater.position.is_executive() => {
            db::delete_task(pool, actor, oversight.id).await?;
        }
        Some(oversight) => {
            let (status, reminder_on_time) = if oversight.status == TaskStatus::InProgress {
                (TaskStatus::OnTime, ON_TIME_SCORE)
            } else {
                (TaskStatus::LateSubmission, LATE_SCORE)
            };
            db::submit_task(pool, actor, oversight.id, status, Utc::now()).await?;
            db::create_task_rate(pool, actor, oversight.id, reminder_on_time, ON_TIME_SCORE)
                .await?;
            db::mark_task_rated(pool, actor, oversight.id).await?;
        }
        None if !rater.position.is_executive() => {
            tracing::warn!("no open rating reminder found for task {}", task.id);
            warnings.push("The rating reminder for this task could not be found.".to_string());
        }
        None => {}
    }

    Ok(RatingOutcome {
        on_time_rate,
        warnings,
    })
}

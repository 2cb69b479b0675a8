//! The weekly evaluation cycle: resolving which week is open for ratings,
//! taking the submitted scores, and closing out HR's recurring rating task.
//!
//! The whole submission runs inside one transaction: either every weekly
//! rate lands, the week flips to rated and the rating task settles, or
//! nothing is written and the submission can simply be retried.

use crate::db::{self, DbEmployee, DbWeek};
use crate::domain::models::{Position, TaskStatus};
use crate::domain::Actor;
use crate::evaluation;
use crate::params::{self, Parameter};
use anyhow::Result;
use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

/// HR's own weekly score is derived from its rated tasks over this window.
const HR_TASK_RATE_WINDOW_DAYS: i64 = 7;

#[derive(Debug, thiserror::Error)]
pub enum WeeklyCycleError {
    #[error("no week is awaiting ratings")]
    NoOpenWeek,
    #[error("missing rating for employee {0}")]
    MissingRating(Uuid),
    #[error("rating for employee {0} must be between 0 and 5")]
    RatingOutOfRange(Uuid),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct WeekResolution {
    pub week: Option<DbWeek>,
    pub discarded: usize,
    pub warnings: Vec<String>,
}

/// Splits unrated weeks (ordered oldest-first, as the store returns them)
/// into the one that survives and the stale backlog. Only the newest week is
/// ever rated; a backlog means the cycle was skipped and gets flagged upward.
fn split_week_backlog(mut weeks: Vec<DbWeek>) -> (Option<DbWeek>, Vec<DbWeek>, Vec<String>) {
    let week = weeks.pop();
    let mut warnings = Vec::new();
    if !weeks.is_empty() {
        warnings.push(format!(
            "{} unrated weeks had accumulated; older ones were discarded. \
             Notify the executive that the weekly cycle was skipped.",
            weeks.len() + 1
        ));
    }
    (week, weeks, warnings)
}

/// Every non-executive, non-HR employee must be scored, and every score must
/// lie on the rating scale. Checked before anything is written.
fn validate_scores(
    employees: &[DbEmployee],
    scores: &HashMap<Uuid, f64>,
) -> Result<(), WeeklyCycleError> {
    for employee in employees {
        let rate = *scores
            .get(&employee.id)
            .ok_or(WeeklyCycleError::MissingRating(employee.id))?;
        if !(0.0..=5.0).contains(&rate) {
            return Err(WeeklyCycleError::RatingOutOfRange(employee.id));
        }
    }
    Ok(())
}

/// The single week currently open for ratings. When several unrated weeks
/// have piled up, only the newest survives; the stale ones are dropped.
pub async fn resolve_week_to_rate(
    conn: &mut PgConnection,
    actor: &Actor,
) -> Result<WeekResolution> {
    let weeks = db::unrated_weeks(&mut *conn).await?;
    let (week, stale, warnings) = split_week_backlog(weeks);

    if !stale.is_empty() {
        for old in &stale {
            db::delete_week(&mut *conn, actor, old.id).await?;
        }
        tracing::warn!(
            "{} stale unrated weeks discarded, keeping the newest",
            stale.len()
        );
    }

    Ok(WeekResolution {
        week,
        discarded: stale.len(),
        warnings,
    })
}

pub struct WeeklySubmission {
    pub week_id: i64,
    pub rated_employees: usize,
    pub hr_auto_rate: Option<f64>,
    pub warnings: Vec<String>,
}

/// Applies the submitted weekly scores, closes the week, and settles the
/// recurring rating task the week opened with. HR does not get scored by
/// hand; its rate is computed from its own rated tasks of the past week.
pub async fn submit_weekly_ratings(
    pool: &PgPool,
    actor: &Actor,
    scores: &HashMap<Uuid, f64>,
) -> Result<WeeklySubmission, WeeklyCycleError> {
    let mut tx = pool.begin().await.map_err(anyhow::Error::from)?;

    let resolution = resolve_week_to_rate(&mut tx, actor).await?;
    let week = resolution.week.ok_or(WeeklyCycleError::NoOpenWeek)?;
    let mut warnings = resolution.warnings;

    let employees =
        db::list_employees_excluding(&mut *tx, &[Position::Ceo, Position::HumanResources])
            .await?;
    validate_scores(&employees, scores)?;
    for employee in &employees {
        db::create_weekly_rate(&mut *tx, actor, week.id, employee.id, scores[&employee.id])
            .await?;
    }

    let hr = db::find_employee_by_position(pool, Position::HumanResources).await?;
    let hr_auto_rate = match &hr {
        Some(hr) => {
            let rate =
                evaluation::task_rate_from(pool, hr.id, HR_TASK_RATE_WINDOW_DAYS).await?;
            db::create_weekly_rate(&mut *tx, actor, week.id, hr.id, rate).await?;
            Some(rate)
        }
        None => {
            tracing::warn!("no HR employee, week {} closes without an HR rate", week.id);
            warnings.push("No HR employee exists; the week was closed without one.".to_string());
            None
        }
    };

    db::mark_week_rated(&mut *tx, actor, week.id).await?;

    if let Some(hr) = &hr {
        settle_rating_task(&mut tx, pool, actor, hr.id, &mut warnings).await?;
    }

    tx.commit().await.map_err(anyhow::Error::from)?;

    Ok(WeeklySubmission {
        week_id: week.id,
        rated_employees: employees.len(),
        hr_auto_rate,
        warnings,
    })
}

/// Closes HR's recurring rating task now that the ratings are in: the newest
/// unrated copy is submitted on time with full marks, duplicates left behind
/// by skipped cycles are dropped.
async fn settle_rating_task(
    conn: &mut PgConnection,
    pool: &PgPool,
    actor: &Actor,
    hr_id: Uuid,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let name = params::get_str(pool, Parameter::WeeklyRateTaskName)
        .await
        .map_err(anyhow::Error::from)?;
    let mut tasks = db::find_unrated_tasks_named(&mut *conn, hr_id, &name).await?;

    if tasks.is_empty() {
        tracing::warn!("no open '{}' task to settle, something went wrong", name);
        warnings.push(format!(
            "Something went wrong: no open '{}' task was found to close.",
            name
        ));
        return Ok(());
    }

    // Newest first; extras are leftovers from skipped cycles.
    let task = tasks.remove(0);
    for stale in tasks {
        db::delete_task_records(&mut *conn, actor, stale.id).await?;
    }

    db::submit_task(&mut *conn, actor, task.id, TaskStatus::OnTime, Utc::now()).await?;
    db::create_task_rate(&mut *conn, actor, task.id, 5.0, 5.0).await?;
    db::mark_task_rated(&mut *conn, actor, task.id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn week(id: i64) -> DbWeek {
        let start = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        DbWeek {
            id,
            start_date: start,
            end_date: start + chrono::Duration::days(6),
            is_rated: false,
            created_at: Utc::now(),
        }
    }

    fn employee(id: Uuid) -> DbEmployee {
        DbEmployee {
            id,
            name: "Test".into(),
            username: "test".into(),
            password_hash: String::new(),
            position: Position::Designer,
            created_at: Utc::now(),
            created_by: "test".into(),
            updated_at: Utc::now(),
            updated_by: "test".into(),
        }
    }

    #[test]
    fn test_backlog_keeps_only_the_newest_week() {
        let (week_to_rate, stale, warnings) = split_week_backlog(vec![week(1), week(2), week(3)]);
        assert_eq!(week_to_rate.map(|w| w.id), Some(3));
        assert_eq!(stale.iter().map(|w| w.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("3 unrated weeks"));
    }

    #[test]
    fn test_single_week_passes_through_without_warnings() {
        let (week_to_rate, stale, warnings) = split_week_backlog(vec![week(7)]);
        assert_eq!(week_to_rate.map(|w| w.id), Some(7));
        assert!(stale.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_no_weeks_means_nothing_to_rate() {
        let (week_to_rate, stale, warnings) = split_week_backlog(vec![]);
        assert!(week_to_rate.is_none());
        assert!(stale.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_scores_are_validated_before_any_rate_is_written() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let employees = vec![employee(a), employee(b)];

        let mut scores = HashMap::from([(a, 4.0)]);
        assert!(matches!(
            validate_scores(&employees, &scores),
            Err(WeeklyCycleError::MissingRating(id)) if id == b
        ));

        scores.insert(b, 5.5);
        assert!(matches!(
            validate_scores(&employees, &scores),
            Err(WeeklyCycleError::RatingOutOfRange(id)) if id == b
        ));

        scores.insert(b, 5.0);
        assert!(validate_scores(&employees, &scores).is_ok());
    }
}

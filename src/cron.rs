//! Bodies of the scheduled jobs. The scheduler itself (cadence, wiring) lives
//! in `main.rs`; these functions assume singleton, non-overlapping runs.

use crate::db;
use crate::domain::actor::SYSTEM_CRON;
use crate::domain::models::{swept_status, Position};
use crate::params::{self, Parameter};
use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use sqlx::PgPool;

/// Days a closed week may linger before the next one is due.
const WEEK_CARRY_OVER_DAYS: i64 = 6;
const TASK_SWEEP_WINDOW_DAYS: i64 = 31;

/// A new rating week is due when none exists yet, or when the latest week's
/// end date plus the carry-over window has passed.
pub fn week_rollover_due(latest_end: Option<NaiveDate>, today: NaiveDate) -> bool {
    match latest_end {
        None => true,
        Some(end) => end + Duration::days(WEEK_CARRY_OVER_DAYS) < today,
    }
}

/// Opens the next rating week and hands HR the recurring "rate employees"
/// task. Running it again before the period elapses is a no-op.
pub async fn add_week_to_rate(pool: &PgPool) -> Result<()> {
    tracing::info!("cron: checking whether a new rating week is due");
    let today = Utc::now().date_naive();
    let latest = db::latest_week(pool).await?;
    if !week_rollover_due(latest.map(|w| w.end_date), today) {
        tracing::info!("cron: current week still open, nothing to add");
        return Ok(());
    }

    let Some(hr) = db::find_employee_by_position(pool, Position::HumanResources).await? else {
        tracing::warn!("cron: no HR employee exists, week to rate was not added");
        return Ok(());
    };

    let week = db::create_week(
        pool,
        &SYSTEM_CRON,
        today - Duration::days(WEEK_CARRY_OVER_DAYS),
        today,
    )
    .await?;

    let name = params::get_str(pool, Parameter::WeeklyRateTaskName).await?;
    let description = params::get_str(pool, Parameter::WeeklyRateTaskDescription).await?;
    let deadline_days = params::get_int(pool, Parameter::WeeklyRateTaskDeadlineDays).await?;
    // A zero offset means the task is open-ended.
    let deadline = (deadline_days > 0).then(|| Utc::now() + Duration::days(deadline_days));

    db::create_task(pool, &SYSTEM_CRON, hr.id, &name, &description, deadline, None).await?;
    tracing::info!("cron: week {} opened and rating task assigned to HR", week.id);
    Ok(())
}

/// Flips in-progress tasks past their deadline to overdue, and overdue tasks
/// whose deadline moved into the future back to in-progress.
pub async fn check_tasks_status(pool: &PgPool) -> Result<()> {
    tracing::info!("cron: sweeping task statuses");
    let now = Utc::now();
    let since = now - Duration::days(TASK_SWEEP_WINDOW_DAYS);
    for task in db::list_sweepable_tasks(pool, since).await? {
        if let Some(status) = swept_status(task.status, task.deadline_at, task.submitted_at, now) {
            db::set_task_status(pool, &SYSTEM_CRON, task.id, status).await?;
            tracing::info!("cron: task {} status changed to {:?}", task.id, status);
        }
    }
    Ok(())
}

/// Advances the rolling audit cursor to the oldest entry still inside the
/// failed-login reset window, then drops normal-post entries the cursor left
/// behind. Keeps the audit table bounded without losing countable data.
pub async fn advance_audit_cursor(pool: &PgPool) -> Result<()> {
    let cursor = params::get_int(pool, Parameter::AuditCursor).await?;
    let reset_days = params::get_int(pool, Parameter::LoginAttemptsResetDays).await?;
    let since = Utc::now() - Duration::days(reset_days);

    let new_cursor = match db::oldest_entry_in_window(pool, cursor, since).await? {
        Some(id) => id,
        None => db::latest_entry_id(pool).await?.unwrap_or(1),
    };

    let pruned = db::delete_normal_posts_before(pool, new_cursor).await?;
    params::set_parameter(pool, &SYSTEM_CRON, Parameter::AuditCursor, &new_cursor.to_string())
        .await?;
    tracing::info!(
        "cron: audit cursor advanced to [{}], {} stale normal posts pruned",
        new_cursor,
        pruned
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_week_rollover_due() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 16).unwrap();
        // No week yet: always due.
        assert!(week_rollover_due(None, today));
        // Week that just ended: the carry-over window keeps it current.
        assert!(!week_rollover_due(Some(today), today));
        assert!(!week_rollover_due(
            Some(today - Duration::days(WEEK_CARRY_OVER_DAYS)),
            today
        ));
        // Past the carry-over window: due again.
        assert!(week_rollover_due(
            Some(today - Duration::days(WEEK_CARRY_OVER_DAYS + 1)),
            today
        ));
    }
}

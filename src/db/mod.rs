pub mod seed;

use crate::domain::models::{AuditAction, BlockType, Position, TaskStatus};
use crate::domain::Actor;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbEmployee {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub position: Position,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbTask {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub deadline_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub is_rated: bool,
    pub parent_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbTaskRate {
    pub id: Uuid,
    pub task_id: Uuid,
    pub on_time_rate: f64,
    pub rate: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbWeek {
    pub id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_rated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbWeeklyRate {
    pub id: Uuid,
    pub week_id: i64,
    pub employee_id: Uuid,
    pub rate: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbAuditEntry {
    pub id: i64,
    pub ip: String,
    pub user_agent: String,
    pub action: AuditAction,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbBlockedClient {
    pub id: Uuid,
    pub ip: String,
    pub user_agent: String,
    pub block_type: BlockType,
    pub blocked_times: i32,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------- employees

pub async fn create_employee(
    pool: &PgPool,
    actor: &Actor,
    name: &str,
    username: &str,
    password_hash: &str,
    position: Position,
) -> Result<DbEmployee> {
    let stamped = actor.to_string();
    let employee = sqlx::query_as::<_, DbEmployee>(
        r#"
        INSERT INTO employees (name, username, password_hash, position, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $5)
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(username)
    .bind(password_hash)
    .bind(position)
    .bind(&stamped)
    .fetch_one(pool)
    .await?;
    Ok(employee)
}

pub async fn find_employee(pool: &PgPool, id: Uuid) -> Result<Option<DbEmployee>> {
    let employee = sqlx::query_as::<_, DbEmployee>("SELECT * FROM employees WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(employee)
}

pub async fn find_employee_by_username(pool: &PgPool, username: &str) -> Result<Option<DbEmployee>> {
    let employee = sqlx::query_as::<_, DbEmployee>("SELECT * FROM employees WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(employee)
}

/// The single employee holding `position`, or `None` when there is none or
/// the position is ambiguously held by several.
pub async fn find_employee_by_position(
    pool: &PgPool,
    position: Position,
) -> Result<Option<DbEmployee>> {
    let mut rows = sqlx::query_as::<_, DbEmployee>(
        "SELECT * FROM employees WHERE position = $1 ORDER BY created_at",
    )
    .bind(position)
    .fetch_all(pool)
    .await?;
    if rows.len() > 1 {
        tracing::warn!("position {:?} is held by {} employees", position, rows.len());
        return Ok(None);
    }
    Ok(rows.pop())
}

pub async fn list_employees(pool: &PgPool) -> Result<Vec<DbEmployee>> {
    let employees =
        sqlx::query_as::<_, DbEmployee>("SELECT * FROM employees ORDER BY lower(name)")
            .fetch_all(pool)
            .await?;
    Ok(employees)
}

pub async fn list_employees_excluding(
    ex: impl PgExecutor<'_>,
    excluded: &[Position],
) -> Result<Vec<DbEmployee>> {
    let employees = sqlx::query_as::<_, DbEmployee>(
        "SELECT * FROM employees WHERE position != ALL($1) ORDER BY lower(name)",
    )
    .bind(excluded)
    .fetch_all(ex)
    .await?;
    Ok(employees)
}

pub async fn update_employee(
    pool: &PgPool,
    actor: &Actor,
    id: Uuid,
    name: &str,
    position: Position,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE employees
        SET name = $2, position = $3, updated_at = now(), updated_by = $4
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(position)
    .bind(actor.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Deletes an employee with its owned records. The pre-delete hooks run in
/// order (task rates, then tasks, then weekly rates) inside one transaction;
/// FK cascades are deliberately not relied on for the rate/task ordering.
pub async fn delete_employee(pool: &PgPool, actor: &Actor, id: Uuid) -> Result<()> {
    let stamped = actor.to_string();
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM task_rates WHERE task_id IN (SELECT id FROM tasks WHERE employee_id = $1)",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM tasks WHERE employee_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM weekly_rates WHERE employee_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM employees WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    tracing::info!("employee {} deleted by {}", id, stamped);
    Ok(())
}

// -------------------------------------------------------------------- tasks

pub async fn create_task(
    pool: &PgPool,
    actor: &Actor,
    employee_id: Uuid,
    name: &str,
    description: &str,
    deadline_at: Option<DateTime<Utc>>,
    parent_task_id: Option<Uuid>,
) -> Result<DbTask> {
    let stamped = actor.to_string();
    let task = sqlx::query_as::<_, DbTask>(
        r#"
        INSERT INTO tasks (employee_id, name, description, deadline_at, parent_task_id,
                           created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $6)
        RETURNING *
        "#,
    )
    .bind(employee_id)
    .bind(name)
    .bind(description)
    .bind(deadline_at)
    .bind(parent_task_id)
    .bind(&stamped)
    .fetch_one(pool)
    .await?;
    Ok(task)
}

pub async fn find_task(pool: &PgPool, id: Uuid) -> Result<Option<DbTask>> {
    let task = sqlx::query_as::<_, DbTask>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(task)
}

pub async fn list_tasks(pool: &PgPool) -> Result<Vec<DbTask>> {
    let tasks = sqlx::query_as::<_, DbTask>("SELECT * FROM tasks ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;
    Ok(tasks)
}

pub async fn list_tasks_for_employee(pool: &PgPool, employee_id: Uuid) -> Result<Vec<DbTask>> {
    let tasks = sqlx::query_as::<_, DbTask>(
        "SELECT * FROM tasks WHERE employee_id = $1 ORDER BY created_at DESC",
    )
    .bind(employee_id)
    .fetch_all(pool)
    .await?;
    Ok(tasks)
}

/// Submitted tasks awaiting a rating, ordered by owner name. The HR
/// employee's own tasks only show up for the executive rater.
pub async fn list_unrated_submitted_tasks(pool: &PgPool, include_hr: bool) -> Result<Vec<DbTask>> {
    let tasks = sqlx::query_as::<_, DbTask>(
        r#"
        SELECT t.* FROM tasks t
        JOIN employees e ON e.id = t.employee_id
        WHERE t.status IN ('on_time', 'late_submission')
          AND NOT t.is_rated
          AND ($1 OR e.position != 'HUMAN_RESOURCES')
        ORDER BY lower(e.name)
        "#,
    )
    .bind(include_hr)
    .fetch_all(pool)
    .await?;
    Ok(tasks)
}

/// Unrated copies of the recurring rating task for one employee, newest
/// first. More than one means the weekly cycle ran without anyone closing it.
pub async fn find_unrated_tasks_named(
    ex: impl PgExecutor<'_>,
    employee_id: Uuid,
    name: &str,
) -> Result<Vec<DbTask>> {
    let tasks = sqlx::query_as::<_, DbTask>(
        r#"
        SELECT * FROM tasks
        WHERE employee_id = $1 AND name = $2 AND NOT is_rated
        ORDER BY created_at DESC
        "#,
    )
    .bind(employee_id)
    .bind(name)
    .fetch_all(ex)
    .await?;
    Ok(tasks)
}

pub async fn find_oversight_task(pool: &PgPool, parent_task_id: Uuid) -> Result<Option<DbTask>> {
    let task = sqlx::query_as::<_, DbTask>(
        "SELECT * FROM tasks WHERE parent_task_id = $1 AND NOT is_rated",
    )
    .bind(parent_task_id)
    .fetch_optional(pool)
    .await?;
    Ok(task)
}

/// In-progress/overdue tasks from the trailing window, for the status sweep.
pub async fn list_sweepable_tasks(pool: &PgPool, since: DateTime<Utc>) -> Result<Vec<DbTask>> {
    let tasks = sqlx::query_as::<_, DbTask>(
        r#"
        SELECT * FROM tasks
        WHERE status IN ('in_progress', 'overdue') AND created_at >= $1
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(tasks)
}

pub async fn set_task_status(
    pool: &PgPool,
    actor: &Actor,
    id: Uuid,
    status: TaskStatus,
) -> Result<()> {
    sqlx::query("UPDATE tasks SET status = $2, updated_at = now(), updated_by = $3 WHERE id = $1")
        .bind(id)
        .bind(status)
        .bind(actor.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_task_deadline(
    pool: &PgPool,
    actor: &Actor,
    id: Uuid,
    deadline_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET deadline_at = $2, updated_at = now(), updated_by = $3 WHERE id = $1",
    )
    .bind(id)
    .bind(deadline_at)
    .bind(actor.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Stamps the submission and its final timeliness status in one go.
pub async fn submit_task(
    ex: impl PgExecutor<'_>,
    actor: &Actor,
    id: Uuid,
    status: TaskStatus,
    submitted_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE tasks
        SET status = $2, submitted_at = $3, updated_at = now(), updated_by = $4
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(submitted_at)
    .bind(actor.to_string())
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn mark_task_rated(ex: impl PgExecutor<'_>, actor: &Actor, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET is_rated = TRUE, updated_at = now(), updated_by = $2 WHERE id = $1",
    )
    .bind(id)
    .bind(actor.to_string())
    .execute(ex)
    .await?;
    Ok(())
}

/// Deletes a task, its rating going first (the hook ordering matters).
pub async fn delete_task(pool: &PgPool, actor: &Actor, id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await?;
    delete_task_records(&mut tx, actor, id).await?;
    tx.commit().await?;
    Ok(())
}

/// The delete statements themselves, for callers already inside a
/// transaction.
pub async fn delete_task_records(
    conn: &mut PgConnection,
    actor: &Actor,
    id: Uuid,
) -> Result<()> {
    sqlx::query("DELETE FROM task_rates WHERE task_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM tasks WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    tracing::info!("task {} deleted by {}", id, actor);
    Ok(())
}

// --------------------------------------------------------------- task rates

pub async fn create_task_rate(
    ex: impl PgExecutor<'_>,
    actor: &Actor,
    task_id: Uuid,
    on_time_rate: f64,
    rate: f64,
) -> Result<DbTaskRate> {
    let task_rate = sqlx::query_as::<_, DbTaskRate>(
        r#"
        INSERT INTO task_rates (task_id, on_time_rate, rate, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $4)
        RETURNING id, task_id, on_time_rate, rate, created_at
        "#,
    )
    .bind(task_id)
    .bind(on_time_rate)
    .bind(rate)
    .bind(actor.to_string())
    .fetch_one(ex)
    .await?;
    Ok(task_rate)
}

pub async fn find_task_rate(pool: &PgPool, task_id: Uuid) -> Result<Option<DbTaskRate>> {
    let task_rate = sqlx::query_as::<_, DbTaskRate>(
        "SELECT id, task_id, on_time_rate, rate, created_at FROM task_rates WHERE task_id = $1",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;
    Ok(task_rate)
}

// -------------------------------------------------------------------- weeks

pub async fn create_week(
    pool: &PgPool,
    actor: &Actor,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<DbWeek> {
    let week = sqlx::query_as::<_, DbWeek>(
        r#"
        INSERT INTO weeks (start_date, end_date, created_by, updated_by)
        VALUES ($1, $2, $3, $3)
        RETURNING id, start_date, end_date, is_rated, created_at
        "#,
    )
    .bind(start_date)
    .bind(end_date)
    .bind(actor.to_string())
    .fetch_one(pool)
    .await?;
    Ok(week)
}

/// The most recently created week by insertion order, rated or not.
pub async fn latest_week(pool: &PgPool) -> Result<Option<DbWeek>> {
    let week = sqlx::query_as::<_, DbWeek>(
        "SELECT id, start_date, end_date, is_rated, created_at FROM weeks ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(week)
}

/// Unrated weeks, oldest first.
pub async fn unrated_weeks(ex: impl PgExecutor<'_>) -> Result<Vec<DbWeek>> {
    let weeks = sqlx::query_as::<_, DbWeek>(
        "SELECT id, start_date, end_date, is_rated, created_at FROM weeks WHERE NOT is_rated ORDER BY id",
    )
    .fetch_all(ex)
    .await?;
    Ok(weeks)
}

pub async fn mark_week_rated(ex: impl PgExecutor<'_>, actor: &Actor, id: i64) -> Result<()> {
    sqlx::query("UPDATE weeks SET is_rated = TRUE, updated_at = now(), updated_by = $2 WHERE id = $1")
        .bind(id)
        .bind(actor.to_string())
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn delete_week(ex: impl PgExecutor<'_>, actor: &Actor, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM weeks WHERE id = $1")
        .bind(id)
        .execute(ex)
        .await?;
    tracing::info!("week {} deleted by {}", id, actor);
    Ok(())
}

// ------------------------------------------------------------- weekly rates

pub async fn create_weekly_rate(
    ex: impl PgExecutor<'_>,
    actor: &Actor,
    week_id: i64,
    employee_id: Uuid,
    rate: f64,
) -> Result<DbWeeklyRate> {
    let weekly_rate = sqlx::query_as::<_, DbWeeklyRate>(
        r#"
        INSERT INTO weekly_rates (week_id, employee_id, rate, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $4)
        RETURNING id, week_id, employee_id, rate, created_at
        "#,
    )
    .bind(week_id)
    .bind(employee_id)
    .bind(rate)
    .bind(actor.to_string())
    .fetch_one(ex)
    .await?;
    Ok(weekly_rate)
}

// -------------------------------------------------------------- audit trail

pub async fn record_audit(
    ex: impl PgExecutor<'_>,
    actor: &Actor,
    ip: &str,
    user_agent: &str,
    action: AuditAction,
    username: &str,
) -> Result<DbAuditEntry> {
    let entry = sqlx::query_as::<_, DbAuditEntry>(
        r#"
        INSERT INTO audit_entries (ip, user_agent, action, username, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $5)
        RETURNING id, ip, user_agent, action, username, created_at
        "#,
    )
    .bind(ip)
    .bind(user_agent)
    .bind(action)
    .bind(username)
    .bind(actor.to_string())
    .fetch_one(ex)
    .await?;
    Ok(entry)
}

/// Entries for one IP and action at or past the rolling cursor, optionally
/// bounded to a trailing time window.
pub async fn count_audit_entries(
    ex: impl PgExecutor<'_>,
    ip: &str,
    action: AuditAction,
    cursor: i64,
    since: Option<DateTime<Utc>>,
) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT count(*) FROM audit_entries
        WHERE ip = $1 AND action = $2 AND id >= $3
          AND ($4::timestamptz IS NULL OR created_at >= $4)
        "#,
    )
    .bind(ip)
    .bind(action)
    .bind(cursor)
    .bind(since)
    .fetch_one(ex)
    .await?;
    Ok(count)
}

pub async fn ip_seen_since_cursor(ex: impl PgExecutor<'_>, ip: &str, cursor: i64) -> Result<bool> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM audit_entries WHERE ip = $1 AND id >= $2)")
            .bind(ip)
            .bind(cursor)
            .fetch_one(ex)
            .await?;
    Ok(exists)
}

pub async fn ip_seen_ever(ex: impl PgExecutor<'_>, ip: &str) -> Result<bool> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM audit_entries WHERE ip = $1)")
            .bind(ip)
            .fetch_one(ex)
            .await?;
    Ok(exists)
}

/// Keeps only the most recent normal-post entry for the IP past the cursor,
/// bounding the audit table on well-behaved traffic.
pub async fn prune_normal_posts(ex: impl PgExecutor<'_>, ip: &str, cursor: i64) -> Result<u64> {
    let deleted = sqlx::query(
        r#"
        DELETE FROM audit_entries
        WHERE ip = $1 AND action = 'normal_post' AND id >= $2
          AND id != (SELECT max(id) FROM audit_entries
                     WHERE ip = $1 AND action = 'normal_post' AND id >= $2)
        "#,
    )
    .bind(ip)
    .bind(cursor)
    .execute(ex)
    .await?;
    Ok(deleted.rows_affected())
}

/// The oldest entry id still inside the lookback window, past the current
/// cursor. `None` when the window holds nothing.
pub async fn oldest_entry_in_window(
    pool: &PgPool,
    cursor: i64,
    since: DateTime<Utc>,
) -> Result<Option<i64>> {
    let (id,): (Option<i64>,) =
        sqlx::query_as("SELECT min(id) FROM audit_entries WHERE id >= $1 AND created_at >= $2")
            .bind(cursor)
            .bind(since)
            .fetch_one(pool)
            .await?;
    Ok(id)
}

pub async fn latest_entry_id(pool: &PgPool) -> Result<Option<i64>> {
    let (id,): (Option<i64>,) = sqlx::query_as("SELECT max(id) FROM audit_entries")
        .fetch_one(pool)
        .await?;
    Ok(id)
}

pub async fn delete_normal_posts_before(pool: &PgPool, cursor: i64) -> Result<u64> {
    let deleted = sqlx::query("DELETE FROM audit_entries WHERE id < $1 AND action = 'normal_post'")
        .bind(cursor)
        .execute(pool)
        .await?;
    Ok(deleted.rows_affected())
}

// ---------------------------------------------------------- blocked clients

pub async fn find_blocked_client(
    ex: impl PgExecutor<'_>,
    ip: &str,
) -> Result<Option<DbBlockedClient>> {
    let client = sqlx::query_as::<_, DbBlockedClient>(
        "SELECT id, ip, user_agent, block_type, blocked_times, updated_at FROM blocked_clients WHERE ip = $1",
    )
    .bind(ip)
    .fetch_optional(ex)
    .await?;
    Ok(client)
}

pub async fn create_blocked_client(
    ex: impl PgExecutor<'_>,
    actor: &Actor,
    ip: &str,
    user_agent: &str,
    block_type: BlockType,
) -> Result<DbBlockedClient> {
    let client = sqlx::query_as::<_, DbBlockedClient>(
        r#"
        INSERT INTO blocked_clients (ip, user_agent, block_type, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $4)
        RETURNING id, ip, user_agent, block_type, blocked_times, updated_at
        "#,
    )
    .bind(ip)
    .bind(user_agent)
    .bind(block_type)
    .bind(actor.to_string())
    .fetch_one(ex)
    .await?;
    Ok(client)
}

pub async fn update_blocked_client(
    ex: impl PgExecutor<'_>,
    actor: &Actor,
    ip: &str,
    block_type: BlockType,
    blocked_times: i32,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE blocked_clients
        SET block_type = $2, blocked_times = $3, updated_at = now(), updated_by = $4
        WHERE ip = $1
        "#,
    )
    .bind(ip)
    .bind(block_type)
    .bind(blocked_times)
    .bind(actor.to_string())
    .execute(ex)
    .await?;
    Ok(())
}

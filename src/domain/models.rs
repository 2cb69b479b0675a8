use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "employee_position", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Position {
    Ceo,
    HumanResources,
    WarehouseAdmin,
    AccountingManager,
    SocialMediaManager,
    Designer,
}

impl sqlx::postgres::PgHasArrayType for Position {
    fn array_type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("_employee_position")
    }
}

impl Position {
    pub fn is_executive(&self) -> bool {
        matches!(self, Position::Ceo)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    InProgress,
    OnTime,
    LateSubmission,
    Overdue,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "block_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Unblocked,
    Temporary,
    Indefinitely,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "audit_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    FirstVisit,
    LoggedIn,
    LoggedOut,
    LoggedFailed,
    NormalPost,
    SuspiciousPost,
    AttackAttempt,
}

/// Where an unsubmitted task stands relative to its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineState {
    Open,
    Pending,
    Overdue,
    Submitted,
}

/// Classifies a task against the clock. A task with a deadline in the past and
/// no submission is overdue; setting a new future deadline brings it back.
pub fn deadline_state(
    deadline_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DeadlineState {
    if submitted_at.is_some() {
        return DeadlineState::Submitted;
    }
    match deadline_at {
        None => DeadlineState::Open,
        Some(deadline) if deadline <= now => DeadlineState::Overdue,
        Some(_) => DeadlineState::Pending,
    }
}

/// The status an in-progress/overdue task should hold right now, or `None`
/// when no change is needed. Submitted and already-rated statuses are final.
pub fn swept_status(
    status: TaskStatus,
    deadline_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<TaskStatus> {
    let state = deadline_state(deadline_at, submitted_at, now);
    match (status, state) {
        (TaskStatus::InProgress, DeadlineState::Overdue) => Some(TaskStatus::Overdue),
        (TaskStatus::Overdue, DeadlineState::Pending | DeadlineState::Open) => {
            Some(TaskStatus::InProgress)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_deadline_state() {
        let now = Utc::now();
        assert_eq!(deadline_state(None, None, now), DeadlineState::Open);
        assert_eq!(
            deadline_state(Some(now - Duration::seconds(1)), None, now),
            DeadlineState::Overdue
        );
        assert_eq!(
            deadline_state(Some(now + Duration::days(3)), None, now),
            DeadlineState::Pending
        );
        assert_eq!(
            deadline_state(Some(now - Duration::days(3)), Some(now), now),
            DeadlineState::Submitted
        );
    }

    #[test]
    fn test_swept_status_flips_overdue() {
        let now = Utc::now();
        let past = Some(now - Duration::days(3));
        let future = Some(now + Duration::days(3));

        assert_eq!(
            swept_status(TaskStatus::InProgress, past, None, now),
            Some(TaskStatus::Overdue)
        );
        // A new future deadline reverts an overdue task.
        assert_eq!(
            swept_status(TaskStatus::Overdue, future, None, now),
            Some(TaskStatus::InProgress)
        );
        assert_eq!(swept_status(TaskStatus::InProgress, future, None, now), None);
        assert_eq!(swept_status(TaskStatus::Overdue, past, None, now), None);
        // Final statuses are never swept.
        assert_eq!(swept_status(TaskStatus::OnTime, past, None, now), None);
        assert_eq!(swept_status(TaskStatus::LateSubmission, past, None, now), None);
    }
}

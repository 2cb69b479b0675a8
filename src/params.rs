//! Runtime-tunable configuration, backed by the `parameters` table with
//! hardcoded fallbacks.

use crate::domain::Actor;
use sqlx::PgPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    AllowedLoginAttempts,
    LoginAttemptsResetDays,
    MaxTemporaryBlocks,
    TemporaryBlockPeriodDays,
    BetweenPostIntervalMs,
    AuditCursor,
    WeeklyRateTaskName,
    WeeklyRateTaskDescription,
    WeeklyRateTaskDeadlineDays,
}

impl Parameter {
    pub fn name(&self) -> &'static str {
        match self {
            Parameter::AllowedLoginAttempts => "ALLOWED_LOGIN_ATTEMPTS",
            Parameter::LoginAttemptsResetDays => "LOGIN_ATTEMPTS_RESET_DAYS",
            Parameter::MaxTemporaryBlocks => "MAX_TEMPORARY_BLOCKS",
            Parameter::TemporaryBlockPeriodDays => "TEMPORARY_BLOCK_PERIOD_DAYS",
            Parameter::BetweenPostIntervalMs => "BETWEEN_POST_INTERVAL_MS",
            Parameter::AuditCursor => "AUDIT_CURSOR",
            Parameter::WeeklyRateTaskName => "WEEKLY_RATE_TASK_NAME",
            Parameter::WeeklyRateTaskDescription => "WEEKLY_RATE_TASK_DESCRIPTION",
            Parameter::WeeklyRateTaskDeadlineDays => "WEEKLY_RATE_TASK_DEADLINE_DAYS",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            Parameter::AllowedLoginAttempts => "5",
            Parameter::LoginAttemptsResetDays => "1",
            Parameter::MaxTemporaryBlocks => "5",
            Parameter::TemporaryBlockPeriodDays => "1",
            Parameter::BetweenPostIntervalMs => "500",
            Parameter::AuditCursor => "1",
            Parameter::WeeklyRateTaskName => "Evaluate employees",
            Parameter::WeeklyRateTaskDescription => {
                "Make sure to rate each employee on their weekly evaluations."
            }
            Parameter::WeeklyRateTaskDeadlineDays => "7",
        }
    }

    pub const ALL: [Parameter; 9] = [
        Parameter::AllowedLoginAttempts,
        Parameter::LoginAttemptsResetDays,
        Parameter::MaxTemporaryBlocks,
        Parameter::TemporaryBlockPeriodDays,
        Parameter::BetweenPostIntervalMs,
        Parameter::AuditCursor,
        Parameter::WeeklyRateTaskName,
        Parameter::WeeklyRateTaskDescription,
        Parameter::WeeklyRateTaskDeadlineDays,
    ];
}

#[derive(Debug, thiserror::Error)]
pub enum ParameterError {
    #[error("parameter {key} holds a non-integer value {value:?}")]
    BadValue { key: &'static str, value: String },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

async fn stored_value(pool: &PgPool, key: &str) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM parameters WHERE name = $1")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(value,)| value))
}

pub async fn get_str(pool: &PgPool, param: Parameter) -> Result<String, ParameterError> {
    match stored_value(pool, param.name()).await? {
        Some(value) => Ok(value),
        None => {
            tracing::warn!("parameter {} not stored, using its default", param.name());
            Ok(param.default_value().to_string())
        }
    }
}

pub async fn get_int(pool: &PgPool, param: Parameter) -> Result<i64, ParameterError> {
    let raw = get_str(pool, param).await?;
    raw.trim().parse().map_err(|_| ParameterError::BadValue {
        key: param.name(),
        value: raw,
    })
}

pub async fn set_parameter(
    pool: &PgPool,
    actor: &Actor,
    param: Parameter,
    value: &str,
) -> Result<(), ParameterError> {
    let stamped = actor.to_string();
    sqlx::query(
        r#"
        INSERT INTO parameters (name, value, created_by, updated_by)
        VALUES ($1, $2, $3, $3)
        ON CONFLICT (name)
        DO UPDATE SET value = $2, updated_at = now(), updated_by = $3
        "#,
    )
    .bind(param.name())
    .bind(value)
    .bind(&stamped)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_parameter_has_a_parseable_default() {
        for param in Parameter::ALL {
            match param {
                Parameter::WeeklyRateTaskName | Parameter::WeeklyRateTaskDescription => {
                    assert!(!param.default_value().is_empty());
                }
                _ => {
                    param
                        .default_value()
                        .parse::<i64>()
                        .unwrap_or_else(|_| panic!("{} default must be an integer", param.name()));
                }
            }
        }
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = Parameter::ALL.iter().map(|p| p.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Parameter::ALL.len());
    }
}

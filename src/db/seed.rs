use crate::domain::actor::SYSTEM_SEED;
use crate::domain::models::Position;
use crate::params::Parameter;
use anyhow::Result;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};
use sqlx::PgPool;

pub async fn seed_all(pool: &PgPool) -> Result<()> {
    seed_parameters(pool).await?;
    seed_ceo(pool).await?;
    Ok(())
}

/// Writes any default parameter missing from the store. Values already tuned
/// by an admin are left alone.
async fn seed_parameters(pool: &PgPool) -> Result<()> {
    for param in Parameter::ALL {
        let inserted = sqlx::query(
            r#"
            INSERT INTO parameters (name, value, created_by, updated_by)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(param.name())
        .bind(param.default_value())
        .bind(SYSTEM_SEED.to_string())
        .execute(pool)
        .await?;
        if inserted.rows_affected() > 0 {
            tracing::info!("default parameter {} added to the database", param.name());
        }
    }
    Ok(())
}

/// Bootstraps the top executive on first boot. Every other employee is
/// created through the HR pages.
async fn seed_ceo(pool: &PgPool) -> Result<()> {
    let (existing,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM employees WHERE position = 'CEO'")
            .fetch_one(pool)
            .await?;
    if existing > 0 {
        return Ok(());
    }

    let username = std::env::var("CEO_USERNAME").unwrap_or_else(|_| "ceo".to_string());
    let password = std::env::var("CEO_PASSWORD").unwrap_or_else(|_| username.clone());

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash CEO password: {}", e))?
        .to_string();

    crate::db::create_employee(pool, &SYSTEM_SEED, "CEO", &username, &hash, Position::Ceo)
        .await?;
    tracing::info!("CEO account '{}' was created", username);
    Ok(())
}

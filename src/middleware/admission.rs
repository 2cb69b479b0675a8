//! Per-request admission control keyed by client IP: attack-signature
//! detection, post-flood throttling, progressive blocking and automatic
//! unblocking, all backed by the audit trail.
//!
//! The whole pre- and post-phase for one IP runs inside a transaction so two
//! concurrent bursts from the same address cannot double-count or
//! double-block each other.

use crate::db;
use crate::domain::actor::SYSTEM_MIDDLEWARE;
use crate::domain::models::{AuditAction, BlockType};
use crate::params::{self, Parameter};
use crate::state::SharedState;
use crate::web::session;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::PgConnection;
use std::net::SocketAddr;

const MAX_INSPECTED_BODY_BYTES: usize = 1024 * 1024;

/// Crude injection signature: anything shaped like a paired HTML tag.
static HTML_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<.*?>.*</.*?>").expect("html tag pattern"));

/// What to do with a POST burst of `count` recent posts (the current one
/// included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostFlood {
    Normal,
    /// 2nd-3rd post inside the interval: warn and force logout.
    Warn,
    /// 4th-5th: audit as suspicious and escalate to a block.
    Suspicious,
    /// Past 5: indefinite block, no questions asked.
    Flood,
}

pub fn classify_post_count(count: i64) -> PostFlood {
    match count {
        c if c > 5 => PostFlood::Flood,
        4..=5 => PostFlood::Suspicious,
        2..=3 => PostFlood::Warn,
        _ => PostFlood::Normal,
    }
}

/// A block turns indefinite once the client would reach the maximum number of
/// temporary blocks, or when the caller forces it outright.
pub fn escalated_block_type(forced: bool, blocked_times: i32, max_temporary: i64) -> BlockType {
    if forced || i64::from(blocked_times) >= max_temporary - 1 {
        BlockType::Indefinitely
    } else {
        BlockType::Temporary
    }
}

/// Failed logins and suspicious posts both consume the login budget; each
/// prior block extends it by another full allowance.
pub fn available_attempts(allowed: i64, blocked_times: i32, failed: i64, suspicious: i64) -> i64 {
    allowed * (1 + i64::from(blocked_times)) - failed - 5 * suspicious
}

pub fn temporary_block_elapsed(
    blocked_at: DateTime<Utc>,
    period_days: i64,
    now: DateTime<Utc>,
) -> bool {
    blocked_at + Duration::days(period_days) <= now
}

/// Scans every string value in a JSON body (or the raw body text otherwise)
/// for the tag signature.
pub fn post_contains_html(body: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(body) else {
        return false;
    };
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => json_value_contains_html(&value),
        Err(_) => HTML_TAG_RE.is_match(text),
    }
}

fn json_value_contains_html(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => HTML_TAG_RE.is_match(s),
        serde_json::Value::Array(items) => items.iter().any(json_value_contains_html),
        serde_json::Value::Object(map) => map.values().any(json_value_contains_html),
        _ => false,
    }
}

enum PreVerdict {
    Continue,
    Respond(Response),
}

pub async fn admission_middleware(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = addr.ip().to_string();
    let user_agent = request
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let username = session::extract_token(request.headers())
        .and_then(|token| session::verify_session(&token, &state.session_key).ok())
        .map(|claims| claims.username)
        .unwrap_or_else(|| "anonymous".to_string());
    let path = request.uri().path().to_string();

    match admit(&state, request, next, &ip, &user_agent, &username, &path).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("admission check failed for {}: {:#}", ip, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn admit(
    state: &SharedState,
    request: Request<Body>,
    next: Next,
    ip: &str,
    user_agent: &str,
    username: &str,
    path: &str,
) -> anyhow::Result<Response> {
    let pool = &state.pool;
    let cursor = params::get_int(pool, Parameter::AuditCursor).await?;

    let (request, verdict) = {
        let mut tx = pool.begin().await?;
        let (request, verdict) =
            pre_phase(&mut tx, pool, request, ip, user_agent, username, path, cursor).await?;
        tx.commit().await?;
        (request, verdict)
    };
    if let PreVerdict::Respond(response) = verdict {
        return Ok(response);
    }

    let response = next.run(request).await;

    let mut tx = pool.begin().await?;
    let post = post_phase(&mut tx, pool, ip, user_agent, path, cursor).await?;
    tx.commit().await?;
    Ok(post.unwrap_or(response))
}

/// Everything evaluated before the downstream handler: first-visit logging
/// and POST admission.
#[allow(clippy::too_many_arguments)]
async fn pre_phase(
    conn: &mut PgConnection,
    pool: &sqlx::PgPool,
    request: Request<Body>,
    ip: &str,
    user_agent: &str,
    username: &str,
    path: &str,
    cursor: i64,
) -> anyhow::Result<(Request<Body>, PreVerdict)> {
    if !db::ip_seen_since_cursor(&mut *conn, ip, cursor).await?
        && !db::ip_seen_ever(&mut *conn, ip).await?
    {
        db::record_audit(
            &mut *conn,
            &SYSTEM_MIDDLEWARE,
            ip,
            user_agent,
            AuditAction::FirstVisit,
            username,
        )
        .await?;
    }

    if request.method() != Method::POST {
        return Ok((request, PreVerdict::Continue));
    }

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_INSPECTED_BODY_BYTES).await?;

    if post_contains_html(&bytes) {
        db::record_audit(
            &mut *conn,
            &SYSTEM_MIDDLEWARE,
            ip,
            user_agent,
            AuditAction::AttackAttempt,
            username,
        )
        .await?;
        tracing::warn!(
            "attack attempt detected, ip: {} username: {} user agent: {}",
            ip,
            username,
            user_agent
        );
        block_client(&mut *conn, pool, ip, user_agent, true).await?;
        let request = Request::from_parts(parts, Body::from(bytes));
        return Ok((request, PreVerdict::Respond(Redirect::to("/auth/logout").into_response())));
    }

    db::record_audit(
        &mut *conn,
        &SYSTEM_MIDDLEWARE,
        ip,
        user_agent,
        AuditAction::NormalPost,
        username,
    )
    .await?;

    let interval_ms = params::get_int(pool, Parameter::BetweenPostIntervalMs).await?;
    let since = Utc::now() - Duration::milliseconds(interval_ms);
    let recent_posts =
        db::count_audit_entries(&mut *conn, ip, AuditAction::NormalPost, cursor, Some(since))
            .await?;

    let request = Request::from_parts(parts, Body::from(bytes));
    match classify_post_count(recent_posts) {
        PostFlood::Warn => {
            tracing::warn!(
                "suspicious post volume cut, username: {} ip: {}",
                username,
                ip
            );
            Ok((request, PreVerdict::Respond(Redirect::to("/auth/logout").into_response())))
        }
        PostFlood::Suspicious => {
            db::record_audit(
                &mut *conn,
                &SYSTEM_MIDDLEWARE,
                ip,
                user_agent,
                AuditAction::SuspiciousPost,
                username,
            )
            .await?;
            tracing::warn!(
                "suspicious post volume cut, username: {} ip: {}",
                username,
                ip
            );
            block_client(&mut *conn, pool, ip, user_agent, false).await?;
            Ok((request, PreVerdict::Respond(Redirect::to(path).into_response())))
        }
        PostFlood::Flood => {
            tracing::warn!("post flood cut, username: {} ip: {}", username, ip);
            block_client(&mut *conn, pool, ip, user_agent, true).await?;
            Ok((request, PreVerdict::Respond(Redirect::to(path).into_response())))
        }
        PostFlood::Normal => {
            db::prune_normal_posts(&mut *conn, ip, cursor).await?;
            Ok((request, PreVerdict::Continue))
        }
    }
}

/// Everything evaluated once the downstream handler has run: the login-budget
/// check, automatic unblocking, and the terminal block response. `None` lets
/// the handler's own response through.
async fn post_phase(
    conn: &mut PgConnection,
    pool: &sqlx::PgPool,
    ip: &str,
    user_agent: &str,
    path: &str,
    cursor: i64,
) -> anyhow::Result<Option<Response>> {
    let client = db::find_blocked_client(&mut *conn, ip).await?;
    let is_blocked = client
        .as_ref()
        .map(|c| c.block_type != BlockType::Unblocked)
        .unwrap_or(false);

    if !is_blocked {
        let allowed = params::get_int(pool, Parameter::AllowedLoginAttempts).await?;
        let failed =
            db::count_audit_entries(&mut *conn, ip, AuditAction::LoggedFailed, cursor, None)
                .await?;
        let suspicious =
            db::count_audit_entries(&mut *conn, ip, AuditAction::SuspiciousPost, cursor, None)
                .await?;
        let blocked_times = client.as_ref().map(|c| c.blocked_times).unwrap_or(0);

        if available_attempts(allowed, blocked_times, failed, suspicious) <= 0 {
            block_client(&mut *conn, pool, ip, user_agent, false).await?;
            return Ok(Some(Redirect::to(path).into_response()));
        }
        return Ok(None);
    }

    let Some(client) = client else {
        return Ok(None);
    };
    let period_days = params::get_int(pool, Parameter::TemporaryBlockPeriodDays).await?;
    if client.block_type == BlockType::Temporary
        && temporary_block_elapsed(client.updated_at, period_days, Utc::now())
    {
        db::update_blocked_client(
            &mut *conn,
            &SYSTEM_MIDDLEWARE,
            ip,
            BlockType::Unblocked,
            client.blocked_times,
        )
        .await?;
        tracing::warn!("client at ip [{}] was unblocked", ip);
        return Ok(Some(Redirect::to(path).into_response()));
    }

    tracing::warn!("blocked client at ip [{}] attempted to reach the site", ip);
    Ok(Some(
        (
            StatusCode::FORBIDDEN,
            format!("You are {:?} blocked from this site", client.block_type),
        )
            .into_response(),
    ))
}

/// Creates or escalates the block row for an IP, bumping `blocked_times` on
/// every re-block.
async fn block_client(
    conn: &mut PgConnection,
    pool: &sqlx::PgPool,
    ip: &str,
    user_agent: &str,
    forced_indefinite: bool,
) -> anyhow::Result<()> {
    let max_temporary = params::get_int(pool, Parameter::MaxTemporaryBlocks).await?;
    let block_type = match db::find_blocked_client(&mut *conn, ip).await? {
        Some(client) => {
            let block_type =
                escalated_block_type(forced_indefinite, client.blocked_times, max_temporary);
            db::update_blocked_client(
                &mut *conn,
                &SYSTEM_MIDDLEWARE,
                ip,
                block_type,
                client.blocked_times + 1,
            )
            .await?;
            block_type
        }
        None => {
            let block_type = if forced_indefinite {
                BlockType::Indefinitely
            } else {
                BlockType::Temporary
            };
            db::create_blocked_client(&mut *conn, &SYSTEM_MIDDLEWARE, ip, user_agent, block_type)
                .await?;
            block_type
        }
    };
    tracing::warn!("client at ip [{}] was {:?} blocked", ip, block_type);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_post_count() {
        assert_eq!(classify_post_count(0), PostFlood::Normal);
        assert_eq!(classify_post_count(1), PostFlood::Normal);
        assert_eq!(classify_post_count(2), PostFlood::Warn);
        assert_eq!(classify_post_count(3), PostFlood::Warn);
        assert_eq!(classify_post_count(4), PostFlood::Suspicious);
        assert_eq!(classify_post_count(5), PostFlood::Suspicious);
        assert_eq!(classify_post_count(6), PostFlood::Flood);
        assert_eq!(classify_post_count(42), PostFlood::Flood);
    }

    #[test]
    fn test_escalated_block_type() {
        assert_eq!(escalated_block_type(false, 0, 5), BlockType::Temporary);
        assert_eq!(escalated_block_type(false, 3, 5), BlockType::Temporary);
        // At the threshold any further block turns indefinite.
        assert_eq!(escalated_block_type(false, 4, 5), BlockType::Indefinitely);
        assert_eq!(escalated_block_type(false, 9, 5), BlockType::Indefinitely);
        // Forcing always wins, regardless of history.
        assert_eq!(escalated_block_type(true, 0, 5), BlockType::Indefinitely);
    }

    #[test]
    fn test_available_attempts() {
        assert_eq!(available_attempts(5, 0, 0, 0), 5);
        assert_eq!(available_attempts(5, 0, 5, 0), 0);
        assert_eq!(available_attempts(5, 0, 0, 1), 0);
        // Each prior block grants another full allowance.
        assert_eq!(available_attempts(5, 2, 10, 0), 5);
        assert_eq!(available_attempts(5, 0, 3, 1), -3);
    }

    #[test]
    fn test_temporary_block_elapsed() {
        let now = Utc::now();
        assert!(temporary_block_elapsed(now - Duration::days(2), 1, now));
        assert!(!temporary_block_elapsed(now - Duration::hours(12), 1, now));
    }

    #[test]
    fn test_post_contains_html() {
        assert!(post_contains_html(br#"{"note":"<script>alert(1)</script>"}"#));
        assert!(post_contains_html(
            br#"{"nested":{"deep":["ok","<b>bold</b>"]}}"#
        ));
        assert!(!post_contains_html(br#"{"note":"3 < 5 and 5 > 3"}"#));
        assert!(!post_contains_html(br#"{"rate":4.5}"#));
        // Non-JSON bodies are scanned as raw text.
        assert!(post_contains_html(b"name=<i>x</i>"));
        assert!(!post_contains_html(b"name=plain"));
    }
}

use crate::db;
use crate::domain::models::Position;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct SessionClaims {
    pub username: String,
    pub position: Position,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid token format")]
    Invalid,
    #[error("signature mismatch")]
    Signature,
    #[error("expired")]
    Expired,
    #[error("bad position")]
    Position,
}

pub fn sign_session(
    username: &str,
    position: Position,
    key: &[u8],
) -> Result<String, SessionError> {
    let exp = Utc::now() + Duration::hours(24);
    let payload = format!("{}|{}|{}", username, position_string(position), exp.timestamp());
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(payload.as_bytes());
    let sig = mac.finalize().into_bytes();
    Ok(format!(
        "{}.{}",
        general_purpose::STANDARD.encode(payload.as_bytes()),
        general_purpose::STANDARD.encode(sig)
    ))
}

pub fn verify_session(token: &str, key: &[u8]) -> Result<SessionClaims, SessionError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 2 {
        return Err(SessionError::Invalid);
    }
    let payload_bytes = general_purpose::STANDARD
        .decode(parts[0])
        .map_err(|_| SessionError::Invalid)?;
    let sig_bytes = general_purpose::STANDARD
        .decode(parts[1])
        .map_err(|_| SessionError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(&payload_bytes);
    mac.verify_slice(&sig_bytes)
        .map_err(|_| SessionError::Signature)?;

    let payload = String::from_utf8(payload_bytes).map_err(|_| SessionError::Invalid)?;
    let pieces: Vec<&str> = payload.split('|').collect();
    if pieces.len() != 3 {
        return Err(SessionError::Invalid);
    }
    let position = parse_position(pieces[1])?;
    let exp: i64 = pieces[2].parse().map_err(|_| SessionError::Invalid)?;
    if Utc::now().timestamp() > exp {
        return Err(SessionError::Expired);
    }
    Ok(SessionClaims {
        username: pieces[0].to_string(),
        position,
        exp,
    })
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(val) = auth.to_str() {
            if let Some(bearer) = val.strip_prefix("Bearer ") {
                return Some(bearer.trim().to_string());
            }
        }
    }
    if let Some(cookie) = headers.get(axum::http::header::COOKIE) {
        if let Ok(val) = cookie.to_str() {
            for pair in val.split(';') {
                if let Some(rest) = pair.trim().strip_prefix("session=") {
                    return Some(rest.to_string());
                }
            }
        }
    }
    None
}

fn position_string(position: Position) -> &'static str {
    match position {
        Position::Ceo => "CEO",
        Position::HumanResources => "HUMAN_RESOURCES",
        Position::WarehouseAdmin => "WAREHOUSE_ADMIN",
        Position::AccountingManager => "ACCOUNTING_MANAGER",
        Position::SocialMediaManager => "SOCIAL_MEDIA_MANAGER",
        Position::Designer => "DESIGNER",
    }
}

fn parse_position(raw: &str) -> Result<Position, SessionError> {
    match raw {
        "CEO" => Ok(Position::Ceo),
        "HUMAN_RESOURCES" => Ok(Position::HumanResources),
        "WAREHOUSE_ADMIN" => Ok(Position::WarehouseAdmin),
        "ACCOUNTING_MANAGER" => Ok(Position::AccountingManager),
        "SOCIAL_MEDIA_MANAGER" => Ok(Position::SocialMediaManager),
        "DESIGNER" => Ok(Position::Designer),
        _ => Err(SessionError::Position),
    }
}

/// Extractor yielding the authenticated employee behind the session cookie.
pub struct CurrentEmployee(pub db::DbEmployee);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentEmployee
where
    S: Send + Sync,
    crate::state::SharedState: FromRef<S>,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let shared = crate::state::SharedState::from_ref(state);

        let token = extract_token(&parts.headers).ok_or(StatusCode::UNAUTHORIZED)?;
        let claims = verify_session(&token, &shared.session_key).map_err(|e| {
            tracing::warn!("session verification failed: {}", e);
            StatusCode::UNAUTHORIZED
        })?;

        let employee = db::find_employee_by_username(&shared.pool, &claims.username)
            .await
            .map_err(|e| {
                tracing::warn!("employee lookup failed for session: {}", e);
                StatusCode::UNAUTHORIZED
            })?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(CurrentEmployee(employee))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_round_trip() {
        let key = b"0123456789abcdef0123456789abcdef";
        let token = sign_session("amal", Position::HumanResources, key).unwrap();
        let claims = verify_session(&token, key).unwrap();
        assert_eq!(claims.username, "amal");
        assert_eq!(claims.position, Position::HumanResources);
    }

    #[test]
    fn test_session_rejects_tampered_signature() {
        let key = b"0123456789abcdef0123456789abcdef";
        let token = sign_session("amal", Position::Designer, key).unwrap();
        assert!(verify_session(&token, b"another-key-entirely-32-bytes!!!").is_err());
        assert!(verify_session("not-a-token", key).is_err());
    }
}

//! Caller authentication for the status surface.
//!
//! Callers present a bearer token; the token maps to a configured user and
//! that user's level must reach `status.view_level`. Sessions and user
//! management live elsewhere, finder only checks the token it is given.

use axum::http::{header, HeaderMap};
use thiserror::Error;

use crate::config::{StatusConfig, StatusUser};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no bearer token")]
    MissingToken,
    #[error("unknown token")]
    UnknownToken,
    #[error("user '{user}' has level {level}, {required} required")]
    InsufficientLevel {
        user: String,
        level: u32,
        required: u32,
    },
}

/// The token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// The user allowed to view status, or why the caller is not.
pub fn authorize_status<'a>(
    status: &'a StatusConfig,
    headers: &HeaderMap,
) -> Result<&'a StatusUser, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::MissingToken)?;
    let user = status
        .users
        .iter()
        .find(|u| u.token == token)
        .ok_or(AuthError::UnknownToken)?;

    if user.level < status.view_level {
        return Err(AuthError::InsufficientLevel {
            user: user.name.clone(),
            level: user.level,
            required: status.view_level,
        });
    }
    Ok(user)
}

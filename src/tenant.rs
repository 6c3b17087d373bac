use std::fmt;

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use crate::{error::BlockUploadError, http_objects::ApiError};

/// Header carrying the tenant (organization) ID of a request.
pub const TENANT_HEADER: &str = "X-Scope-OrgID";

const MAX_TENANT_ID_LENGTH: usize = 150;
const TENANT_SEPARATOR: char = '|';

/// A validated tenant ID. Safe to use as a single object-store path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: &str) -> Result<Self, BlockUploadError> {
        let invalid = |reason: &str| BlockUploadError::InvalidTenant(reason.to_string());

        if raw.is_empty() {
            return Err(invalid("no org id"));
        }
        if raw.contains(TENANT_SEPARATOR) {
            return Err(invalid("multiple org IDs present"));
        }
        if raw.len() > MAX_TENANT_ID_LENGTH {
            return Err(invalid("tenant ID is too long"));
        }
        if raw == "." || raw == ".." {
            return Err(invalid("tenant ID is '.' or '..'"));
        }
        if let Some(c) = raw.chars().find(|c| !is_supported_char(*c)) {
            return Err(BlockUploadError::InvalidTenant(format!(
                "tenant ID contains unsupported character '{}'",
                c
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_supported_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '!' | '-' | '_' | '.' | '*' | '\'' | '(' | ')')
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let mut values = parts.headers.get_all(TENANT_HEADER).iter();
        let res = match (values.next(), values.next()) {
            (None, _) => Err(BlockUploadError::InvalidTenant("no org id".to_string())),
            (Some(_), Some(_)) => Err(BlockUploadError::InvalidTenant(
                "multiple org IDs present".to_string(),
            )),
            (Some(value), None) => value
                .to_str()
                .map_err(|_| BlockUploadError::InvalidTenant("org id is not ascii".to_string()))
                .and_then(TenantId::parse),
        };
        res.map_err(|err| {
            if let BlockUploadError::InvalidTenant(reason) = &err {
                warn!(reason = %reason, "rejecting request with invalid tenant ID");
            }
            ApiError::from(err)
        })
    }
}

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **soorma-auth** – Caller identity extraction shared across the Event
//! Bus, Registry, and Memory services (spec §6.2).
//!
//! Two profiles resolve to the same [`CallerContext`] so handlers never
//! branch on which one is active: `dev` trusts `X-Tenant-ID`/`X-User-ID`
//! headers outright; `prod` validates a bearer HS256 JWT carrying
//! `(tenant_id, sub)` claims. Tenant/user context always comes from this
//! extraction step, never from a request body.

use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use soorma_types::SoormaError;

/// The authenticated caller's identity.
#[derive(Debug, Clone)]
pub struct CallerContext {
    /// Authenticated tenant. Subscriptions and publishes outside this
    /// tenant are rejected by the caller's service.
    pub tenant_id: String,
    /// Authenticated user or agent identity, if present.
    pub user_id: Option<String>,
}

/// Claims embedded in a Soorma bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject — the authenticated user or agent id.
    pub sub: String,
    /// Tenant the token is scoped to.
    pub tenant_id: String,
    /// Expiry (seconds since epoch).
    pub exp: u64,
}

/// HS256 JWT validator shared by every service's `prod` auth profile.
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
}

impl JwtValidator {
    /// Build a validator over the given HMAC secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    /// Validate `raw` and return its claims.
    pub fn validate(&self, raw: &str) -> Result<Claims, SoormaError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<Claims>(raw, &DecodingKey::from_secret(self.secret.as_bytes()), &validation)
            .map_err(|e| SoormaError::Unauthenticated(e.to_string()))?;
        Ok(data.claims)
    }
}

/// Authentication profile selected at service startup.
#[derive(Clone)]
pub enum AuthProfile {
    /// Trust `X-Tenant-ID`/`X-User-ID` headers verbatim. Development only.
    Dev,
    /// Require a bearer JWT validated against the embedded validator.
    Prod(JwtValidator),
}

/// Extract the caller's identity from request headers under `profile`.
pub fn extract_caller(headers: &HeaderMap, profile: &AuthProfile) -> Result<CallerContext, SoormaError> {
    match profile {
        AuthProfile::Dev => {
            let tenant_id = headers
                .get("x-tenant-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| SoormaError::Unauthenticated("missing X-Tenant-ID header".into()))?;
            let user_id = headers
                .get("x-user-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(CallerContext { tenant_id, user_id })
        }
        AuthProfile::Prod(validator) => {
            let raw = headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or_else(|| SoormaError::Unauthenticated("missing bearer token".into()))?;
            let claims = validator.validate(raw)?;
            Ok(CallerContext { tenant_id: claims.tenant_id, user_id: Some(claims.sub) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_profile_requires_tenant_header() {
        let headers = HeaderMap::new();
        let err = extract_caller(&headers, &AuthProfile::Dev).unwrap_err();
        assert!(matches!(err, SoormaError::Unauthenticated(_)));
    }

    #[test]
    fn dev_profile_reads_tenant_and_user_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-tenant-id", "t1".parse().unwrap());
        headers.insert("x-user-id", "u1".parse().unwrap());
        let caller = extract_caller(&headers, &AuthProfile::Dev).unwrap();
        assert_eq!(caller.tenant_id, "t1");
        assert_eq!(caller.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn prod_profile_rejects_missing_bearer_token() {
        let headers = HeaderMap::new();
        let profile = AuthProfile::Prod(JwtValidator::new("secret"));
        let err = extract_caller(&headers, &profile).unwrap_err();
        assert!(matches!(err, SoormaError::Unauthenticated(_)));
    }
}

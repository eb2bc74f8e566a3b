//! Auth collaborator boundary. The auth service mints HS256 bearer tokens;
//! this module only decodes them into a requester identity. No token, or a
//! token that fails validation, means an anonymous requester — never an
//! error.

use axum::http::HeaderMap;
use jsonwebtoken::decode;
use models::{Role, Tenant};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const TENANT_HEADER: &str = "x-tenant-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requester {
    Anonymous,
    Known { id: i64, tenant_id: i64, role: Role },
}

impl Requester {
    pub fn role(&self) -> Option<Role> {
        match self {
            Requester::Anonymous => None,
            Requester::Known { role, .. } => Some(*role),
        }
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            Requester::Anonymous => None,
            Requester::Known { id, .. } => Some(*id),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

pub fn requester(state: &AppState, headers: &HeaderMap) -> Requester {
    let Some(token) = bearer_token(headers) else {
        return Requester::Anonymous;
    };
    match decode::<dto::AuthClaims>(&token, &state.decoding_key, &state.validation) {
        Ok(data) => Requester::Known {
            id: data.claims.sub,
            tenant_id: data.claims.tenant_id,
            role: data.claims.role,
        },
        Err(err) => {
            tracing::warn!(error = %err, "jwt decode failed");
            Requester::Anonymous
        }
    }
}

/// Resolve the tenant a request acts on: from the claims when
/// authenticated, from the `X-Tenant-Id` header otherwise (registration,
/// password reset and activation run anonymously).
pub async fn current_tenant(
    state: &AppState,
    headers: &HeaderMap,
    requester: &Requester,
) -> ApiResult<Tenant> {
    let tenant_id = match requester {
        Requester::Known { tenant_id, .. } => Some(*tenant_id),
        Requester::Anonymous => headers
            .get(TENANT_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok()),
    };
    let tenant_id = tenant_id.ok_or_else(|| ApiError::not_found("unknown tenant"))?;
    state
        .store
        .tenant_by_id(tenant_id)
        .await?
        .ok_or_else(|| ApiError::not_found("unknown tenant"))
}

//! Bearer-key tenant authentication

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use vaas_core::{mask_api_key, Tenant};

use crate::{AppState, ServerError};

/// The tenant resolved for this request, inserted as an extension by
/// [`authenticate`].
#[derive(Clone)]
pub struct AuthedTenant(pub Tenant);

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the `Authorization: Bearer <api_key>` header to an active
/// tenant, or reject the request with 401.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let token = bearer_token(&request)
        .ok_or_else(|| ServerError::Auth("missing bearer token".to_string()))?
        .to_string();

    let tenant = state
        .tenants
        .verify_api_key(&token)
        .await
        .map_err(|e| ServerError::Internal(format!("tenant lookup failed: {}", e)))?
        .ok_or_else(|| {
            tracing::warn!(api_key = %mask_api_key(&token), "rejected unknown or inactive api key");
            ServerError::Auth("invalid api key".to_string())
        })?;

    tracing::debug!(tenant_id = %tenant.tenant_id, "tenant authenticated");
    request.extensions_mut().insert(AuthedTenant(tenant));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_auth(value: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/api/v1/domains");
        if let Some(value) = value {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_token_extraction() {
        let req = request_with_auth(Some("Bearer vaas_abc12345_k_x"));
        assert_eq!(bearer_token(&req), Some("vaas_abc12345_k_x"));
    }

    #[test]
    fn test_missing_or_malformed_header() {
        assert_eq!(bearer_token(&request_with_auth(None)), None);
        assert_eq!(bearer_token(&request_with_auth(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&request_with_auth(Some("Bearer "))), None);
    }
}

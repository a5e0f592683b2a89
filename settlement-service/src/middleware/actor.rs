//! Caller identity extracted from gateway-asserted headers.
//!
//! The API gateway authenticates the user and forwards who they are as
//! headers. This service trusts those headers and does not re-authenticate.

use crate::models::{Actor, Role};
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const COMPANY_ID_HEADER: &str = "X-Company-ID";
pub const ROLE_HEADER: &str = "X-User-Role";
pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn required_uuid(parts: &Parts, name: &str) -> Result<Uuid, AppError> {
    let raw = header(parts, name)
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing {} header", name)))?;
    Uuid::parse_str(raw)
        .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid {} header", name)))
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = required_uuid(parts, USER_ID_HEADER)?;
        let company_id = required_uuid(parts, COMPANY_ID_HEADER)?;

        let raw_role = header(parts, ROLE_HEADER).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing {} header", ROLE_HEADER))
        })?;
        let role = Role::parse(&raw_role.to_ascii_lowercase()).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Unknown role '{}'", raw_role))
        })?;

        let actor = match role {
            Role::Tenant => {
                let tenant_id = required_uuid(parts, TENANT_ID_HEADER)?;
                Actor::tenant(user_id, company_id, tenant_id)
            }
            _ => Actor::staff(user_id, company_id, role),
        };

        let span = tracing::Span::current();
        span.record("user_id", tracing::field::display(actor.user_id));
        span.record("company_id", tracing::field::display(actor.company_id));
        span.record("role", actor.role.as_str());

        Ok(actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(headers: &[(&str, String)]) -> Result<Actor, AppError> {
        let mut builder = Request::builder().uri("/payments");
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_staff_actor() {
        let user = Uuid::new_v4();
        let company = Uuid::new_v4();
        let actor = extract(&[
            (USER_ID_HEADER, user.to_string()),
            (COMPANY_ID_HEADER, company.to_string()),
            (ROLE_HEADER, "landlord".to_string()),
        ])
        .await
        .unwrap();
        assert_eq!(actor, Actor::staff(user, company, Role::Landlord));
    }

    #[tokio::test]
    async fn test_tenant_requires_tenant_header() {
        let base = vec![
            (USER_ID_HEADER, Uuid::new_v4().to_string()),
            (COMPANY_ID_HEADER, Uuid::new_v4().to_string()),
            (ROLE_HEADER, "tenant".to_string()),
        ];
        assert!(matches!(extract(&base).await, Err(AppError::Unauthorized(_))));

        let tenant_id = Uuid::new_v4();
        let mut with_tenant = base.clone();
        with_tenant.push((TENANT_ID_HEADER, tenant_id.to_string()));
        let actor = extract(&with_tenant).await.unwrap();
        assert_eq!(actor.tenant_id, Some(tenant_id));
    }

    #[tokio::test]
    async fn test_missing_or_malformed_headers() {
        assert!(matches!(extract(&[]).await, Err(AppError::Unauthorized(_))));

        let bad_uuid = extract(&[
            (USER_ID_HEADER, "not-a-uuid".to_string()),
            (COMPANY_ID_HEADER, Uuid::new_v4().to_string()),
            (ROLE_HEADER, "agent".to_string()),
        ])
        .await;
        assert!(matches!(bad_uuid, Err(AppError::Unauthorized(_))));

        let bad_role = extract(&[
            (USER_ID_HEADER, Uuid::new_v4().to_string()),
            (COMPANY_ID_HEADER, Uuid::new_v4().to_string()),
            (ROLE_HEADER, "janitor".to_string()),
        ])
        .await;
        assert!(matches!(bad_role, Err(AppError::Unauthorized(_))));
    }
}

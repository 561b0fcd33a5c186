//! Bearer token authentication middleware

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;
use wastewise_dispatch::{Actor, ViewerScope};
use wastewise_shared::types::Role;

use super::jwt::{Claims, JwtManager};
use crate::error::{ApiError, ApiResult};

/// State needed by the auth middleware
#[derive(Clone)]
pub struct AuthState {
    pub jwt: JwtManager,
}

/// Authenticated caller, inserted as a request extension by [`require_auth`]
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub org_id: Option<Uuid>,
    pub roles: Vec<Role>,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            org_id: claims.org_id,
            roles: claims.roles,
        }
    }
}

impl AuthUser {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Which pickups this caller may see
    pub fn scope(&self) -> ApiResult<ViewerScope> {
        ViewerScope::from_roles(&self.roles, self.user_id, self.org_id).ok_or_else(|| {
            ApiError::Forbidden("No role grants access to pickups".to_string())
        })
    }

    pub fn actor(&self) -> ApiResult<Actor> {
        Ok(Actor::new(self.user_id, self.scope()?))
    }

    /// Organization the caller acts for
    pub fn require_org(&self) -> ApiResult<Uuid> {
        self.org_id
            .ok_or_else(|| ApiError::Forbidden("Token carries no organization".to_string()))
    }
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Reject requests without a valid bearer token
pub async fn require_auth(
    State(auth): State<AuthState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&req) else {
        return ApiError::Unauthorized.into_response();
    };

    let claims = match auth.jwt.validate_token(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected bearer token");
            return ApiError::InvalidToken.into_response();
        }
    };

    req.extensions_mut().insert(AuthUser::from(claims));
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(roles: &[Role], org_id: Option<Uuid>) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            org_id,
            roles: roles.to_vec(),
        }
    }

    #[test]
    fn test_scope_follows_roles() {
        let org_id = Uuid::new_v4();

        let org_user = user(&[Role::Organization], Some(org_id));
        assert_eq!(org_user.scope().unwrap(), ViewerScope::Organization(org_id));

        let driver = user(&[Role::Driver], None);
        assert_eq!(driver.scope().unwrap(), ViewerScope::Driver(driver.user_id));

        let admin = user(&[Role::Admin, Role::Driver], None);
        assert_eq!(admin.scope().unwrap(), ViewerScope::Admin);
    }

    #[test]
    fn test_org_role_without_org_has_no_scope() {
        let orphan = user(&[Role::Organization], None);
        assert!(matches!(orphan.scope(), Err(ApiError::Forbidden(_))));
        assert!(orphan.require_org().is_err());
    }

    #[test]
    fn test_bearer_parsing() {
        let req = Request::builder()
            .header(header::AUTHORIZATION, "Bearer abc.def.ghi")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), Some("abc.def.ghi"));

        let req = Request::builder()
            .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), None);

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(bearer_token(&req), None);
    }
}

//! Central role gate for protected routes.
//!
//! Rules are checked in order; the first rule whose prefix matches the request
//! path and whose method filter admits the request method decides. A request
//! that matches no rule is refused.

use axum::{
    extract::{OriginalUri, Request},
    http::Method,
    middleware::Next,
    response::Response,
};

use crate::{db::models::Role, error::AppError, middleware::auth::AuthUser};

const ALL: &[Role] = &[Role::Admin, Role::Supervisor, Role::Student];
const STAFF: &[Role] = &[Role::Admin, Role::Supervisor];
const ADMIN: &[Role] = &[Role::Admin];

pub struct AccessRule {
    pub prefix: &'static str,
    /// `None` admits every method.
    pub method: Option<Method>,
    pub roles: &'static [Role],
}

const fn rule(prefix: &'static str, method: Option<Method>, roles: &'static [Role]) -> AccessRule {
    AccessRule {
        prefix,
        method,
        roles,
    }
}

pub static RULES: &[AccessRule] = &[
    rule("/api/auth", None, ALL),
    rule("/api/users", None, STAFF),
    rule("/api/supervisors", None, STAFF),
    rule("/api/courses", Some(Method::GET), ALL),
    rule("/api/courses", None, ADMIN),
    rule("/api/subjects", None, ADMIN),
    rule("/api/points", Some(Method::POST), STAFF),
    rule("/api/points", None, ALL),
    rule("/api/chat", None, ALL),
    rule("/api/tasks", None, ALL),
    rule("/api/clocking", None, ALL),
];

fn prefix_matches(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

pub fn is_allowed(rules: &[AccessRule], path: &str, method: &Method, role: Role) -> bool {
    rules
        .iter()
        .find(|r| {
            prefix_matches(path, r.prefix) && r.method.as_ref().map_or(true, |m| m == method)
        })
        .is_some_and(|r| r.roles.contains(&role))
}

pub async fn access_middleware(request: Request, next: Next) -> Result<Response, AppError> {
    let role = request
        .extensions()
        .get::<AuthUser>()
        .map(|u| u.role)
        .ok_or(AppError::Unauthorized)?;

    // Nested routers see a stripped path; the rules are written against the full one.
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    if !is_allowed(RULES, &path, request.method(), role) {
        tracing::debug!(%path, %role, "access denied by role gate");
        return Err(AppError::Forbidden(
            "Your role cannot access this resource".to_string(),
        ));
    }

    Ok(next.run(request).await)
}

use std::collections::HashMap;

use axum::{
    extract::{FromRef, FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::{AppError, ApiError};

use super::{User, UserDirectory};

/// The caller, resolved from `Authorization: Bearer <token>` or, for
/// WebSocket clients that cannot set headers, a `token` query parameter.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl std::ops::Deref for CurrentUser {
    type Target = User;

    fn deref(&self) -> &User {
        &self.0
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    UserDirectory: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(token) = credential(parts) else {
            return Err(AppError::Unauthenticated("token is not provided".to_owned()).into());
        };

        let users = UserDirectory::from_ref(state);
        let user = users.resolve_credential(&token).await?;
        Ok(CurrentUser(user))
    }
}

fn credential(parts: &Parts) -> Option<String> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(header) = header {
        let token = match header.split_once(' ') {
            Some((_scheme, token)) => token.trim(),
            None => header,
        };
        return Some(token.to_owned());
    }

    let Query(mut params) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri).ok()?;
    params.remove("token").filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(req: Request<()>) -> Parts {
        req.into_parts().0
    }

    #[test]
    fn bearer_header_wins() {
        let p = parts(
            Request::get("/chat-room/rooms?token=query")
                .header(AUTHORIZATION, "Bearer header")
                .body(())
                .unwrap(),
        );
        assert_eq!(credential(&p).as_deref(), Some("header"));
    }

    #[test]
    fn bare_header_token_is_accepted() {
        let p = parts(Request::get("/").header(AUTHORIZATION, "abc123").body(()).unwrap());
        assert_eq!(credential(&p).as_deref(), Some("abc123"));
    }

    #[test]
    fn query_token_for_websockets() {
        let p = parts(Request::get("/user/subscribe?x=1&token=abc").body(()).unwrap());
        assert_eq!(credential(&p).as_deref(), Some("abc"));

        let p = parts(Request::get("/user/subscribe?token=").body(()).unwrap());
        assert_eq!(credential(&p), None);

        let p = parts(Request::get("/user/subscribe").body(()).unwrap());
        assert_eq!(credential(&p), None);
    }

    #[test]
    fn query_token_is_percent_decoded() {
        let p = parts(Request::get("/chat-room/subscribe?token=a%2Bb%3Dc&x=1").body(()).unwrap());
        assert_eq!(credential(&p).as_deref(), Some("a+b=c"));
    }
}

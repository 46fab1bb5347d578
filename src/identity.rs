//! Identity Context.
//!
//! Authentication happens upstream. Either an auth middleware inserts an [`Identity`]
//! into the request extensions, or a trusted gateway forwards the user id in the header
//! named by `identity.trusted_header`. Anything else is an anonymous caller.

use crate::error::PollError;
use actix_web::dev::Payload;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, Ready};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    /// User id. None for anonymous callers.
    pub id: Option<i32>,
    pub is_authenticated: bool,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            id: None,
            is_authenticated: false,
        }
    }

    pub fn user(id: i32) -> Self {
        Self {
            id: Some(id),
            is_authenticated: true,
        }
    }

    /// Authenticated user id, if any.
    pub fn user_id(&self) -> Option<i32> {
        if self.is_authenticated {
            self.id
        } else {
            None
        }
    }

    /// Returns the user id or an authentication-required failure.
    pub fn require_login(&self, poll_id: Option<i32>) -> Result<i32, PollError> {
        self.user_id().ok_or(PollError::AuthRequired { poll_id })
    }

    fn from_request_parts(req: &HttpRequest) -> Self {
        if let Some(identity) = req.extensions().get::<Identity>() {
            return *identity;
        }

        let header = crate::app_config::identity().trusted_header;
        if header.is_empty() {
            return Self::anonymous();
        }

        req.headers()
            .get(header.as_str())
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i32>().ok())
            .map(Self::user)
            .unwrap_or_else(Self::anonymous)
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl FromRequest for Identity {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(Self::from_request_parts(req)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_anonymous_has_no_user_id() {
        let identity = Identity::anonymous();
        assert_eq!(identity.user_id(), None);
        assert!(matches!(
            identity.require_login(Some(4)),
            Err(PollError::AuthRequired { poll_id: Some(4) })
        ));
    }

    #[test]
    fn test_unauthenticated_id_is_ignored() {
        let identity = Identity {
            id: Some(9),
            is_authenticated: false,
        };
        assert_eq!(identity.user_id(), None);
    }

    #[test]
    fn test_extension_identity_wins() {
        let req = TestRequest::default().to_http_request();
        req.extensions_mut().insert(Identity::user(12));
        assert_eq!(Identity::from_request_parts(&req), Identity::user(12));
    }

    #[test]
    fn test_missing_identity_is_anonymous() {
        let req = TestRequest::default().to_http_request();
        assert_eq!(Identity::from_request_parts(&req), Identity::anonymous());
    }
}

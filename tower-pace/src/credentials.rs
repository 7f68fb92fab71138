use std::task::Context;
use std::task::Poll;

use http::HeaderValue;
use http::Request;
use http::header::ACCEPT;
use http::header::AUTHORIZATION;
use http::header::USER_AGENT;
use tower::Layer;
use tower::Service;

use crate::PaceError;

/// User agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("tower-pace/", env!("CARGO_PKG_VERSION"));

/// Headers identifying the caller to the Platform.
#[derive(Clone, Debug)]
pub struct Credentials {
    authorization: HeaderValue,
    user_agent: HeaderValue,
}

impl Credentials {
    /// Bearer credentials for `token`.
    pub fn bearer(token: &str) -> Result<Self, PaceError> {
        let mut authorization =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                PaceError::InvalidHeader {
                    name: "authorization",
                }
            })?;
        authorization.set_sensitive(true);

        Ok(Self {
            authorization,
            user_agent: HeaderValue::from_static(DEFAULT_USER_AGENT),
        })
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Result<Self, PaceError> {
        self.user_agent = HeaderValue::from_str(user_agent).map_err(|_| {
            PaceError::InvalidHeader {
                name: "user-agent",
            }
        })?;
        Ok(self)
    }
}

/// Attaches [`Credentials`] to every request.
#[derive(Clone, Debug)]
pub struct CredentialsLayer {
    credentials: Credentials,
}

impl CredentialsLayer {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl<S> Layer<S> for CredentialsLayer {
    type Service = CredentialsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CredentialsService {
            inner,
            credentials: self.credentials.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CredentialsService<S> {
    inner: S,
    credentials: Credentials,
}

impl<S, B> Service<Request<B>> for CredentialsService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let headers = req.headers_mut();
        headers.insert(AUTHORIZATION, self.credentials.authorization.clone());
        headers.insert(USER_AGENT, self.credentials.user_agent.clone());
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        self.inner.call(req)
    }
}

#[cfg(test)]
mod tests {
    use http::Response;
    use tower::ServiceExt;
    use tower_test::mock;

    use super::*;

    #[tokio::test]
    async fn it_sets_auth_agent_and_accept() {
        let credentials = Credentials::bearer("s3cr3t")
            .unwrap()
            .with_user_agent("platform-cli/1.0")
            .unwrap();
        let (mock, mut handle) = mock::pair::<Request<()>, Response<()>>();
        let service = CredentialsLayer::new(credentials).layer(mock);

        let request = Request::builder()
            .header(ACCEPT, "text/html")
            .body(())
            .unwrap();
        let response = tokio::spawn(service.oneshot(request));

        let (request, send_response) = handle.next_request().await.unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer s3cr3t");
        assert!(request.headers()[AUTHORIZATION].is_sensitive());
        assert_eq!(request.headers()[USER_AGENT], "platform-cli/1.0");
        assert_eq!(request.headers()[ACCEPT], "application/json");
        assert_eq!(request.headers().get_all(ACCEPT).iter().count(), 1);

        send_response.send_response(Response::new(()));
        response.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn it_defaults_the_user_agent() {
        let (mock, mut handle) = mock::pair::<Request<()>, Response<()>>();
        let service = CredentialsLayer::new(Credentials::bearer("t").unwrap()).layer(mock);

        let response = tokio::spawn(service.oneshot(Request::new(())));
        let (request, send_response) = handle.next_request().await.unwrap();
        assert_eq!(request.headers()[USER_AGENT], DEFAULT_USER_AGENT);

        send_response.send_response(Response::new(()));
        response.await.unwrap().unwrap();
    }

    #[test]
    fn it_rejects_tokens_that_are_not_header_safe() {
        assert_eq!(
            Credentials::bearer("bad\ntoken").unwrap_err(),
            PaceError::InvalidHeader {
                name: "authorization"
            }
        );
        assert!(
            Credentials::bearer("ok")
                .unwrap()
                .with_user_agent("bad\r\n")
                .is_err()
        );
    }
}

//! The authenticated request surface for the Pourline dashboard backend
//!
//! Everything the dashboard does against the scheduling backend goes
//! through [`ApiClient`]: it resolves a live access token through the
//! session manager (refreshing behind the scenes when the token has
//! expired), attaches the bearer header, issues exactly one HTTP call per
//! logical request, and hands back either the response or a classified
//! failure.
//!
//! If the session cannot produce a token (signed out, degraded, or torn
//! down), the request short-circuits with [`ApiError::Unauthorized`]
//! before any network I/O. A non-success answer from a business endpoint
//! is surfaced verbatim as [`ApiError::Endpoint`]; it never triggers a
//! refresh or a logout by itself, because a 404 or a validation 422 says
//! nothing about the session.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pourline_client::ApiClient;
//! use pourline_session::authority::HttpTokenAuthority;
//! use pourline_session::store::InMemorySessionStore;
//! use pourline_session::SessionManager;
//!
//! # async fn example() -> Result<(), pourline_client::ApiError> {
//! let backend = reqwest::Url::parse("https://api.pourline.example/").unwrap();
//! let manager = SessionManager::new(
//!     Arc::new(InMemorySessionStore::new()),
//!     Arc::new(HttpTokenAuthority::new(reqwest::Client::new(), backend.clone())),
//! );
//!
//! let client = ApiClient::new(backend, manager);
//! let schedules = client.get("schedules/today").await?;
//! # drop(schedules);
//! # Ok(())
//! # }
//! ```
//!
//! If a request already carries an `Authorization` header by the time the
//! middleware runs, the existing value is left in place, allowing
//! overrides to be specified as required.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use aliri_clock::{Clock, System};
use bytes::{BufMut, BytesMut};
use reqwest::{header, Method, StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use pourline_session::{AccessTokenRef, SessionManager, TokenError};

const APPLICATION_JSON: &str = "application/json";

/// A middleware that resolves the session's access token and injects it
/// into outgoing requests
///
/// Resolution happens before the request leaves: a live token is used
/// as-is, an expired one is refreshed (with all concurrent requests
/// sharing the one refresh), and a session that cannot produce a token
/// fails the request without any network I/O.
pub struct SessionBearerMiddleware<C = System> {
    session: SessionManager<C>,
}

impl<C> SessionBearerMiddleware<C> {
    /// Constructs the middleware from a session manager
    pub fn new(session: SessionManager<C>) -> Self {
        Self { session }
    }
}

impl<C: fmt::Debug> fmt::Debug for SessionBearerMiddleware<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionBearerMiddleware")
            .field("session", &self.session)
            .finish()
    }
}

#[async_trait::async_trait]
impl<C> Middleware for SessionBearerMiddleware<C>
where
    C: Clock + Clone + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: reqwest::Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        if req.headers().get(header::AUTHORIZATION).is_none() {
            let token = self.session.fresh_access_token().await.map_err(|error| {
                tracing::debug!(
                    error = (&error as &dyn std::error::Error),
                    "request short-circuited, no usable access token"
                );
                reqwest_middleware::Error::Middleware(anyhow::Error::new(error))
            })?;
            req.headers_mut()
                .insert(header::AUTHORIZATION, bearer_header(&token));
        }

        next.run(req, extensions).await
    }
}

fn bearer_header(token: &AccessTokenRef) -> header::HeaderValue {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value =
        header::HeaderValue::from_maybe_shared(header_value).expect("only valid header bytes");
    value.set_sensitive(true);
    value
}

/// An error from an authenticated request
#[derive(Debug, Error)]
pub enum ApiError {
    /// The session could not produce a usable token; the request was never
    /// sent
    #[error("no valid session token, the request was not sent")]
    Unauthorized(#[source] TokenError),
    /// The business endpoint answered with a non-success status
    ///
    /// This is the caller's to handle; it has no effect on the session.
    #[error("backend returned {status}")]
    Endpoint {
        /// The response status
        status: StatusCode,
        /// The response body, verbatim
        body: String,
    },
    /// The request could not be sent
    #[error("error sending request to the backend")]
    Transport(#[source] reqwest::Error),
    /// The response body could not be read
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
    /// A middleware other than token resolution failed
    #[error("request middleware failed")]
    Middleware(#[source] anyhow::Error),
    /// The path could not be joined onto the backend base URL
    #[error("not a valid request path: {0:?}")]
    InvalidPath(String),
}

impl ApiError {
    /// Whether this failure means the session has no usable token
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

fn classify_send_error(error: reqwest_middleware::Error) -> ApiError {
    match error {
        reqwest_middleware::Error::Reqwest(error) => ApiError::Transport(error),
        reqwest_middleware::Error::Middleware(error) => match error.downcast::<TokenError>() {
            Ok(token_error) => ApiError::Unauthorized(token_error),
            Err(error) => ApiError::Middleware(error),
        },
    }
}

/// The single capability the rest of the dashboard consumes: perform an
/// authenticated call against the scheduling backend
pub struct ApiClient {
    http: ClientWithMiddleware,
    base_url: Url,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ApiClient {
    /// Constructs a client over a default HTTP client
    pub fn new<C>(base_url: Url, session: SessionManager<C>) -> Self
    where
        C: Clock + Clone + Send + Sync + 'static,
    {
        Self::with_http_client(reqwest::Client::default(), base_url, session)
    }

    /// Constructs a client over a custom HTTP client
    pub fn with_http_client<C>(
        client: reqwest::Client,
        base_url: Url,
        session: SessionManager<C>,
    ) -> Self
    where
        C: Clock + Clone + Send + Sync + 'static,
    {
        let http = ClientBuilder::new(client)
            .with(SessionBearerMiddleware::new(session))
            .build();
        Self::from_middleware_client(http, base_url)
    }

    /// Constructs a client over a pre-built middleware stack
    ///
    /// The stack is expected to contain a [`SessionBearerMiddleware`];
    /// use this when additional middlewares (tracing, retries for
    /// idempotent reads, ...) need to sit alongside it.
    pub fn from_middleware_client(http: ClientWithMiddleware, mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        Self { http, base_url }
    }

    /// Performs an authenticated call against the backend
    ///
    /// Exactly one HTTP call is issued per invocation; the only retry in
    /// the system is the refresh-then-proceed already folded into token
    /// resolution. A non-success status from the endpoint is returned as
    /// [`ApiError::Endpoint`], verbatim.
    pub async fn request<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(path)?;
        let mut request = self
            .http
            .request(method, url)
            .header(header::ACCEPT, APPLICATION_JSON)
            .header(header::CONTENT_TYPE, APPLICATION_JSON);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(classify_send_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.map_err(ApiError::BodyRead)?;
            Err(ApiError::Endpoint { status, body })
        }
    }

    /// Performs an authenticated `GET`
    pub async fn get(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        self.request::<()>(Method::GET, path, None).await
    }

    /// Performs an authenticated `GET` and deserializes the JSON response
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.get(path).await?;
        response.json().await.map_err(ApiError::BodyRead)
    }

    /// Performs an authenticated `POST` with a JSON body
    pub async fn post<B>(&self, path: &str, body: &B) -> Result<reqwest::Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Performs an authenticated `PUT` with a JSON body
    pub async fn put<B>(&self, path: &str, body: &B) -> Result<reqwest::Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, Some(body)).await
    }

    /// Performs an authenticated `DELETE`
    pub async fn delete(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        self.request::<()>(Method::DELETE, path, None).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|_| ApiError::InvalidPath(path.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use aliri_clock::UnixTime;
    use async_trait::async_trait;
    use pourline_session::authority::dto::TokenPair;
    use pourline_session::authority::{AuthorityError, TokenAuthority};
    use pourline_session::store::InMemorySessionStore;
    use pourline_session::{
        AccessToken, IdentityAssertionRef, RefreshToken, RefreshTokenRef, Session, SessionPatch,
        SessionState, TokenSet, UserId, UserIdentity,
    };

    use super::*;

    const TEST_TOKEN: &str = "live-access-token";
    const BEARER_TEST_TOKEN: &str = "Bearer live-access-token";

    // Far enough out that the system clock never reaches it in a test run.
    const FAR_FUTURE: u64 = 4_102_444_800;

    /// Fails the test if the manager ever reaches for the token endpoints.
    struct UnusedAuthority;

    #[async_trait]
    impl TokenAuthority for UnusedAuthority {
        async fn exchange_assertion(
            &self,
            _assertion: &IdentityAssertionRef,
        ) -> Result<TokenPair, AuthorityError> {
            panic!("the token endpoints must not be called");
        }

        async fn refresh(
            &self,
            _refresh_token: &RefreshTokenRef,
        ) -> Result<TokenPair, AuthorityError> {
            panic!("the token endpoints must not be called");
        }
    }

    fn manager_with_session(session: Session) -> SessionManager {
        SessionManager::new(
            Arc::new(InMemorySessionStore::with_session(session)),
            Arc::new(UnusedAuthority),
        )
    }

    fn live_session() -> Session {
        let mut session = Session::unauthenticated();
        session.apply(
            SessionPatch::new()
                .identity(UserIdentity {
                    user_id: UserId::from_static("u-7"),
                    display_name: "Plant Dispatcher".to_owned(),
                    email: "dispatch@example.com".to_owned(),
                })
                .tokens(TokenSet::from_parts(
                    AccessToken::from_static(TEST_TOKEN),
                    RefreshToken::from_static("refresh"),
                    UnixTime(FAR_FUTURE),
                    UnixTime(FAR_FUTURE),
                ))
                .state(SessionState::Valid),
        );
        session
    }

    fn degraded_session() -> Session {
        let mut session = Session::unauthenticated();
        session.apply(
            SessionPatch::new()
                .identity(UserIdentity {
                    user_id: UserId::from_static("u-7"),
                    display_name: "Plant Dispatcher".to_owned(),
                    email: "dispatch@example.com".to_owned(),
                })
                .clear_tokens()
                .state(SessionState::Degraded),
        );
        session
    }

    struct AuthChecker {
        expected_authorization: String,
        checked: AtomicBool,
    }

    impl AuthChecker {
        fn new(expected: impl Into<String>) -> Self {
            Self {
                expected_authorization: expected.into(),
                checked: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Middleware for AuthChecker {
        async fn handle(
            &self,
            req: reqwest::Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> reqwest_middleware::Result<reqwest::Response> {
            let authorization_header = req
                .headers()
                .get(header::AUTHORIZATION)
                .expect("no authorization header")
                .to_str()
                .expect("authorization header was not valid UTF-8");

            assert_eq!(authorization_header, self.expected_authorization);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    /// Terminates the chain with a scripted status and body.
    struct Responder {
        status: StatusCode,
        body: &'static str,
    }

    #[async_trait]
    impl Middleware for Responder {
        async fn handle(
            &self,
            _: reqwest::Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> reqwest_middleware::Result<reqwest::Response> {
            let response = http::Response::builder()
                .status(self.status)
                .body(self.body)
                .expect("valid response");
            Ok(response.into())
        }
    }

    /// Fails the test if a request makes it to the business endpoint.
    struct UnreachableEndpoint;

    #[async_trait]
    impl Middleware for UnreachableEndpoint {
        async fn handle(
            &self,
            _: reqwest::Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> reqwest_middleware::Result<reqwest::Response> {
            panic!("the business endpoint must not be called");
        }
    }

    fn backend_url() -> Url {
        Url::parse("https://backend.example/api").unwrap()
    }

    mod when_the_session_holds_a_live_token {
        use super::*;

        #[tokio::test]
        async fn the_bearer_token_is_attached() {
            let manager = manager_with_session(live_session());
            let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

            let client = ClientBuilder::new(reqwest::Client::default())
                .with(SessionBearerMiddleware::new(manager))
                .with_arc(auth_checker.clone())
                .build();

            let resp = client
                .get("https://backend.example/api/vehicles")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn a_preset_authorization_header_is_left_alone() {
            const OVERRIDE_TOKEN: &str = "overridden!";
            // Reqwest uses a capital `B` bearer
            const BEARER_OVERRIDE_TOKEN: &str = "Bearer overridden!";

            let manager = manager_with_session(live_session());
            let auth_checker = Arc::new(AuthChecker::new(BEARER_OVERRIDE_TOKEN));

            let client = ClientBuilder::new(reqwest::Client::default())
                .with(SessionBearerMiddleware::new(manager))
                .with_arc(auth_checker.clone())
                .build();

            let resp = client
                .get("https://backend.example/api/vehicles")
                .bearer_auth(OVERRIDE_TOKEN)
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn paths_join_under_the_backend_base() {
            struct PathChecker;

            #[async_trait]
            impl Middleware for PathChecker {
                async fn handle(
                    &self,
                    req: reqwest::Request,
                    _: &mut http::Extensions,
                    _: Next<'_>,
                ) -> reqwest_middleware::Result<reqwest::Response> {
                    assert_eq!(req.url().as_str(), "https://backend.example/api/vehicles/3");
                    Ok(http::Response::<&[u8]>::default().into())
                }
            }

            let manager = manager_with_session(live_session());
            let http = ClientBuilder::new(reqwest::Client::default())
                .with(SessionBearerMiddleware::new(manager))
                .with(PathChecker)
                .build();
            let client = ApiClient::from_middleware_client(http, backend_url());

            client.get("/vehicles/3").await.unwrap();
        }
    }

    mod when_the_session_is_degraded {
        use super::*;

        #[tokio::test]
        async fn the_request_short_circuits_before_any_network_io() {
            let manager = manager_with_session(degraded_session());
            let http = ClientBuilder::new(reqwest::Client::default())
                .with(SessionBearerMiddleware::new(manager))
                .with(UnreachableEndpoint)
                .build();
            let client = ApiClient::from_middleware_client(http, backend_url());

            let error = client.get("schedules/today").await.unwrap_err();

            assert!(matches!(
                error,
                ApiError::Unauthorized(TokenError::Unauthorized)
            ));
        }
    }

    mod when_the_backend_rejects_the_request {
        use super::*;

        #[tokio::test]
        async fn the_status_and_body_are_surfaced_verbatim() {
            let manager = manager_with_session(live_session());
            let http = ClientBuilder::new(reqwest::Client::default())
                .with(SessionBearerMiddleware::new(manager.clone()))
                .with(Responder {
                    status: StatusCode::UNPROCESSABLE_ENTITY,
                    body: r#"{"error":"vehicle 3 is out of service"}"#,
                })
                .build();
            let client = ApiClient::from_middleware_client(http, backend_url());

            let error = client
                .post("vehicles/3/schedule", &serde_json::json!({"slot": "08:00"}))
                .await
                .unwrap_err();

            match error {
                ApiError::Endpoint { status, body } => {
                    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
                    assert_eq!(body, r#"{"error":"vehicle 3 is out of service"}"#);
                }
                other => panic!("unexpected error: {other:?}"),
            }

            // A business-endpoint failure says nothing about the session.
            assert_eq!(manager.session().await.state, SessionState::Valid);
        }
    }

    mod when_the_backend_answers_with_json {
        use super::*;

        #[tokio::test]
        async fn get_json_deserializes_the_body() {
            let manager = manager_with_session(live_session());
            let http = ClientBuilder::new(reqwest::Client::default())
                .with(SessionBearerMiddleware::new(manager))
                .with(Responder {
                    status: StatusCode::OK,
                    body: r#"{"id":3,"plant":"north-yard"}"#,
                })
                .build();
            let client = ApiClient::from_middleware_client(http, backend_url());

            let body: serde_json::Value = client.get_json("vehicles/3").await.unwrap();

            assert_eq!(body["plant"], "north-yard");
        }
    }
}

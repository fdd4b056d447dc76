// src/services/api_server.rs
//! HTTP/JSON API for the VASP directory.
//!
//! The API is built using Axum and exposes:
//! - Registration, lookup, search and verification of identity records
//! - A listing of records still awaiting verification
//! - Administrative calls proxied to the external certificate authority
//!
//! Every route answers `200 OK` with a [`Reply`] body holding either a result
//! or a structured `{code, message}` error, so callers can tell a missing
//! record apart from an unavailable store without inspecting transport codes.

use crate::authority::credentials::CredentialStatus;
use crate::authority::serializers::{
    AuthorityResponse, FindCertificateResponse, LicensesUsedResponse, ProfileResponse,
};
use crate::authority::AuthorityClient;
use crate::error::{Error, Result};
use crate::models::vasp::Vasp;
use crate::services::directory::{
    DirectoryService, LookupRequest, RegisterReply, RegisterRequest, Reply, SearchReply,
    SearchRequest, VerifyReply,
};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Json, Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower_http::timeout::TimeoutLayer;

const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Request payload for searching certificates issued by the authority
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
struct FindCertificateRequest {
    common_name: String,
    serial_number: String,
}

/// Request payload for revoking a certificate at the authority
#[derive(Serialize, Deserialize, Debug)]
struct RevokeCertificateRequest {
    profile_id: i64,
    reason_code: u8,
    serial_number: String,
}

/// Snapshot of the authority session for operators
#[derive(Serialize, Debug)]
struct AuthoritySessionResponse {
    status: CredentialStatus,
    subject: String,
    cache_file: Option<PathBuf>,
}

/// Response for a successful revocation
#[derive(Serialize, Deserialize, Debug)]
struct RevokeCertificateResponse {
    revoked: String,
}

/// API server state containing all service dependencies
pub struct ApiServer {
    /// Registry operations over the directory store
    directory: Arc<DirectoryService>,

    /// Session with the external authority; `None` when no credentials are configured
    authority: Option<Arc<Mutex<AuthorityClient>>>,

    /// Upper bound for every request, including authority round trips
    request_timeout: Duration,
}

impl ApiServer {
    /// Creates a new instance of the API server
    ///
    /// # Arguments
    /// * `directory` - Service for registry operations
    /// * `authority` - Optional authority client for administrative routes
    /// * `request_timeout` - Deadline applied to each request
    pub fn new(
        directory: DirectoryService,
        authority: Option<AuthorityClient>,
        request_timeout: Duration,
    ) -> Self {
        ApiServer {
            directory: Arc::new(directory),
            authority: authority.map(|client| Arc::new(Mutex::new(client))),
            request_timeout,
        }
    }

    /// Builds the router with all API routes
    ///
    /// Handlers report their own deadline as a structured `Timeout` error; the
    /// outer layer only catches requests stuck past that plus a grace period.
    pub fn router(state: Arc<ApiServer>) -> Router {
        let timeout = state.request_timeout + TIMEOUT_GRACE;
        Router::new()
            .route("/register", post(Self::register_handler))
            .route("/lookup", get(Self::lookup_handler))
            .route("/search", post(Self::search_handler))
            .route("/verify/:id", post(Self::verify_handler))
            .route("/pending", get(Self::pending_handler))
            .route("/authority/status", get(Self::authority_status_handler))
            .route("/authority/licenses", get(Self::licenses_handler))
            .route("/authority/authorities", get(Self::authorities_handler))
            .route("/authority/profiles", get(Self::profiles_handler))
            .route("/authority/certificates/find", post(Self::find_certificate_handler))
            .route("/authority/certificates/revoke", post(Self::revoke_certificate_handler))
            .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
            .with_state(state)
    }

    /// Starts the API server and serves until Ctrl-C, then closes the store
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:4433")
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let state = Arc::new(self);
        let app = Self::router(state.clone());

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("directory API listening on http://{}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("shutting down directory service");
        state.directory.close().await
    }

    fn authority(&self) -> Result<&Arc<Mutex<AuthorityClient>>> {
        self.authority.as_ref().ok_or_else(|| {
            Error::Configuration("certificate authority credentials are not configured".to_string())
        })
    }

    /// Runs `call` under the request deadline; expiry abandons the call.
    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| Error::Timeout)?
    }

    // Directory routes

    /// Registers a new, unverified identity record
    ///
    /// # Endpoint
    /// POST /register
    async fn register_handler(
        State(state): State<Arc<ApiServer>>,
        payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
    ) -> impl IntoResponse {
        let outcome = match payload {
            Ok(Json(request)) => state.directory.register(request).await,
            Err(rejection) => Err(invalid(rejection)),
        };
        respond::<RegisterReply>("register", outcome)
    }

    /// Looks a record up by `id` or, failing that, by unique `name`
    ///
    /// # Endpoint
    /// GET /lookup?id=&name=
    async fn lookup_handler(
        State(state): State<Arc<ApiServer>>,
        query: std::result::Result<Query<LookupRequest>, QueryRejection>,
    ) -> impl IntoResponse {
        let outcome = match query {
            Ok(Query(request)) => state.directory.lookup(request).await,
            Err(rejection) => Err(invalid(rejection)),
        };
        respond::<Vasp>("lookup", outcome)
    }

    /// Searches records by name and/or country; certificates are withheld
    ///
    /// # Endpoint
    /// POST /search
    async fn search_handler(
        State(state): State<Arc<ApiServer>>,
        payload: std::result::Result<Json<SearchRequest>, JsonRejection>,
    ) -> impl IntoResponse {
        let outcome = match payload {
            Ok(Json(request)) => state.directory.search(request).await,
            Err(rejection) => Err(invalid(rejection)),
        };
        respond::<SearchReply>("search", outcome)
    }

    /// Issues a certificate for the record and attaches it
    ///
    /// # Endpoint
    /// POST /verify/:id
    ///
    /// # Responses
    /// The private key is included only on the call that issued the certificate.
    async fn verify_handler(
        State(state): State<Arc<ApiServer>>,
        id: std::result::Result<Path<u64>, PathRejection>,
    ) -> impl IntoResponse {
        let outcome = match id {
            Ok(Path(id)) => state.directory.verify(id).await,
            Err(rejection) => Err(invalid(rejection)),
        };
        respond::<VerifyReply>("verify", outcome)
    }

    /// # Endpoint
    /// GET /pending
    async fn pending_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        respond::<SearchReply>("pending", state.directory.pending().await)
    }

    // Authority routes

    /// Reports whether the authority session is valid, refreshable or expired
    ///
    /// # Endpoint
    /// GET /authority/status
    async fn authority_status_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        let outcome = state
            .bounded(async {
                let client = state.authority()?.lock().await;
                Ok::<_, Error>(AuthoritySessionResponse {
                    status: client.status(),
                    subject: client.creds().subject.clone(),
                    cache_file: client.creds().cache_file(),
                })
            })
            .await;
        respond::<AuthoritySessionResponse>("authority status", outcome)
    }

    /// # Endpoint
    /// GET /authority/licenses
    async fn licenses_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        let outcome = state
            .bounded(async {
                let mut client = state.authority()?.lock().await;
                client.licenses_used().await
            })
            .await;
        respond::<LicensesUsedResponse>("licenses used", outcome)
    }

    /// # Endpoint
    /// GET /authority/authorities
    async fn authorities_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        let outcome = state
            .bounded(async {
                let mut client = state.authority()?.lock().await;
                client.user_authorities().await
            })
            .await;
        respond::<Vec<AuthorityResponse>>("user authorities", outcome)
    }

    /// # Endpoint
    /// GET /authority/profiles
    async fn profiles_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        let outcome = state
            .bounded(async {
                let mut client = state.authority()?.lock().await;
                client.profiles().await
            })
            .await;
        respond::<Vec<ProfileResponse>>("profiles", outcome)
    }

    /// # Endpoint
    /// POST /authority/certificates/find
    async fn find_certificate_handler(
        State(state): State<Arc<ApiServer>>,
        payload: std::result::Result<Json<FindCertificateRequest>, JsonRejection>,
    ) -> impl IntoResponse {
        let outcome = match payload {
            Ok(Json(request)) => {
                state
                    .bounded(async {
                        let mut client = state.authority()?.lock().await;
                        client
                            .find_certificate(&request.common_name, &request.serial_number)
                            .await
                    })
                    .await
            }
            Err(rejection) => Err(invalid(rejection)),
        };
        respond::<FindCertificateResponse>("find certificate", outcome)
    }

    /// # Endpoint
    /// POST /authority/certificates/revoke
    async fn revoke_certificate_handler(
        State(state): State<Arc<ApiServer>>,
        payload: std::result::Result<Json<RevokeCertificateRequest>, JsonRejection>,
    ) -> impl IntoResponse {
        let outcome = match payload {
            Ok(Json(request)) => {
                state
                    .bounded(async {
                        let mut client = state.authority()?.lock().await;
                        client
                            .revoke_certificate(
                                request.profile_id,
                                request.reason_code,
                                &request.serial_number,
                            )
                            .await?;
                        Ok::<_, Error>(RevokeCertificateResponse {
                            revoked: request.serial_number.clone(),
                        })
                    })
                    .await
            }
            Err(rejection) => Err(invalid(rejection)),
        };
        respond::<RevokeCertificateResponse>("revoke certificate", outcome)
    }
}

fn invalid(rejection: impl std::fmt::Display) -> Error {
    Error::InvalidRequest(rejection.to_string())
}

/// Logs the outcome of an operation and wraps it in a reply envelope.
fn respond<T: Serialize>(operation: &str, outcome: Result<T>) -> Json<Reply<T>> {
    match &outcome {
        Ok(_) => info!("{} succeeded", operation),
        Err(e) if e.code() >= 500 => error!("{} failed: {}", operation, e),
        Err(e) => warn!("{} failed: {}", operation, e),
    }
    Json(Reply::from(outcome))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::credentials::testutil::{fresh_pair, token};
    use crate::authority::endpoints;
    use crate::authority::Credentials;
    use crate::storage::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn server(authority: Option<AuthorityClient>, request_timeout: Duration) -> Arc<ApiServer> {
        let directory = DirectoryService::new(Arc::new(MemoryStore::new()), None);
        Arc::new(ApiServer::new(directory, authority, request_timeout))
    }

    fn app(authority: Option<AuthorityClient>) -> Router {
        ApiServer::router(server(authority, Duration::from_secs(5)))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Value {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn register_lookup_and_search() {
        let app = app(None);

        let registered = call(
            &app,
            "POST",
            "/register",
            Some(json!({ "entity": { "legal_name": "Acme Exchange", "country": "US" } })),
        )
        .await;
        assert_eq!(registered["result"]["id"], 1);
        assert!(registered.get("error").is_none());

        let by_id = call(&app, "GET", "/lookup?id=1", None).await;
        assert_eq!(by_id["result"]["entity"]["legal_name"], "Acme Exchange");

        let by_name = call(&app, "GET", "/lookup?name=Acme%20Exchange", None).await;
        assert_eq!(by_name["result"]["id"], 1);

        let missing = call(&app, "GET", "/lookup?name=Nonexistent", None).await;
        assert_eq!(missing["error"]["code"], 404);
        assert!(missing.get("result").is_none());

        let found = call(&app, "POST", "/search", Some(json!({ "country": ["us"] }))).await;
        assert_eq!(found["result"]["vasps"].as_array().unwrap().len(), 1);

        let pending = call(&app, "GET", "/pending", None).await;
        assert_eq!(pending["result"]["vasps"][0]["id"], 1);
    }

    #[tokio::test]
    async fn malformed_input_is_a_structured_error() {
        let app = app(None);

        let request = Request::builder()
            .method("POST")
            .uri("/register")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let reply: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reply["error"]["code"], 400);

        let bad_id = call(&app, "POST", "/verify/abc", None).await;
        assert_eq!(bad_id["error"]["code"], 400);

        let empty = call(&app, "POST", "/search", Some(json!({}))).await;
        assert_eq!(empty["error"]["code"], 400);
    }

    #[tokio::test]
    async fn verify_without_authority_reports_not_loaded() {
        let app = app(None);
        call(
            &app,
            "POST",
            "/register",
            Some(json!({ "entity": { "legal_name": "Acme" } })),
        )
        .await;

        let reply = call(&app, "POST", "/verify/1", None).await;
        assert_eq!(reply["error"]["code"], 501);
    }

    #[tokio::test]
    async fn authority_routes_need_configured_client() {
        let app = app(None);
        let reply = call(&app, "GET", "/authority/licenses", None).await;
        assert_eq!(reply["error"]["code"], 500);
    }

    #[tokio::test]
    async fn authority_routes_proxy_through_client() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let (access, refresh) = fresh_pair("/account/42/user/42");

        let auth = server
            .mock("POST", endpoints::AUTHENTICATE)
            .with_status(200)
            .with_body(json!({ "accessToken": access, "refreshToken": refresh }).to_string())
            .expect(1)
            .create_async()
            .await;
        let licenses = server
            .mock("GET", endpoints::LICENSES_USED)
            .with_status(200)
            .with_body(r#"{"ordered": 10, "issued": 4}"#)
            .expect(2)
            .create_async()
            .await;

        let mut creds = Credentials::with_cache_dir(dir.path());
        creds.load_from("alice".into(), "secretz".into()).unwrap();
        let client = AuthorityClient::new(&server.url(), Duration::from_secs(5), creds).unwrap();
        let app = app(Some(client));

        for _ in 0..2 {
            let reply = call(&app, "GET", "/authority/licenses", None).await;
            assert_eq!(reply["result"], json!({ "ordered": 10, "issued": 4 }));
        }

        let status = call(&app, "GET", "/authority/status", None).await;
        assert_eq!(status["result"]["status"]["state"], "valid");
        assert_eq!(status["result"]["subject"], "/account/42/user/42");
        assert!(status["result"]["cache_file"].is_string());

        let revoke = call(
            &app,
            "POST",
            "/authority/certificates/revoke",
            Some(json!({ "profile_id": 7, "reason_code": 11, "serial_number": "01" })),
        )
        .await;
        assert_eq!(revoke["error"]["code"], 400);

        auth.assert_async().await;
        licenses.assert_async().await;
    }

    #[tokio::test]
    async fn slow_authority_times_out_and_keeps_credentials() {
        let mut server_mock = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let (access, refresh) = fresh_pair("/account/42/user/42");
        let tokens = json!({ "accessToken": access, "refreshToken": refresh }).to_string();

        let auth = server_mock
            .mock("POST", endpoints::AUTHENTICATE)
            .with_status(200)
            .with_chunked_body(move |w| {
                use std::io::Write;
                std::thread::sleep(Duration::from_secs(1));
                w.write_all(tokens.as_bytes())
            })
            .create_async()
            .await;
        let licenses = server_mock
            .mock("GET", endpoints::LICENSES_USED)
            .expect(0)
            .create_async()
            .await;

        let mut creds = Credentials::with_cache_dir(dir.path());
        creds.load_from("alice".into(), "secretz".into()).unwrap();
        creds
            .update(&token("stale", -1200, -600), &token("stale", -1200, -60))
            .unwrap();
        let before = creds.clone();
        let client =
            AuthorityClient::new(&server_mock.url(), Duration::from_secs(5), creds).unwrap();

        let state = server(Some(client), Duration::from_millis(200));
        let app = ApiServer::router(state.clone());

        let reply = call(&app, "GET", "/authority/licenses", None).await;
        assert_eq!(reply["error"]["code"], 408);
        assert!(reply.get("result").is_none());

        let client = state.authority().unwrap().lock().await;
        assert_eq!(client.creds(), &before);
        assert!(client.creds().cache_file().is_none());
        drop(client);

        auth.assert_async().await;
        licenses.assert_async().await;
    }
}

//! HTTP API for the Knot node.
//!
//! Serves the git smart HTTP protocol for fetch and push, plus a small JSON
//! API for registering repositories.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use flate2::read::GzDecoder;
use knot_git::{
    advertise_refs, receive_pack_with, upload_pack, FetchOutcome, GitError, PushOptions,
    ReceiveReport, Service,
};
use knot_storage::{RepoStore, StorageError};
use knot_types::{
    AccessControl, CollaboratorError, ContributionTracker, PushContribution, Repository,
    RepositoryResolver, Visibility,
};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::NodeConfig;
use crate::observability::{metrics_handler, metrics_middleware, request_id_middleware, METRICS};
use crate::registry::{InMemoryRegistry, TracingContributionTracker};

/// Per-node protocol settings.
#[derive(Debug, Clone)]
pub struct GitSettings {
    /// Agent advertised to clients.
    pub agent: String,
    /// Header naming the actor.
    pub actor_header: String,
    /// Largest request body, compressed or inflated.
    pub max_body_bytes: usize,
    /// Receive-pack tuning.
    pub push: PushOptions,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self::from(&NodeConfig::default())
    }
}

impl From<&NodeConfig> for GitSettings {
    fn from(config: &NodeConfig) -> Self {
        Self {
            agent: config.agent.clone(),
            actor_header: config.actor_header.clone(),
            max_body_bytes: config.max_body_bytes,
            push: config.push_options(),
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Object stores and branch table.
    pub repos: Arc<RepoStore>,
    /// Repository registry behind `/api/repos`.
    pub registry: Arc<InMemoryRegistry>,
    /// Resolves `owner/name` to a repository.
    pub resolver: Arc<dyn RepositoryResolver>,
    /// Read/write permission checks.
    pub access: Arc<dyn AccessControl>,
    /// Push event sink.
    pub tracker: Arc<dyn ContributionTracker>,
    /// Protocol settings.
    pub settings: GitSettings,
}

impl AppState {
    /// State backed by `registry` for resolution and access control.
    pub fn new(repos: Arc<RepoStore>, registry: Arc<InMemoryRegistry>, settings: GitSettings) -> Self {
        Self {
            repos,
            resolver: registry.clone(),
            access: registry.clone(),
            registry,
            tracker: Arc::new(TracingContributionTracker),
            settings,
        }
    }

    /// State built from configuration, with configured repositories registered.
    pub fn from_config(config: &NodeConfig) -> Result<Self, ApiError> {
        let registry = InMemoryRegistry::from_seeds(&config.repositories)?;
        Ok(Self::new(
            Arc::new(RepoStore::with_config(config.store_config())),
            Arc::new(registry),
            GitSettings::from(config),
        ))
    }

    /// Replaces the contribution tracker.
    pub fn with_tracker(mut self, tracker: Arc<dyn ContributionTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    fn actor<'h>(&self, headers: &'h HeaderMap) -> Option<&'h str> {
        headers
            .get(self.settings.actor_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("repository not found: {0}")]
    RepoNotFound(String),
    #[error("repository already exists: {0}")]
    RepoExists(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("access denied")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("git error: {0}")]
    Git(#[from] GitError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CollaboratorError> for ApiError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Unavailable(msg) => ApiError::Unavailable(msg),
            CollaboratorError::AlreadyExists(name) => ApiError::RepoExists(name),
        }
    }
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RepoNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RepoExists(_) => StatusCode::CONFLICT,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Git(GitError::MalformedRequest(_)) => StatusCode::BAD_REQUEST,
            ApiError::Git(GitError::ObjectNotFound(_))
            | ApiError::Git(GitError::Storage(StorageError::NotFound(_)))
            | ApiError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Git(_) | ApiError::Storage(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let mut response = (status, Json(ErrorResponse { error: self.to_string() })).into_response();
        if let ApiError::Unauthorized = self {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"knot\""),
            );
        }
        response
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Repository info for listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct RepoInfo {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub default_branch: String,
    pub visibility: Visibility,
}

impl From<&Repository> for RepoInfo {
    fn from(repo: &Repository) -> Self {
        Self {
            id: repo.id.to_hex(),
            name: repo.name.clone(),
            owner: repo.owner.clone(),
            default_branch: repo.default_branch.clone(),
            visibility: repo.visibility,
        }
    }
}

/// Request to create a repository. The owner is the calling actor.
#[derive(Debug, Deserialize)]
pub struct CreateRepoRequest {
    pub name: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceQuery {
    service: Option<String>,
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.settings.max_body_bytes;
    Router::new()
        // Health check
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Repository management
        .route("/api/repos", get(list_repos).post(create_repo))
        // Git smart HTTP protocol, with or without the `.git` suffix
        .route("/{owner}/{repo}/info/refs", get(git_info_refs))
        .route("/{owner}/{repo}/git-upload-pack", post(git_upload_pack))
        .route("/{owner}/{repo}/git-receive-pack", post(git_receive_pack))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Lists repositories the caller may read.
async fn list_repos(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let repos: Vec<RepoInfo> = state
        .registry
        .list_visible(state.actor(&headers))
        .iter()
        .map(RepoInfo::from)
        .collect();
    Json(repos)
}

/// Checks a repository name: letters, digits, `-`, `_` and `.`, no leading
/// dot and no `.git` suffix.
fn validate_repo_name(name: &str) -> Result<(), ApiError> {
    let valid = !name.is_empty()
        && name.len() <= 100
        && !name.starts_with('.')
        && !name.ends_with(".git")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("invalid repository name {:?}", name)))
    }
}

/// Creates a new repository owned by the caller.
async fn create_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRepoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = state.actor(&headers).ok_or(ApiError::Unauthorized)?;
    validate_repo_name(&req.name)?;

    let mut repo = Repository::new(req.name, owner).with_visibility(req.visibility);
    if let Some(branch) = req.default_branch {
        knot_storage::validate_branch_name(&branch)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        repo = repo.with_default_branch(branch);
    }
    let repo = state.registry.create(repo)?;

    Ok((StatusCode::CREATED, Json(RepoInfo::from(&repo))))
}

/// Resolves the path to a registered repository, accepting a `.git` suffix.
async fn resolve(state: &AppState, owner: &str, repo: &str) -> Result<Repository, ApiError> {
    let name = repo.strip_suffix(".git").unwrap_or(repo);
    state
        .resolver
        .get_repository_by_name(owner, name)
        .await?
        .ok_or_else(|| ApiError::RepoNotFound(format!("{}/{}", owner, name)))
}

/// Checks the access `service` needs. No actor means 401, a known actor 403.
async fn authorize(
    state: &AppState,
    repo: &Repository,
    actor: Option<&str>,
    service: Service,
) -> Result<(), ApiError> {
    let allowed = match service {
        Service::UploadPack => state.access.has_read_access(&repo.id, actor).await?,
        Service::ReceivePack => state.access.has_write_access(&repo.id, actor).await?,
    };
    match (allowed, actor) {
        (true, _) => Ok(()),
        (false, None) => Err(ApiError::Unauthorized),
        (false, Some(actor)) => {
            tracing::info!(repo = %repo.full_name(), actor, service = %service, "access denied");
            Err(ApiError::Forbidden)
        }
    }
}

/// Inflates gzip bodies, bounded by the configured body limit.
fn decode_body(headers: &HeaderMap, body: Bytes, limit: usize) -> Result<Bytes, ApiError> {
    let encoding = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    match encoding {
        None | Some("") | Some("identity") => Ok(body),
        Some(enc) if enc.eq_ignore_ascii_case("gzip") || enc.eq_ignore_ascii_case("x-gzip") => {
            let mut inflated = Vec::new();
            GzDecoder::new(&body[..])
                .take(limit as u64 + 1)
                .read_to_end(&mut inflated)
                .map_err(|e| ApiError::BadRequest(format!("invalid gzip body: {}", e)))?;
            if inflated.len() > limit {
                return Err(ApiError::PayloadTooLarge(limit));
            }
            Ok(Bytes::from(inflated))
        }
        Some(other) => Err(ApiError::BadRequest(format!(
            "unsupported content encoding {:?}",
            other
        ))),
    }
}

/// Runs protocol work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, GitError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("protocol task failed: {}", e)))?
        .map_err(ApiError::from)
}

fn git_response(content_type: &'static str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Git info/refs endpoint - advertises references.
async fn git_info_refs(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<ServiceQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let service: Service = query
        .service
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("dumb HTTP protocol is not supported".into()))?
        .parse()
        .map_err(|e: GitError| ApiError::BadRequest(e.to_string()))?;

    let repo = resolve(&state, &owner, &repo).await?;
    authorize(&state, &repo, state.actor(&headers), service).await?;

    let handle = state.repos.open(&repo);
    let agent = state.settings.agent.clone();
    let output = blocking(move || {
        let mut output = Vec::new();
        advertise_refs(&mut output, &handle, service, &agent)?;
        Ok(output)
    })
    .await?;

    Ok(git_response(service.advertisement_content_type(), output))
}

/// Git upload-pack endpoint - handles fetch/clone.
async fn git_upload_pack(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let service = Service::UploadPack;
    let repo = resolve(&state, &owner, &repo).await?;
    authorize(&state, &repo, state.actor(&headers), service).await?;
    let body = decode_body(&headers, body, state.settings.max_body_bytes)?;

    let handle = state.repos.open(&repo);
    let (outcome, output) = blocking(move || {
        let mut output = Vec::new();
        let outcome = upload_pack(&mut &body[..], &mut output, &handle)?;
        Ok((outcome, output))
    })
    .await?;

    let label = match outcome {
        FetchOutcome::NothingWanted => "nothing_wanted",
        FetchOutcome::Negotiating => "negotiating",
        FetchOutcome::UnknownWant(_) => "unknown_want",
        FetchOutcome::Packed { bytes, .. } => {
            METRICS.pack_bytes_sent_total.inc_by(bytes as u64);
            "packed"
        }
    };
    METRICS.record_git(service.as_str(), label);

    Ok(git_response(service.result_content_type(), output))
}

/// Git receive-pack endpoint - handles push.
async fn git_receive_pack(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let service = Service::ReceivePack;
    let repo = resolve(&state, &owner, &repo).await?;
    let actor = state.actor(&headers);
    authorize(&state, &repo, actor, service).await?;
    let body = decode_body(&headers, body, state.settings.max_body_bytes)?;

    let pusher = actor.unwrap_or("anonymous").to_string();
    let handle = state.repos.open(&repo);
    let options = state.settings.push;
    let task_pusher = pusher.clone();
    let (report, output) = blocking(move || {
        let mut output = Vec::new();
        let report = receive_pack_with(&body, &mut output, &handle, &task_pusher, &options)?;
        Ok((report, output))
    })
    .await?;

    let outcome = match &report.unpack {
        Err(_) => "unpack_failed",
        Ok(_) if report.all_ok() => "ok",
        Ok(_) => "rejected",
    };
    METRICS.record_git(service.as_str(), outcome);

    record_contributions(&state, &repo, &pusher, &report);

    Ok(git_response(service.result_content_type(), output))
}

/// Reports accepted branch updates to the tracker without waiting.
fn record_contributions(state: &AppState, repo: &Repository, pusher: &str, report: &ReceiveReport) {
    for update in report.accepted() {
        if update.command.is_delete() {
            continue;
        }
        let Some(branch) = update.command.branch_name() else {
            continue;
        };
        METRICS.pushed_commits_total.inc_by(update.commit_count as u64);

        let contribution = PushContribution {
            repo_id: repo.id,
            pusher: pusher.to_string(),
            branch: branch.to_string(),
            commit_count: update.commit_count,
            summary: update.summary.clone().unwrap_or_default(),
        };
        let tracker = state.tracker.clone();
        tokio::spawn(async move {
            if let Err(e) = tracker.record_push(contribution).await {
                tracing::warn!(error = %e, "failed to record push");
            }
        });
    }
}

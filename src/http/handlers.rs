use axum::{
    extract::{
        multipart::{Field, MultipartRejection},
        Multipart, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::app::auth::AuthService;
use crate::app::documents::{
    DocumentChanges, DocumentDraft, DocumentFilter, DocumentService, SpooledFile, MAX_TITLE_LEN,
};
use crate::app::error::is_unique_violation;
use crate::app::ingest::{IngestEvent, PublishDecision, UnpublishOutcome};
use crate::app::pagination::{PageOf, PageRequest};
use crate::app::streams::{NewStream, StreamChanges, StreamFilter, StreamService};
use crate::app::users::UserService;
use crate::domain::document::{Document, DocumentCategory, FileType};
use crate::domain::stream::{is_acceptable_stream_key, Stream, StreamCategory};
use crate::domain::user::{Role, User};
use crate::http::{
    AdminToken, AdminUser, ApiJson, ApiPath, ApiQuery, AppError, AuthUser, IngestCaller,
};
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;
const EMAIL_CONSTRAINT: &str = "users_email_key";

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub success: bool,
    pub count: usize,
    pub total: i64,
    pub pagination: Pagination,
    pub data: Vec<T>,
}

#[derive(Serialize, Default)]
pub struct Pagination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<PageLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<PageLink>,
}

#[derive(Serialize)]
pub struct PageLink {
    pub page: i64,
    pub limit: i64,
}

impl<T> From<PageOf<T>> for ListResponse<T> {
    fn from(page: PageOf<T>) -> Self {
        let limit = page.page.limit;
        let pagination = Pagination {
            next: page.has_next().then(|| PageLink {
                page: page.page.page + 1,
                limit,
            }),
            prev: page.has_prev().then(|| PageLink {
                page: page.page.page - 1,
                limit,
            }),
        };
        ListResponse {
            success: true,
            count: page.items.len(),
            total: page.total,
            pagination,
            data: page.items,
        }
    }
}

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.db.clone(),
        state.paseto_access_key,
        state.access_ttl_minutes,
    )
}

/// Deserializes a body that was accepted as plain JSON, once the caller is known to be allowed.
fn parse_body<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(body)
        .map_err(|err| AppError::bad_request(format!("invalid request body: {}", err)))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HealthResponse {
    status: &'static str,
    active_media_processes: usize,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.db.ping().await.is_ok();
    let status = if db { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        active_media_processes: state.media.active_count(),
    })
}

pub(crate) async fn api_not_found() -> AppError {
    AppError::not_found("Route not found")
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub user: User,
}

fn token_for(state: &AppState, user: User) -> Result<AuthPayload, AppError> {
    let token = auth_service(state)
        .issue_access_token(user.id)
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %user.id, "failed to issue access token");
            AppError::internal("failed to issue token")
        })?;
    Ok(AuthPayload {
        token: token.token,
        expires_at: token.expires_at,
        user,
    })
}

fn validate_password(password: &str) -> Result<(), AppError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request("password must be at least 8 characters"));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(AppError::bad_request("password must be at most 128 characters"));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(AppError::bad_request("Please add an email"));
    }
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(AppError::bad_request("Please add a valid email"));
    }
    Ok(())
}

fn duplicate_email(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .is_some_and(|err| is_unique_violation(err, EMAIL_CONSTRAINT))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AuthPayload>>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("Please add a name"));
    }
    validate_email(&payload.email)?;
    validate_password(&payload.password)?;

    let user = auth_service(&state)
        .register(payload.name, payload.email, payload.password)
        .await
        .map_err(|err| {
            if duplicate_email(&err) {
                return AppError::conflict("Email is already registered");
            }
            tracing::error!(error = ?err, "failed to register user");
            AppError::internal("failed to register user")
        })?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, ok(token_for(&state, user)?)))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<ApiResponse<AuthPayload>>, AppError> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("Please provide an email and password"));
    }
    if payload.password.len() > MAX_PASSWORD_LEN {
        return Err(AppError::bad_request("password must be at most 128 characters"));
    }

    let user = auth_service(&state)
        .login(&payload.email, &payload.password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to login");
            AppError::internal("failed to login")
        })?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    Ok(ok(token_for(&state, user)?))
}

async fn current_user(state: &AppState, auth: &AuthUser) -> Result<User, AppError> {
    UserService::new(state.db.clone())
        .get_user(auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to load user");
            AppError::internal("failed to load user")
        })?
        .ok_or_else(|| AppError::not_found("user not found"))
}

pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<User>>, AppError> {
    Ok(ok(current_user(&state, &auth).await?))
}

#[derive(Deserialize)]
pub struct UpdateDetailsRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

pub async fn update_details(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(payload): ApiJson<UpdateDetailsRequest>,
) -> Result<Json<ApiResponse<User>>, AppError> {
    if let Some(name) = &payload.name {
        if name.trim().is_empty() {
            return Err(AppError::bad_request("name cannot be empty"));
        }
    }
    if let Some(email) = &payload.email {
        validate_email(email)?;
    }

    let user = UserService::new(state.db.clone())
        .update_details(auth.user_id, payload.name, payload.email)
        .await
        .map_err(|err| {
            if duplicate_email(&err) {
                return AppError::conflict("Email is already registered");
            }
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to update user");
            AppError::internal("failed to update user")
        })?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    Ok(ok(user))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(payload): ApiJson<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<AuthPayload>>, AppError> {
    if payload.current_password.is_empty() {
        return Err(AppError::bad_request("Please provide the current password"));
    }
    validate_password(&payload.new_password)?;

    let changed = auth_service(&state)
        .change_password(auth.user_id, &payload.current_password, &payload.new_password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to change password");
            AppError::internal("failed to change password")
        })?;
    if !changed {
        return Err(AppError::unauthorized("Password is incorrect"));
    }

    let user = current_user(&state, &auth).await?;
    Ok(ok(token_for(&state, user)?))
}

#[derive(Deserialize)]
pub struct SetRoleRequest {
    pub role: String,
}

pub async fn set_user_role(
    State(state): State<AppState>,
    _admin: AdminToken,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<SetRoleRequest>,
) -> Result<Json<ApiResponse<User>>, AppError> {
    let role = Role::from_db(payload.role.trim())
        .ok_or_else(|| AppError::bad_request("role must be one of user, publisher, admin"))?;

    let user = UserService::new(state.db.clone())
        .set_role(user_id, role)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %user_id, "failed to set role");
            AppError::internal("failed to set role")
        })?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    tracing::info!(user_id = %user.id, role = role.as_db(), "user role changed");
    Ok(ok(user))
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

/// Stream keys are credentials; only the owner or an admin gets to see one.
fn present_stream(stream: Stream, viewer: Option<&AuthUser>) -> Stream {
    if viewer.is_some_and(|viewer| viewer.requester().may_modify(stream.user_id)) {
        stream
    } else {
        stream.redacted()
    }
}

fn parse_stream_category(value: &str) -> Result<StreamCategory, AppError> {
    StreamCategory::from_db(value.trim()).ok_or_else(|| {
        AppError::bad_request(
            "category must be one of assembly-session, committee-meeting, public-hearing, special-event",
        )
    })
}

fn validate_title(title: &str) -> Result<String, AppError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("Please add a title"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::bad_request(
            "Title cannot be more than 100 characters",
        ));
    }
    Ok(title.to_string())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListStreamsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub category: Option<String>,
    pub is_live: Option<bool>,
}

pub async fn list_streams(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    ApiQuery(query): ApiQuery<ListStreamsQuery>,
) -> Result<Json<ListResponse<Stream>>, AppError> {
    let filter = StreamFilter {
        category: query
            .category
            .as_deref()
            .map(parse_stream_category)
            .transpose()?,
        is_live: query.is_live,
    };
    let page = PageRequest::new(query.page, query.limit);

    let mut streams = StreamService::new(state.db.clone())
        .list(filter, page)
        .await?;
    streams.items = streams
        .items
        .into_iter()
        .map(|stream| present_stream(stream, viewer.as_ref()))
        .collect();

    Ok(Json(streams.into()))
}

pub async fn list_live_streams(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
) -> Result<Json<ListResponse<Stream>>, AppError> {
    let streams: Vec<Stream> = StreamService::new(state.db.clone())
        .list_live()
        .await?
        .into_iter()
        .map(|stream| present_stream(stream, viewer.as_ref()))
        .collect();

    Ok(Json(ListResponse {
        success: true,
        count: streams.len(),
        total: streams.len() as i64,
        pagination: Pagination::default(),
        data: streams,
    }))
}

pub async fn get_stream(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    ApiPath(stream_id): ApiPath<Uuid>,
) -> Result<Json<ApiResponse<Stream>>, AppError> {
    let stream = StreamService::new(state.db.clone()).get(stream_id).await?;
    Ok(ok(present_stream(stream, viewer.as_ref())))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStreamRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub thumbnail: Option<String>,
    pub stream_key: Option<String>,
}

pub async fn create_stream(
    State(state): State<AppState>,
    AdminUser(auth): AdminUser,
    ApiJson(payload): ApiJson<CreateStreamRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Stream>>), AppError> {
    let title = validate_title(payload.title.as_deref().unwrap_or_default())?;
    let description = payload
        .description
        .filter(|description| !description.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("Please add a description"))?;
    let category = match payload.category.as_deref() {
        Some(category) => parse_stream_category(category)?,
        None => return Err(AppError::bad_request("Please select a category")),
    };
    if let Some(key) = &payload.stream_key {
        if !is_acceptable_stream_key(key) {
            return Err(AppError::bad_request(
                "streamKey must be 16 to 64 alphanumeric characters",
            ));
        }
    }

    let stream = StreamService::new(state.db.clone())
        .create(
            auth.user_id,
            NewStream {
                title,
                description,
                category,
                thumbnail: payload.thumbnail,
                stream_key: payload.stream_key,
            },
        )
        .await?;

    tracing::info!(stream_id = %stream.id, user_id = %auth.user_id, "stream created");
    Ok((StatusCode::CREATED, ok(stream)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStreamRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub thumbnail: Option<String>,
    pub stream_key: Option<serde_json::Value>,
}

pub async fn update_stream(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(stream_id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<serde_json::Value>,
) -> Result<Json<ApiResponse<Stream>>, AppError> {
    let streams = StreamService::new(state.db.clone());
    streams
        .authorize(stream_id, auth.requester(), "update")
        .await?;

    let payload: UpdateStreamRequest = parse_body(body)?;
    if payload.stream_key.is_some() {
        return Err(AppError::bad_request("streamKey cannot be changed"));
    }
    let changes = StreamChanges {
        title: payload.title.as_deref().map(validate_title).transpose()?,
        description: match payload.description {
            Some(description) if description.trim().is_empty() => {
                return Err(AppError::bad_request("description cannot be empty"))
            }
            other => other,
        },
        category: payload
            .category
            .as_deref()
            .map(parse_stream_category)
            .transpose()?,
        thumbnail: payload.thumbnail,
    };

    let stream = streams
        .update(stream_id, auth.requester(), changes)
        .await?;
    Ok(ok(stream))
}

pub async fn delete_stream(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(stream_id): ApiPath<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    StreamService::new(state.db.clone())
        .delete(stream_id, auth.requester())
        .await?;
    let stopped = state.media.stop(stream_id);

    tracing::info!(stream_id = %stream_id, user_id = %auth.user_id, stopped, "stream deleted");
    Ok(ok(serde_json::json!({})))
}

pub async fn start_stream(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(stream_id): ApiPath<Uuid>,
) -> Result<Json<ApiResponse<Stream>>, AppError> {
    let stream = StreamService::new(state.db.clone())
        .start(stream_id, auth.requester())
        .await?;

    tracing::info!(stream_id = %stream.id, user_id = %auth.user_id, "stream started");
    Ok(ok(stream))
}

pub async fn end_stream(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(stream_id): ApiPath<Uuid>,
) -> Result<Json<ApiResponse<Stream>>, AppError> {
    let stream = StreamService::new(state.db.clone())
        .end(stream_id, auth.requester())
        .await?;
    let stopped = state.media.stop(stream_id);

    tracing::info!(stream_id = %stream.id, user_id = %auth.user_id, stopped, "stream ended");
    Ok(ok(stream))
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

fn document_service(state: &AppState) -> DocumentService {
    DocumentService::new(state.db.clone(), state.storage.clone())
}

fn parse_document_category(value: &str) -> Result<DocumentCategory, AppError> {
    DocumentCategory::from_db(value.trim()).ok_or_else(|| {
        AppError::bad_request(
            "category must be one of minutes, reports, bills, budgets, policies, notices",
        )
    })
}

fn parse_bool_field(name: &str, value: &str) -> Result<bool, AppError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" => Ok(false),
        _ => Err(AppError::bad_request(format!("{} must be true or false", name))),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub category: Option<String>,
    pub file_type: Option<String>,
}

pub async fn list_documents(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    ApiQuery(query): ApiQuery<ListDocumentsQuery>,
) -> Result<Json<ListResponse<Document>>, AppError> {
    let filter = DocumentFilter {
        category: query
            .category
            .as_deref()
            .map(parse_document_category)
            .transpose()?,
        file_type: query
            .file_type
            .as_deref()
            .map(|value| {
                FileType::from_db(value.trim().to_ascii_lowercase().as_str()).ok_or_else(|| {
                    AppError::bad_request("fileType must be one of pdf, docx, xlsx, pptx, txt")
                })
            })
            .transpose()?,
    };
    let page = PageRequest::new(query.page, query.limit);

    let documents = document_service(&state)
        .list(viewer.map(|viewer| viewer.requester()), filter, page)
        .await?;
    Ok(Json(documents.into()))
}

pub async fn get_document(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    ApiPath(document_id): ApiPath<Uuid>,
) -> Result<Json<ApiResponse<Document>>, AppError> {
    let document = document_service(&state)
        .get(document_id, viewer.map(|viewer| viewer.requester()))
        .await?;
    Ok(ok(document))
}

pub async fn download_document(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    ApiPath(document_id): ApiPath<Uuid>,
) -> Result<Response, AppError> {
    let url = document_service(&state)
        .download_url(document_id, viewer.map(|viewer| viewer.requester()))
        .await?;
    Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
}

pub async fn create_document(
    State(state): State<AppState>,
    AdminUser(auth): AdminUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Document>>), AppError> {
    let (file, draft) = read_upload_form(&state, multipart?).await?;

    let document = document_service(&state)
        .create(auth.user_id, file, draft)
        .await?;

    tracing::info!(
        document_id = %document.id,
        user_id = %auth.user_id,
        file_type = document.file_type.as_db(),
        size = %document.file_size,
        "document uploaded"
    );
    Ok((StatusCode::CREATED, ok(document)))
}

/// Reads the upload form, spooling the file part to the upload directory.
///
/// On error any spooled file is removed before returning.
async fn read_upload_form(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<(Option<SpooledFile>, DocumentDraft), AppError> {
    let mut file = None;
    let mut draft = DocumentDraft::default();

    match read_upload_fields(state, &mut multipart, &mut file, &mut draft).await {
        Ok(()) => Ok((file, draft)),
        Err(err) => {
            if let Some(file) = file {
                file.discard().await;
            }
            Err(err)
        }
    }
}

async fn read_upload_fields(
    state: &AppState,
    multipart: &mut Multipart,
    file: &mut Option<SpooledFile>,
    draft: &mut DocumentDraft,
) -> Result<(), AppError> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if file.is_some() {
                    return Err(AppError::bad_request("Only one file may be uploaded"));
                }
                let original_name = field.file_name().unwrap_or_default().to_string();
                let spooled = spool_field(state, original_name, field).await?;
                if spooled.original_name.is_empty() && spooled.size == 0 {
                    // browsers send an empty part when no file was chosen
                    spooled.discard().await;
                } else {
                    *file = Some(spooled);
                }
            }
            "title" => draft.title = Some(field.text().await?),
            "description" => draft.description = Some(field.text().await?),
            "category" => draft.category = Some(field.text().await?),
            "isPublic" => {
                let value = field.text().await?;
                draft.is_public = Some(parse_bool_field("isPublic", &value)?);
            }
            _ => {}
        }
    }
    Ok(())
}

async fn spool_field(
    state: &AppState,
    original_name: String,
    field: Field<'_>,
) -> Result<SpooledFile, AppError> {
    let path = state.upload_dir.join(Uuid::new_v4().to_string());
    let out = tokio::fs::File::create(&path).await.map_err(|err| {
        tracing::error!(error = ?err, path = %path.display(), "failed to create spool file");
        AppError::internal("failed to store upload")
    })?;

    let mut spooled = SpooledFile {
        path,
        original_name,
        size: 0,
    };

    match write_field(field, out).await {
        Ok(size) => {
            spooled.size = size;
            Ok(spooled)
        }
        Err(err) => {
            spooled.discard().await;
            Err(err)
        }
    }
}

async fn write_field(mut field: Field<'_>, mut out: tokio::fs::File) -> Result<u64, AppError> {
    let mut size: u64 = 0;
    while let Some(chunk) = field.chunk().await? {
        size += chunk.len() as u64;
        out.write_all(&chunk).await.map_err(|err| {
            tracing::error!(error = ?err, "failed to write spool file");
            AppError::internal("failed to store upload")
        })?;
    }
    out.flush().await.map_err(|err| {
        tracing::error!(error = ?err, "failed to flush spool file");
        AppError::internal("failed to store upload")
    })?;
    Ok(size)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocumentRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub is_public: Option<bool>,
}

pub async fn update_document(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(document_id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<serde_json::Value>,
) -> Result<Json<ApiResponse<Document>>, AppError> {
    let documents = document_service(&state);
    documents
        .authorize(document_id, auth.requester(), "update")
        .await?;

    let payload: UpdateDocumentRequest = parse_body(body)?;
    let changes = DocumentChanges {
        title: payload.title.as_deref().map(validate_title).transpose()?,
        description: match payload.description {
            Some(description) if description.trim().is_empty() => {
                return Err(AppError::bad_request("description cannot be empty"))
            }
            other => other,
        },
        category: payload
            .category
            .as_deref()
            .map(parse_document_category)
            .transpose()?,
        is_public: payload.is_public,
    };

    let document = documents
        .update(document_id, auth.requester(), changes)
        .await?;
    Ok(ok(document))
}

pub async fn delete_document(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(document_id): ApiPath<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    document_service(&state)
        .delete(document_id, auth.requester())
        .await?;

    tracing::info!(document_id = %document_id, user_id = %auth.user_id, "document deleted");
    Ok(ok(serde_json::json!({})))
}

// ---------------------------------------------------------------------------
// Media server hooks
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishAccepted {
    pub stream_id: Uuid,
    pub went_live: bool,
}

pub async fn ingest_publish(
    State(state): State<AppState>,
    _caller: IngestCaller,
    ApiJson(event): ApiJson<IngestEvent>,
) -> Result<Json<ApiResponse<PublishAccepted>>, AppError> {
    let decision = state.ingest.on_publish(&event).await.map_err(|err| {
        tracing::error!(error = ?err, session_id = %event.session_id, "publish hook failed");
        AppError::internal("failed to handle publish")
    })?;

    match decision {
        PublishDecision::Accept {
            stream_id,
            went_live,
        } => Ok(ok(PublishAccepted {
            stream_id,
            went_live,
        })),
        PublishDecision::Reject => Err(AppError::forbidden("stream key not recognised")),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpublishResult {
    pub stream_id: Option<Uuid>,
    pub ended: bool,
}

pub async fn ingest_unpublish(
    State(state): State<AppState>,
    _caller: IngestCaller,
    ApiJson(event): ApiJson<IngestEvent>,
) -> Result<Json<ApiResponse<UnpublishResult>>, AppError> {
    let outcome = state.ingest.on_unpublish(&event).await.map_err(|err| {
        tracing::error!(error = ?err, session_id = %event.session_id, "unpublish hook failed");
        AppError::internal("failed to handle unpublish")
    })?;

    let result = match outcome {
        UnpublishOutcome::Ended(stream_id) => UnpublishResult {
            stream_id: Some(stream_id),
            ended: true,
        },
        UnpublishOutcome::AlreadyIdle(stream_id) => UnpublishResult {
            stream_id: Some(stream_id),
            ended: false,
        },
        UnpublishOutcome::UnknownKey => UnpublishResult {
            stream_id: None,
            ended: false,
        },
    };
    Ok(ok(result))
}

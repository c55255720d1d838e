#![allow(dead_code)]

use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tower::ServiceExt;
use uuid::Uuid;

use assembly_portal::app::auth::AuthService;
use assembly_portal::config::AppConfig;
use assembly_portal::infra::storage::ObjectStorage;
use assembly_portal::AppState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

// "0123456789abcdef0123456789abcdef" (32 bytes), test-only
const TEST_PASETO_ACCESS_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";
const TEST_ADMIN_TOKEN: &str = "test-admin-token-12345";
const TEST_BUCKET: &str = "assembly-portal-test";
pub const DEFAULT_PASSWORD: &str = "testpassword123";
const MULTIPART_BOUNDARY: &str = "----assembly-portal-test-boundary";

// ---------------------------------------------------------------------------
// TestApp, built per test on top of a once-per-binary preparation
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
    pub state: AppState,
    s3_ready: bool,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body_bytes: bytes::Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn data(&self) -> Value {
        self.json()["data"].clone()
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }

    pub fn location(&self) -> Option<String> {
        self.headers
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub token: String,
}

/// One part of a multipart form: `(name, file name, content)`.
pub struct FormPart<'a> {
    pub name: &'a str,
    pub file_name: Option<&'a str>,
    pub content: &'a [u8],
}

impl<'a> FormPart<'a> {
    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            file_name: None,
            content: value.as_bytes(),
        }
    }

    pub fn file(name: &'a str, file_name: &'a str, content: &'a [u8]) -> Self {
        Self {
            name,
            file_name: Some(file_name),
            content,
        }
    }
}

/// Settings prepared once per test binary: migrations applied, tables emptied, bucket created.
struct Prepared {
    config: AppConfig,
    s3_ready: bool,
}

static PREPARED: OnceCell<Option<Prepared>> = OnceCell::const_new();

/// Build a TestApp for the calling test. `None` when `TEST_DATABASE_URL` is unset, in which
/// case the calling test returns early.
///
/// Every `#[tokio::test]` runs its own runtime, so pools and clients are built per test;
/// only the one-time preparation is shared.
pub async fn app() -> Option<TestApp> {
    let prepared = PREPARED
        .get_or_init(|| async {
            match std::env::var("TEST_DATABASE_URL") {
                Ok(url) => Some(prepare(url).await),
                Err(_) => {
                    eprintln!("TEST_DATABASE_URL is not set; skipping integration test");
                    None
                }
            }
        })
        .await
        .as_ref()?;

    let state = AppState::connect(&prepared.config)
        .await
        .expect("AppState::connect failed");
    let router = assembly_portal::http::router(state.clone());

    Some(TestApp {
        router,
        state,
        s3_ready: prepared.s3_ready,
    })
}

async fn prepare(database_url: String) -> Prepared {
    let s3_endpoint =
        std::env::var("TEST_S3_ENDPOINT").unwrap_or_else(|_| "http://localhost:4566".into());

    // ---- Run migrations ----
    let db_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("cannot connect to test database");

    let mut migration_files: Vec<_> = std::fs::read_dir("migrations")
        .expect("cannot read migrations/")
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "sql"))
        .collect();
    migration_files.sort_by_key(|e| e.file_name());

    for entry in &migration_files {
        let sql = std::fs::read_to_string(entry.path())
            .unwrap_or_else(|_| panic!("cannot read {:?}", entry.path()));
        sqlx::raw_sql(&sql)
            .execute(&db_pool)
            .await
            .unwrap_or_else(|e| panic!("migration {:?} failed: {}", entry.file_name(), e));
    }

    sqlx::raw_sql("TRUNCATE TABLE documents, streams, users CASCADE")
        .execute(&db_pool)
        .await
        .expect("failed to truncate tables");
    db_pool.close().await;

    // ---- Build AppConfig (same code path as production) ----
    let scratch = std::env::temp_dir().join(format!("assembly-portal-test-{}", Uuid::new_v4()));

    std::env::set_var("DATABASE_URL", &database_url);
    std::env::set_var("S3_ENDPOINT", &s3_endpoint);
    std::env::set_var("S3_BUCKET", TEST_BUCKET);
    std::env::set_var("S3_REGION", "us-east-1");
    std::env::set_var("PASETO_ACCESS_KEY", TEST_PASETO_ACCESS_KEY);
    std::env::set_var("ADMIN_TOKEN", TEST_ADMIN_TOKEN);
    std::env::remove_var("INGEST_HOOK_TOKEN");
    std::env::set_var("UPLOAD_DIR", scratch.join("uploads"));
    std::env::set_var("UPLOAD_MAX_BYTES", "1048576");
    std::env::set_var("STATIC_DIR", scratch.join("static"));
    std::env::set_var("MEDIA_ROOT", scratch.join("media"));
    // No encoder binary: spawns fail and publishes must still be accepted.
    std::env::set_var("FFMPEG_PATH", scratch.join("no-ffmpeg"));
    std::env::set_var("LIVE_PACKAGING", "false");
    std::env::set_var("DB_MAX_CONNECTIONS", "5");
    std::env::set_var("DB_CONNECT_TIMEOUT_SECONDS", "30");
    std::env::set_var("AWS_ACCESS_KEY_ID", "test");
    std::env::set_var("AWS_SECRET_ACCESS_KEY", "test");
    std::env::set_var("AWS_DEFAULT_REGION", "us-east-1");

    let config = AppConfig::from_env().expect("failed to build AppConfig");

    let storage = ObjectStorage::new(&config)
        .await
        .expect("failed to build storage client");
    let s3_ready = match storage
        .client()
        .create_bucket()
        .bucket(storage.bucket())
        .send()
        .await
    {
        Ok(_) => true,
        Err(err) => {
            // an existing bucket is fine; anything else means no usable endpoint
            let exists = storage
                .client()
                .head_bucket()
                .bucket(storage.bucket())
                .send()
                .await
                .is_ok();
            if !exists {
                eprintln!("object storage unavailable ({:?}); upload tests will skip", err);
            }
            exists
        }
    };

    Prepared { config, s3_ready }
}

impl TestApp {
    /// Whether uploads can reach a real S3-compatible endpoint.
    pub fn s3_ready(&self) -> bool {
        self.s3_ready
    }

    // ------------------------------------------------------------------
    // Low-level request helper
    // ------------------------------------------------------------------
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed");

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();

        TestResponse {
            status,
            headers,
            body_bytes,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.send(request).await
    }

    // ------------------------------------------------------------------
    // Convenience HTTP helpers
    // ------------------------------------------------------------------
    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::GET, path, None, token).await
    }

    pub async fn post_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        self.request(Method::POST, path, Some(body), token).await
    }

    pub async fn put_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        self.request(Method::PUT, path, Some(body), token).await
    }

    pub async fn put(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::PUT, path, None, token).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::DELETE, path, None, token).await
    }

    /// PUT with the operator token in the x-admin-token header.
    pub async fn put_admin(&self, path: &str, body: Value, admin_token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method(Method::PUT)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = admin_token {
            builder = builder.header("x-admin-token", token);
        }
        let request = builder
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap();
        self.send(request).await
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        parts: &[FormPart<'_>],
        token: Option<&str>,
    ) -> TestResponse {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
            match part.file_name {
                Some(file_name) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n",
                            part.name, file_name
                        )
                        .as_bytes(),
                    );
                }
                None => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            part.name
                        )
                        .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(part.content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY),
            );
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }

    /// Simulates the media server reporting a publish or unpublish of `path`.
    pub async fn ingest(&self, hook: &str, path: &str) -> TestResponse {
        self.post_json(
            &format!("/api/ingest/{}", hook),
            json!({ "sessionId": Uuid::new_v4().to_string(), "path": path, "args": {} }),
            None,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Test data helpers
    // ------------------------------------------------------------------

    /// Create a user directly in the DB and issue a bearer token for it.
    pub async fn create_user(&self, suffix: &str) -> TestUser {
        self.create_user_with_role(suffix, "user").await
    }

    pub async fn create_admin(&self, suffix: &str) -> TestUser {
        self.create_user_with_role(suffix, "admin").await
    }

    async fn create_user_with_role(&self, suffix: &str, role: &str) -> TestUser {
        let unique = Uuid::new_v4().simple().to_string();
        let name = format!("Test User {}", suffix);
        let email = format!("test_{}_{}@example.com", suffix, &unique[..8]);

        // Hash password with Argon2 (same algorithm as production)
        let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
        let hash = Argon2::default()
            .hash_password(DEFAULT_PASSWORD.as_bytes(), &salt)
            .expect("password hash failed")
            .to_string();

        let user_id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (name, email, password_hash, role) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&name)
        .bind(&email)
        .bind(&hash)
        .bind(role)
        .fetch_one(self.pool())
        .await
        .expect("insert test user failed");

        let token = AuthService::new(
            self.state.db.clone(),
            self.state.paseto_access_key,
            self.state.access_ttl_minutes,
        )
        .issue_access_token(user_id)
        .expect("issue_access_token failed");

        TestUser {
            id: user_id,
            name,
            email,
            token: token.token,
        }
    }

    /// Create a stream through the API as `admin`. Returns the `data` payload.
    pub async fn create_stream(&self, admin: &TestUser, title: &str) -> Value {
        let resp = self
            .post_json(
                "/api/streams",
                json!({
                    "title": title,
                    "description": "Plenary sitting",
                    "category": "committee-meeting",
                }),
                Some(&admin.token),
            )
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "{:?}", resp.json());
        resp.data()
    }

    /// Insert a document row directly (no object storage involved). Returns its id.
    pub async fn insert_document(&self, owner_id: Uuid, is_public: bool) -> Uuid {
        let unique = Uuid::new_v4();
        sqlx::query_scalar(
            "INSERT INTO documents \
                (title, description, file_url, file_type, file_size, category, is_public, user_id) \
             VALUES ('Seeded', 'Seeded document', $1, 'pdf', '1 KB', 'minutes', $2, $3) \
             RETURNING id",
        )
        .bind(format!(
            "http://localhost:4566/{}/county_assembly/documents/{}.pdf",
            TEST_BUCKET, unique
        ))
        .bind(is_public)
        .bind(owner_id)
        .fetch_one(self.pool())
        .await
        .expect("insert test document failed")
    }

    /// Return the operator token used by the test infrastructure.
    pub fn admin_token(&self) -> &str {
        TEST_ADMIN_TOKEN
    }

    /// Return the pool for direct DB assertions.
    pub fn pool(&self) -> &PgPool {
        self.state.db.pool()
    }
}

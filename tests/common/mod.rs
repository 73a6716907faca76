use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use chrono::Duration;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use merenib::auth::jwt::JwtService;
use merenib::config::{AppConfig, DEFAULT_AUTH_COOKIE_NAME, DEFAULT_MAX_UPLOAD_BYTES};
use merenib::db::{self, PgPool};
use merenib::routes;
use merenib::state::AppState;
use merenib::storage::{LocalStorage, ObjectStorage, StorageError, StorageResult};
use once_cell::sync::Lazy;
use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::{Barrier, Mutex};
use tower::util::ServiceExt;

pub const TEST_SECRET: &str = "test-secret";

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Byte store that refuses every write.
#[derive(Default)]
#[allow(dead_code)]
pub struct FailingStorage;

#[async_trait]
impl ObjectStorage for FailingStorage {
    async fn put_object(&self, key: &str, _bytes: Vec<u8>) -> StorageResult<()> {
        Err(StorageError::Io {
            key: key.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        })
    }

    async fn get_object(&self, key: &str) -> StorageResult<Vec<u8>> {
        Err(StorageError::NotFound(key.to_string()))
    }

    async fn delete_prefix(&self, _prefix: &str) -> StorageResult<bool> {
        Ok(false)
    }

    async fn list_prefix(&self, _prefix: &str) -> StorageResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Local storage whose prefix deletes always fail.
#[allow(dead_code)]
pub struct PurgeFailingStorage {
    inner: LocalStorage,
}

impl PurgeFailingStorage {
    #[allow(dead_code)]
    pub fn new(root: &Path) -> Self {
        Self {
            inner: LocalStorage::new(root),
        }
    }
}

#[async_trait]
impl ObjectStorage for PurgeFailingStorage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()> {
        self.inner.put_object(key, bytes).await
    }

    async fn get_object(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.inner.get_object(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<bool> {
        Err(StorageError::Io {
            key: prefix.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list_prefix(prefix).await
    }
}

/// Local storage that holds the first two writes until both have arrived,
/// then lets the write carrying `delayed` land well after the other one.
#[allow(dead_code)]
pub struct RacingStorage {
    inner: LocalStorage,
    gate: Barrier,
    delayed: Vec<u8>,
}

impl RacingStorage {
    #[allow(dead_code)]
    pub fn new(root: &Path, delayed: &[u8]) -> Self {
        Self {
            inner: LocalStorage::new(root),
            gate: Barrier::new(2),
            delayed: delayed.to_vec(),
        }
    }
}

#[async_trait]
impl ObjectStorage for RacingStorage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()> {
        self.gate.wait().await;
        if bytes == self.delayed {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }
        self.inner.put_object(key, bytes).await
    }

    async fn get_object(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.inner.get_object(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<bool> {
        self.inner.delete_prefix(prefix).await
    }

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list_prefix(prefix).await
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    upload_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let upload_dir = tempfile::tempdir().context("failed to create upload dir")?;
        let storage = Arc::new(LocalStorage::new(upload_dir.path()));
        Self::build(upload_dir, storage).await
    }

    /// Builds the app over a storage created for a fresh upload directory.
    #[allow(dead_code)]
    pub async fn with_storage<F>(make_storage: F) -> Result<Self>
    where
        F: FnOnce(&Path) -> Arc<dyn ObjectStorage>,
    {
        let upload_dir = tempfile::tempdir().context("failed to create upload dir")?;
        let storage = make_storage(upload_dir.path());
        Self::build(upload_dir, storage).await
    }

    async fn build(upload_dir: TempDir, storage: Arc<dyn ObjectStorage>) -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: TEST_SECRET.to_string(),
            jwt_issuer: None,
            jwt_audience: None,
            jwt_expiry_minutes: 60,
            auth_cookie_name: DEFAULT_AUTH_COOKIE_NAME.to_string(),
            upload_dir: upload_dir.path().to_path_buf(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            cors_allowed_origin: None,
        };

        let pool = db::init_pool(&config.database_url)?;
        prepare_database(&pool).await?;

        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, storage, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            upload_dir,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn upload_dir(&self) -> &Path {
        self.upload_dir.path()
    }

    pub fn token_for(&self, user_id: i64, subject: &str) -> String {
        self.state
            .jwt
            .generate_token(user_id, subject)
            .expect("token generation")
    }

    #[allow(dead_code)]
    pub fn token_with_secret(&self, secret: &str, user_id: i64) -> String {
        JwtService::new(secret, None, None, Duration::minutes(5))
            .and_then(|jwt| jwt.generate_token(user_id, "mallory"))
            .expect("token generation")
    }

    #[allow(dead_code)]
    pub async fn count_file_rows(&self, board_id: i64) -> Result<i64> {
        self.with_conn(move |conn| {
            use merenib::schema::board_files;
            let count = board_files::table
                .filter(board_files::board_id.eq(board_id))
                .count()
                .get_result(conn)
                .context("failed to count file rows")?;
            Ok(count)
        })
        .await
    }

    pub async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body))?).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty())?).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        self.send(builder.body(Body::empty())?).await
    }

    /// Creates a board through the API and returns its id.
    #[allow(dead_code)]
    pub async fn create_board(&self, name: &str, token: &str) -> Result<i64> {
        #[derive(serde::Deserialize)]
        struct Created {
            id: i64,
        }

        let response = self
            .post_json(
                "/api/boards",
                &serde_json::json!({ "name": name, "data": "" }),
                Some(token),
            )
            .await?;
        anyhow::ensure!(
            response.status() == axum::http::StatusCode::CREATED,
            "create board failed with status {}",
            response.status()
        );
        let created: Created = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
        Ok(created.id)
    }

    #[allow(dead_code)]
    pub async fn upload_file(
        &self,
        board_id: i64,
        file_id: Option<&str>,
        file: Option<(&str, &str, &[u8])>,
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = "merenib-test-boundary";
        let mut body = Vec::new();

        if let Some(file_id) = file_id {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(b"Content-Disposition: form-data; name=\"file_id\"\r\n\r\n");
            body.extend(file_id.as_bytes());
            body.extend(b"\r\n");
        }

        if let Some((filename, content_type, data)) = file {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend(data);
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/boards/{board_id}/files"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        self.send(request).await
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute("TRUNCATE TABLE board_files, boards RESTART IDENTITY CASCADE;")
        .context("failed to truncate tables")?;
    Ok(())
}

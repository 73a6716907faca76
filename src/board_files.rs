//! Attachments of a board: one database row plus one stored object per
//! `(board_id, file_id)`.
//!
//! The row is the source of truth for "this upload is done". Bytes are written
//! first and the row inserted second, so a row always has bytes behind it.
//! Object keys include the content checksum: an upload that loses the race for
//! the row leaves its bytes beside the winner's instead of over them, and a
//! retry after a failed insert writes the same key again.

use std::sync::Arc;

use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::boards::owned_board_exists;
use crate::db::{self, PgPool};
use crate::error::{AppError, AppResult};
use crate::models::{BoardFile, NewBoardFile};
use crate::schema::{board_files, boards};
use crate::storage::ObjectStorage;

pub const MAX_FILE_ID_LEN: usize = 255;

const LOCATOR_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Default)]
pub struct UploadRequest {
    pub file_id: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub file_id: String,
    pub url: String,
    /// `false` when the file was already stored and nothing was written.
    pub created: bool,
}

#[derive(Debug)]
pub struct StoredFile {
    pub file: BoardFile,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct FileStore {
    pool: PgPool,
    storage: Arc<dyn ObjectStorage>,
}

impl FileStore {
    pub fn new(pool: PgPool, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { pool, storage }
    }

    pub async fn upload(
        &self,
        owner_id: i64,
        board_id: i64,
        request: UploadRequest,
    ) -> AppResult<UploadOutcome> {
        let mut conn = db::connection(&self.pool)?;

        if !owned_board_exists(&mut conn, owner_id, board_id)? {
            return Err(AppError::not_found());
        }

        let raw_file_id = request
            .file_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::bad_request("file_id required"))?;
        let file_id = sanitize_file_id(raw_file_id)?;
        let bytes = request
            .bytes
            .ok_or_else(|| AppError::bad_request("file required"))?;

        let already_stored: bool = diesel::select(diesel::dsl::exists(
            board_files::table
                .filter(board_files::board_id.eq(board_id))
                .filter(board_files::file_id.eq(&file_id)),
        ))
        .get_result(&mut conn)?;

        let url = file_locator(board_id, &file_id);
        if already_stored {
            info!(board_id, file_id = %file_id, "upload skipped, file already stored");
            return Ok(UploadOutcome {
                file_id,
                url,
                created: false,
            });
        }
        drop(conn);

        let checksum = content_checksum(&bytes);
        let key = file_key(board_id, &file_id, &checksum);
        let size_bytes = bytes.len() as i64;

        self.storage
            .put_object(&key, bytes)
            .await
            .map_err(|err| AppError::internal(format!("failed to store file bytes: {err}")))?;

        let file_name = request
            .file_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| file_id.clone());
        let new_file = NewBoardFile {
            board_id,
            file_id: &file_id,
            file_name: &file_name,
            file_path: &key,
            content_type: request.content_type.as_deref(),
            size_bytes,
            checksum: &checksum,
        };

        let mut conn = db::connection(&self.pool)?;
        match diesel::insert_into(board_files::table)
            .values(&new_file)
            .execute(&mut conn)
        {
            Ok(_) => {}
            // Lost a race with a concurrent upload of the same id.
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                info!(board_id, file_id = %file_id, "concurrent upload already stored file");
                return Ok(UploadOutcome {
                    file_id,
                    url,
                    created: false,
                });
            }
            // The board was deleted after the ownership check.
            Err(DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _)) => {
                warn!(board_id, file_id = %file_id, "board vanished during upload");
                return Err(AppError::not_found());
            }
            Err(err) => {
                error!(board_id, file_id = %file_id, key = %key, "uploaded bytes left without a record");
                return Err(AppError::from(err));
            }
        }

        info!(board_id, file_id = %file_id, size_bytes, "file uploaded");
        Ok(UploadOutcome {
            file_id,
            url,
            created: true,
        })
    }

    pub async fn get(&self, owner_id: i64, board_id: i64, file_id: &str) -> AppResult<StoredFile> {
        let file = {
            let mut conn = db::connection(&self.pool)?;
            board_files::table
                .inner_join(boards::table)
                .filter(board_files::board_id.eq(board_id))
                .filter(board_files::file_id.eq(file_id))
                .filter(boards::owner_id.eq(owner_id))
                .select(BoardFile::as_select())
                .first(&mut conn)
                .optional()?
                .ok_or_else(AppError::not_found)?
        };

        let bytes = self.storage.get_object(&file.file_path).await?;
        Ok(StoredFile { file, bytes })
    }

    /// Identifiers in upload order.
    pub fn list_ids(&self, owner_id: i64, board_id: i64) -> AppResult<Vec<String>> {
        let mut conn = db::connection(&self.pool)?;

        if !owned_board_exists(&mut conn, owner_id, board_id)? {
            return Err(AppError::not_found());
        }

        let ids: Vec<String> = board_files::table
            .filter(board_files::board_id.eq(board_id))
            .order(board_files::id.asc())
            .select(board_files::file_id)
            .load(&mut conn)?;
        Ok(ids)
    }

    /// Removes every stored object of a board. Failures are logged only.
    pub async fn purge_board(&self, board_id: i64) {
        let prefix = board_prefix(board_id);
        match self.storage.delete_prefix(&prefix).await {
            Ok(true) => info!(board_id, "purged board files"),
            Ok(false) => {}
            Err(err) => warn!(error = %err, board_id, "failed to purge board files"),
        }
    }
}

pub fn board_prefix(board_id: i64) -> String {
    format!("boards/{board_id}")
}

/// Storage key of one upload's bytes. Distinct content never shares a key.
pub fn file_key(board_id: i64, file_id: &str, checksum: &str) -> String {
    format!("boards/{board_id}/{file_id}/{checksum}")
}

/// Lowercase hex sha256, stored as the file's checksum and ETag.
pub fn content_checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Public address of an attachment.
pub fn file_locator(board_id: i64, file_id: &str) -> String {
    format!(
        "/api/boards/{board_id}/files/{}",
        utf8_percent_encode(file_id, LOCATOR_SEGMENT)
    )
}

/// Reduces a caller supplied id to its last path segment so it can only ever
/// name a file directly inside the board's directory.
pub fn sanitize_file_id(raw: &str) -> AppResult<String> {
    let leaf = raw
        .rsplit(|ch: char| ch == '/' || ch == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    if leaf.is_empty() || leaf == "." || leaf == ".." {
        return Err(AppError::bad_request("file_id is not a valid file name"));
    }
    if leaf.chars().any(char::is_control) {
        return Err(AppError::bad_request("file_id contains control characters"));
    }
    if leaf.len() > MAX_FILE_ID_LEN {
        return Err(AppError::bad_request(format!(
            "file_id must be at most {MAX_FILE_ID_LEN} bytes"
        )));
    }
    Ok(leaf.to_string())
}

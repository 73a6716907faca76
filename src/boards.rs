//! Board records and their ownership rules.
//!
//! Every query here filters on both the board id and the caller's id, so a
//! board owned by someone else is indistinguishable from one that does not
//! exist.

use chrono::Utc;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::PgConnection;
use tracing::info;

use crate::board_files::FileStore;
use crate::db::{self, PgPool};
use crate::error::{AppError, AppResult};
use crate::models::{Board, BoardSummary, NewBoard};
use crate::schema::boards;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedBoard {
    pub id: i64,
    pub name: String,
}

/// Partial update. An absent or empty `name` keeps the stored one, `data`
/// always replaces the stored payload, even when empty.
#[derive(Debug, Clone, Default)]
pub struct BoardUpdate {
    pub name: Option<String>,
    pub data: String,
}

#[derive(AsChangeset)]
#[diesel(table_name = boards)]
struct BoardChangeset<'a> {
    name: Option<&'a str>,
    data: &'a str,
    updated_at: chrono::NaiveDateTime,
}

#[derive(Clone)]
pub struct BoardStore {
    pool: PgPool,
    files: FileStore,
}

impl BoardStore {
    pub fn new(pool: PgPool, files: FileStore) -> Self {
        Self { pool, files }
    }

    pub fn create(&self, owner_id: i64, name: &str, data: &str) -> AppResult<CreatedBoard> {
        if name.is_empty() {
            return Err(AppError::bad_request("name required"));
        }

        let mut conn = db::connection(&self.pool)?;
        let now = Utc::now().naive_utc();
        let new_board = NewBoard {
            owner_id,
            name,
            data,
            created_at: now,
            updated_at: now,
        };

        let id: i64 = diesel::insert_into(boards::table)
            .values(&new_board)
            .returning(boards::id)
            .get_result(&mut conn)?;

        info!(board_id = id, owner_id, "board created");
        Ok(CreatedBoard {
            id,
            name: name.to_string(),
        })
    }

    /// Most recently updated first.
    pub fn list(&self, owner_id: i64) -> AppResult<Vec<BoardSummary>> {
        let mut conn = db::connection(&self.pool)?;
        let summaries = boards::table
            .filter(boards::owner_id.eq(owner_id))
            .order((boards::updated_at.desc(), boards::id.desc()))
            .select(BoardSummary::as_select())
            .load(&mut conn)?;
        Ok(summaries)
    }

    pub fn get(&self, owner_id: i64, board_id: i64) -> AppResult<Board> {
        let mut conn = db::connection(&self.pool)?;
        boards::table
            .filter(boards::id.eq(board_id))
            .filter(boards::owner_id.eq(owner_id))
            .select(Board::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or_else(AppError::not_found)
    }

    pub fn update(&self, owner_id: i64, board_id: i64, update: &BoardUpdate) -> AppResult<()> {
        let name = update
            .name
            .as_deref()
            .filter(|name| !name.is_empty());
        let changeset = BoardChangeset {
            name,
            data: &update.data,
            updated_at: Utc::now().naive_utc(),
        };

        let mut conn = db::connection(&self.pool)?;
        let updated = diesel::update(
            boards::table
                .filter(boards::id.eq(board_id))
                .filter(boards::owner_id.eq(owner_id)),
        )
        .set(&changeset)
        .execute(&mut conn)?;

        if updated == 0 {
            return Err(AppError::not_found());
        }
        Ok(())
    }

    /// Deletes the row, then purges the board's attachments. The purge is
    /// best effort and never turns a successful delete into a failure.
    pub async fn delete(&self, owner_id: i64, board_id: i64) -> AppResult<()> {
        let deleted = {
            let mut conn = db::connection(&self.pool)?;
            diesel::delete(
                boards::table
                    .filter(boards::id.eq(board_id))
                    .filter(boards::owner_id.eq(owner_id)),
            )
            .execute(&mut conn)?
        };

        if deleted == 0 {
            return Err(AppError::not_found());
        }

        info!(board_id, owner_id, "board deleted");
        self.files.purge_board(board_id).await;
        Ok(())
    }
}

/// Single-predicate existence check used before any attachment access.
pub(crate) fn owned_board_exists(
    conn: &mut PgConnection,
    owner_id: i64,
    board_id: i64,
) -> QueryResult<bool> {
    diesel::select(exists(
        boards::table
            .filter(boards::id.eq(board_id))
            .filter(boards::owner_id.eq(owner_id)),
    ))
    .get_result(conn)
}

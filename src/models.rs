use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = boards)]
pub struct Board {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub data: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = boards)]
pub struct NewBoard<'a> {
    pub owner_id: i64,
    pub name: &'a str,
    pub data: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// List view of a board; `data` is never loaded for it.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = boards)]
pub struct BoardSummary {
    pub id: i64,
    pub name: String,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = board_files)]
#[diesel(belongs_to(Board))]
pub struct BoardFile {
    pub id: i64,
    pub board_id: i64,
    pub file_id: String,
    pub file_name: String,
    pub file_path: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = board_files)]
pub struct NewBoardFile<'a> {
    pub board_id: i64,
    pub file_id: &'a str,
    pub file_name: &'a str,
    pub file_path: &'a str,
    pub content_type: Option<&'a str>,
    pub size_bytes: i64,
    pub checksum: &'a str,
}

use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use super::{to_iso, ResourcePath};
use crate::auth::AuthenticatedUser;
use crate::boards::BoardUpdate;
use crate::error::{AppError, AppResult};
use crate::models::{Board, BoardSummary};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateBoardRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Deserialize)]
pub struct UpdateBoardRequest {
    pub name: Option<String>,
    pub data: Option<String>,
}

#[derive(Serialize)]
pub struct CreatedBoardResponse {
    pub id: i64,
    pub name: String,
}

#[derive(Serialize)]
pub struct BoardSummaryResponse {
    pub id: i64,
    pub name: String,
    pub updated_at: String,
}

impl From<BoardSummary> for BoardSummaryResponse {
    fn from(summary: BoardSummary) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            updated_at: to_iso(summary.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct BoardResponse {
    pub id: i64,
    pub name: String,
    pub data: String,
    pub updated_at: String,
}

impl From<Board> for BoardResponse {
    fn from(board: Board) -> Self {
        Self {
            id: board.id,
            name: board.name,
            data: board.data,
            updated_at: to_iso(board.updated_at),
        }
    }
}

fn invalid_body(_: JsonRejection) -> AppError {
    AppError::bad_request("invalid request")
}

pub async fn create_board(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<CreateBoardRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<CreatedBoardResponse>)> {
    let Json(payload) = payload.map_err(invalid_body)?;
    let created = state
        .boards
        .create(user.user_id, &payload.name, &payload.data)?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedBoardResponse {
            id: created.id,
            name: created.name,
        }),
    ))
}

pub async fn list_boards(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<BoardSummaryResponse>>> {
    let summaries = state.boards.list(user.user_id)?;
    Ok(Json(summaries.into_iter().map(Into::into).collect()))
}

pub async fn get_board(
    State(state): State<AppState>,
    ResourcePath(board_id): ResourcePath<i64>,
    user: AuthenticatedUser,
) -> AppResult<Json<BoardResponse>> {
    let board = state.boards.get(user.user_id, board_id)?;
    Ok(Json(board.into()))
}

pub async fn update_board(
    State(state): State<AppState>,
    ResourcePath(board_id): ResourcePath<i64>,
    user: AuthenticatedUser,
    payload: Result<Json<UpdateBoardRequest>, JsonRejection>,
) -> AppResult<StatusCode> {
    let Json(payload) = payload.map_err(invalid_body)?;
    let update = BoardUpdate {
        name: payload.name,
        data: payload.data.unwrap_or_default(),
    };
    state.boards.update(user.user_id, board_id, &update)?;
    Ok(StatusCode::OK)
}

pub async fn delete_board(
    State(state): State<AppState>,
    ResourcePath(board_id): ResourcePath<i64>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    state.boards.delete(user.user_id, board_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

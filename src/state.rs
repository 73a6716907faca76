use std::sync::Arc;

use crate::{
    auth::jwt::JwtService, board_files::FileStore, boards::BoardStore, config::AppConfig,
    db::PgPool, storage::ObjectStorage,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
    pub boards: BoardStore,
    pub files: FileStore,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        jwt: JwtService,
    ) -> Self {
        let files = FileStore::new(pool.clone(), storage);
        let boards = BoardStore::new(pool.clone(), files.clone());
        Self {
            pool,
            config: Arc::new(config),
            jwt,
            boards,
            files,
        }
    }
}

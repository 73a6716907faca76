use std::collections::HashSet;
use std::env;

use anyhow::{anyhow, Context, Result};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;

use merenib::{
    auth::jwt::JwtService,
    board_files::board_prefix,
    config::AppConfig,
    db,
    schema::boards,
    storage::{LocalStorage, ObjectStorage},
};

const USAGE: &str = "Usage:\n  maintenance issue-token <user_id> <subject>\n  maintenance prune-orphans";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("issue-token") => {
            let user_id = args
                .next()
                .ok_or_else(|| anyhow!("missing <user_id>\n{USAGE}"))?
                .parse::<i64>()
                .context("user_id must be an integer")?;
            let subject = args
                .next()
                .ok_or_else(|| anyhow!("missing <subject>\n{USAGE}"))?;
            issue_token(user_id, &subject)?;
        }
        Some("prune-orphans") => prune_orphans().await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn issue_token(user_id: i64, subject: &str) -> Result<()> {
    let config = AppConfig::from_env()?;
    let jwt = JwtService::from_config(&config)?;
    let token = jwt.generate_token(user_id, subject)?;
    println!("{token}");
    Ok(())
}

/// Removes attachment directories whose board row no longer exists, which is
/// what a failed purge after a board delete leaves behind.
async fn prune_orphans() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        upload_dir = %config.upload_dir.display(),
        "loaded backend configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let storage = LocalStorage::new(config.upload_dir.clone());

    // Directories are listed before rows are loaded: a directory only exists
    // once its board row does, and board ids are never reused.
    let directories = storage
        .list_prefix("boards")
        .await
        .context("failed to list board directories")?;

    let existing: HashSet<i64> = {
        let mut conn = pool.get().context("failed to get database connection")?;
        boards::table
            .select(boards::id)
            .load::<i64>(&mut conn)
            .context("failed to load board ids")?
            .into_iter()
            .collect()
    };

    let mut removed = 0usize;
    for name in directories {
        let Ok(board_id) = name.parse::<i64>() else {
            eprintln!("Skipping unexpected entry boards/{name}");
            continue;
        };
        if existing.contains(&board_id) {
            continue;
        }
        match storage.delete_prefix(&board_prefix(board_id)).await {
            Ok(_) => removed += 1,
            Err(err) => eprintln!("Failed to remove boards/{board_id}: {err}"),
        }
    }

    println!("Removed {removed} orphaned board directories.");
    Ok(())
}

//! Schema migration tool.
//!
//! Usage: `devarch-migrate [up|down]`
//!
//! Reads `DATABASE_URL` and `MIGRATIONS_DIR` from the environment and
//! applies (or reverts) migrations. Exits 0 on success, non-zero on any
//! failure: connection, execution, or version recording.

use devarch_control::store::{migrate_down, migrate_up};
use devarch_control::Settings;
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let direction = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());
    if direction != "up" && direction != "down" {
        eprintln!("usage: devarch-migrate [up|down]");
        return ExitCode::FAILURE;
    }

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("devarch-migrate: {e}");
            return ExitCode::FAILURE;
        }
    };

    let pool = match PgPoolOptions::new()
        .max_connections(1)
        .connect(&settings.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("devarch-migrate: failed to connect: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = if direction == "up" {
        match migrate_up(&pool, &settings.migrations_dir).await {
            Ok(applied) => {
                if applied.is_empty() {
                    println!("no pending migrations");
                } else {
                    for version in &applied {
                        println!("applied {version}");
                    }
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    } else {
        match migrate_down(&pool, &settings.migrations_dir).await {
            Ok(Some(version)) => {
                println!("reverted {version}");
                Ok(())
            }
            Ok(None) => {
                println!("nothing to revert");
                Ok(())
            }
            Err(e) => Err(e),
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("devarch-migrate: {e}");
            ExitCode::FAILURE
        }
    }
}

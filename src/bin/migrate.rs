use std::path::PathBuf;

use clap::Parser;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

#[derive(Parser, Debug)]
#[command(
    name = "migrate",
    about = "Apply or revert the auth-server database schema"
)]
struct Args {
    /// Directory holding the reversible sqlx migration files.
    #[arg(long, default_value = "./migrations")]
    migrations_path: PathBuf,

    /// Revert applied migrations down to this version instead of applying pending ones.
    #[arg(long)]
    revert_to: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;

    let migrator = Migrator::new(args.migrations_path.as_path()).await?;

    match args.revert_to {
        Some(target) => {
            migrator.undo(&pool, target).await?;
            log::info!("reverted migrations down to version {target}");
        }
        None => {
            migrator.run(&pool).await?;
            log::info!(
                "migrations from {} applied",
                args.migrations_path.display()
            );
        }
    }

    pool.close().await;
    Ok(())
}

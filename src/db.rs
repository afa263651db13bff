use rocket_db_pools::{Database, sqlx};

static MIGRATOR: ::sqlx::migrate::Migrator = ::sqlx::migrate!("./migrations");

#[derive(Database)]
#[database("auth_db")]
pub struct AuthDb(sqlx::PgPool);

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), ::sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}

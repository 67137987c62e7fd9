use sqlx::sqlite::SqlitePoolOptions;

use crate::models::User;

/// Create a fresh ChatRepository backed by an in-memory SQLite database.
/// Each call returns an isolated database with all migrations applied.
pub async fn test_repository() -> super::ChatRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    crate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("Failed to enable foreign keys");

    super::ChatRepository::new(pool)
}

/// Create a user with password `password123`.
pub async fn seed_user(repo: &super::ChatRepository, email: &str, full_name: &str) -> User {
    repo.create_user(email, full_name, "password123")
        .await
        .expect("Failed to seed user")
}

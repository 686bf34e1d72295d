use sqlx::SqlitePool;

use crate::db::models::UserRow;

/// Insert a user. Used to seed the read model in tests and local setups.
pub async fn create_user(
    pool: &SqlitePool,
    id: &str,
    name: &str,
    email: Option<&str>,
    password_hash: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO users (id, name, email, password_hash) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .execute(pool)
        .await?;
    Ok(())
}

/// Get a user by ID, without secret columns.
pub async fn get_user(pool: &SqlitePool, user_id: &str) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>("SELECT id, name, email FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

use sqlx::SqlitePool;

use crate::db::models::StudyGroupRow;

/// Create a study group. The creator becomes its first member.
pub async fn create_group(
    pool: &SqlitePool,
    id: &str,
    name: &str,
    description: Option<&str>,
    creator_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO study_groups (id, name, description, creator_id) VALUES (?, ?, ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(description)
    .bind(creator_id)
    .execute(pool)
    .await?;

    add_member(pool, id, creator_id).await
}

/// Get a study group by ID.
pub async fn get_group(
    pool: &SqlitePool,
    group_id: &str,
) -> Result<Option<StudyGroupRow>, sqlx::Error> {
    sqlx::query_as::<_, StudyGroupRow>(
        "SELECT id, name, description, creator_id, created_at FROM study_groups WHERE id = ?",
    )
    .bind(group_id)
    .fetch_optional(pool)
    .await
}

/// List the user IDs that belong to a group.
pub async fn get_member_ids(pool: &SqlitePool, group_id: &str) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT user_id FROM study_group_members WHERE group_id = ? ORDER BY joined_at, user_id",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await
}

/// Add a user to a group. Adding an existing member is a no-op.
pub async fn add_member(pool: &SqlitePool, group_id: &str, user_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO study_group_members (group_id, user_id) VALUES (?, ?)")
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove a user from a group.
pub async fn remove_member(
    pool: &SqlitePool,
    group_id: &str,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM study_group_members WHERE group_id = ? AND user_id = ?")
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

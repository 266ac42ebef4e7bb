use sqlx::SqlitePool;

/// Cache budget given to a library when it is first registered: 50 GiB.
pub const DEFAULT_CACHE_BUDGET_BYTES: i64 = 50 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct LibraryRow {
    pub id: String,
    pub user_id: String,
    pub path: String,
    pub max_cache_bytes: i64,
    pub created_ts: i64,
    pub updated_ts: i64,
}

type LibraryTuple = (String, String, String, i64, i64, i64);

const LIBRARY_COLUMNS: &str = "id, user_id, path, max_cache_bytes, created_ts, updated_ts";

fn row_to_library(r: LibraryTuple) -> LibraryRow {
    LibraryRow {
        id: r.0,
        user_id: r.1,
        path: r.2,
        max_cache_bytes: r.3,
        created_ts: r.4,
        updated_ts: r.5,
    }
}

/// Return the library registered for `(user_id, path)`, creating it on first use.
pub async fn get_or_create_library(
    pool: &SqlitePool,
    user_id: &str,
    path: &str,
) -> Result<LibraryRow, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        "INSERT OR IGNORE INTO library (id, user_id, path, max_cache_bytes, created_ts, updated_ts) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(path)
    .bind(DEFAULT_CACHE_BUDGET_BYTES)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let row: LibraryTuple = sqlx::query_as(&format!(
        "SELECT {LIBRARY_COLUMNS} FROM library WHERE user_id = ? AND path = ?"
    ))
    .bind(user_id)
    .bind(path)
    .fetch_one(pool)
    .await?;

    Ok(row_to_library(row))
}

pub async fn get_library(
    pool: &SqlitePool,
    library_id: &str,
) -> Result<Option<LibraryRow>, sqlx::Error> {
    let row: Option<LibraryTuple> =
        sqlx::query_as(&format!("SELECT {LIBRARY_COLUMNS} FROM library WHERE id = ?"))
            .bind(library_id)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(row_to_library))
}

pub async fn find_library(
    pool: &SqlitePool,
    user_id: &str,
    path: &str,
) -> Result<Option<LibraryRow>, sqlx::Error> {
    let row: Option<LibraryTuple> = sqlx::query_as(&format!(
        "SELECT {LIBRARY_COLUMNS} FROM library WHERE user_id = ? AND path = ?"
    ))
    .bind(user_id)
    .bind(path)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(row_to_library))
}

pub async fn list_user_libraries(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<LibraryRow>, sqlx::Error> {
    let rows: Vec<LibraryTuple> = sqlx::query_as(&format!(
        "SELECT {LIBRARY_COLUMNS} FROM library WHERE user_id = ? ORDER BY path"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_library).collect())
}

/// Change a library's cache budget. Zero means unlimited.
pub async fn set_cache_budget(
    pool: &SqlitePool,
    library_id: &str,
    max_cache_bytes: i64,
) -> Result<bool, sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query("UPDATE library SET max_cache_bytes = ?, updated_ts = ? WHERE id = ?")
        .bind(max_cache_bytes)
        .bind(now)
        .bind(library_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        let pool = crate::connect(":memory:").await.unwrap();
        crate::migrate::run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn library_is_created_once_per_user_and_path() {
        let pool = pool().await;
        let a = get_or_create_library(&pool, "u1", "/media/movies").await.unwrap();
        let b = get_or_create_library(&pool, "u1", "/media/movies").await.unwrap();
        let c = get_or_create_library(&pool, "u2", "/media/movies").await.unwrap();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.max_cache_bytes, DEFAULT_CACHE_BUDGET_BYTES);
        assert_eq!(list_user_libraries(&pool, "u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn budget_can_be_changed() {
        let pool = pool().await;
        let lib = get_or_create_library(&pool, "u1", "/m").await.unwrap();
        assert!(set_cache_budget(&pool, &lib.id, 1000).await.unwrap());
        let lib = get_library(&pool, &lib.id).await.unwrap().unwrap();
        assert_eq!(lib.max_cache_bytes, 1000);
        assert!(!set_cache_budget(&pool, "missing", 1).await.unwrap());
    }
}

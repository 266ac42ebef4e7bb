use sqlx::SqlitePool;

use crate::now_ms;

#[derive(Debug, Clone)]
pub struct CacheItemRow {
    pub id: String,
    pub input_path: String,
    pub output_path: String,
    pub bytes: i64,
    pub profile: String,
    pub state: String,
    pub user_id: String,
    pub library_id: String,
    pub movie_id: String,
    pub created_ms: i64,
    pub last_accessed_ms: i64,
    pub access_seq: i64,
}

type CacheItemTuple = (
    String,
    String,
    String,
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
);

const CACHE_ITEM_COLUMNS: &str = "id, input_path, output_path, bytes, profile, state, user_id, \
     library_id, movie_id, created_ms, last_accessed_ms, access_seq";

fn row_to_item(r: CacheItemTuple) -> CacheItemRow {
    CacheItemRow {
        id: r.0,
        input_path: r.1,
        output_path: r.2,
        bytes: r.3,
        profile: r.4,
        state: r.5,
        user_id: r.6,
        library_id: r.7,
        movie_id: r.8,
        created_ms: r.9,
        last_accessed_ms: r.10,
        access_seq: r.11,
    }
}

#[derive(Debug, Clone)]
pub struct NewCacheItem<'a> {
    pub input_path: &'a str,
    pub output_path: &'a str,
    pub bytes: i64,
    pub profile: &'a str,
    pub user_id: &'a str,
    pub library_id: &'a str,
    pub movie_id: &'a str,
}

/// Insert a ledger row. Fails with a unique violation if the input or output
/// path is already recorded.
pub async fn insert_cache_item(
    pool: &SqlitePool,
    item: &NewCacheItem<'_>,
) -> Result<CacheItemRow, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_ms();

    let row: CacheItemTuple = sqlx::query_as(&format!(
        "INSERT INTO cache_item \
         (id, input_path, output_path, bytes, profile, state, user_id, library_id, movie_id, \
          created_ms, last_accessed_ms, access_seq) \
         VALUES (?, ?, ?, ?, ?, 'ready', ?, ?, ?, ?, ?, \
                 (SELECT COALESCE(MAX(access_seq), 0) + 1 FROM cache_item)) \
         RETURNING {CACHE_ITEM_COLUMNS}"
    ))
    .bind(&id)
    .bind(item.input_path)
    .bind(item.output_path)
    .bind(item.bytes)
    .bind(item.profile)
    .bind(item.user_id)
    .bind(item.library_id)
    .bind(item.movie_id)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row_to_item(row))
}

/// Refresh the access time of every ready row for a movie. Returns rows touched.
pub async fn touch(
    pool: &SqlitePool,
    user_id: &str,
    library_id: &str,
    movie_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE cache_item SET last_accessed_ms = ?, \
           access_seq = (SELECT COALESCE(MAX(access_seq), 0) + 1 FROM cache_item) \
         WHERE user_id = ? AND library_id = ? AND movie_id = ? AND state = 'ready'",
    )
    .bind(now_ms())
    .bind(user_id)
    .bind(library_id)
    .bind(movie_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Sum of bytes held by ready rows in a (library, user) scope.
pub async fn total_bytes(
    pool: &SqlitePool,
    library_id: &str,
    user_id: &str,
) -> Result<i64, sqlx::Error> {
    let (total,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(bytes), 0) FROM cache_item \
         WHERE library_id = ? AND user_id = ? AND state = 'ready'",
    )
    .bind(library_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(total)
}

/// The least recently accessed ready row in a (library, user) scope.
pub async fn oldest(
    pool: &SqlitePool,
    library_id: &str,
    user_id: &str,
) -> Result<Option<CacheItemRow>, sqlx::Error> {
    let row: Option<CacheItemTuple> = sqlx::query_as(&format!(
        "SELECT {CACHE_ITEM_COLUMNS} FROM cache_item \
         WHERE library_id = ? AND user_id = ? AND state = 'ready' \
         ORDER BY last_accessed_ms ASC, access_seq ASC LIMIT 1"
    ))
    .bind(library_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(row_to_item))
}

pub async fn find_by_input(
    pool: &SqlitePool,
    input_path: &str,
) -> Result<Option<CacheItemRow>, sqlx::Error> {
    let row: Option<CacheItemTuple> = sqlx::query_as(&format!(
        "SELECT {CACHE_ITEM_COLUMNS} FROM cache_item WHERE input_path = ?"
    ))
    .bind(input_path)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(row_to_item))
}

pub async fn set_state(pool: &SqlitePool, item_id: &str, state: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE cache_item SET state = ? WHERE id = ?")
        .bind(state)
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_by_state(
    pool: &SqlitePool,
    state: &str,
) -> Result<Vec<CacheItemRow>, sqlx::Error> {
    let rows: Vec<CacheItemTuple> = sqlx::query_as(&format!(
        "SELECT {CACHE_ITEM_COLUMNS} FROM cache_item WHERE state = ? ORDER BY access_seq"
    ))
    .bind(state)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_item).collect())
}

/// Rows whose output path starts with `prefix`, in any state.
pub async fn list_by_output_prefix(
    pool: &SqlitePool,
    prefix: &str,
) -> Result<Vec<CacheItemRow>, sqlx::Error> {
    let rows: Vec<CacheItemTuple> = sqlx::query_as(&format!(
        "SELECT {CACHE_ITEM_COLUMNS} FROM cache_item \
         WHERE substr(output_path, 1, length(?)) = ? ORDER BY access_seq"
    ))
    .bind(prefix)
    .bind(prefix)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_item).collect())
}

pub async fn delete_cache_item(pool: &SqlitePool, item_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM cache_item WHERE id = ?")
        .bind(item_id)
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

    fn item<'a>(input: &'a str, output: &'a str, movie: &'a str) -> NewCacheItem<'a> {
        NewCacheItem {
            input_path: input,
            output_path: output,
            bytes: 400,
            profile: "remux",
            user_id: "u1",
            library_id: "lib",
            movie_id: movie,
        }
    }

    #[tokio::test]
    async fn duplicate_input_is_a_unique_violation() {
        let pool = pool().await;
        insert_cache_item(&pool, &item("/a.mkv", "/c/a.mp4", "m1"))
            .await
            .unwrap();
        let err = insert_cache_item(&pool, &item("/a.mkv", "/c/other.mp4", "m1"))
            .await
            .unwrap_err();
        match err {
            sqlx::Error::Database(db) => assert!(db.is_unique_violation()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn output_prefix_matches_literally() {
        let pool = pool().await;
        insert_cache_item(&pool, &item("/m/a.mkv", "/m/.cache/remux/a.mp4", "m1"))
            .await
            .unwrap();
        insert_cache_item(&pool, &item("/m/b.avi", "/m/.cache/hls/b.m3u8", "m2"))
            .await
            .unwrap();
        insert_cache_item(&pool, &item("/m2/c.mkv", "/m2/.cache/remux/c.mp4", "m3"))
            .await
            .unwrap();
        insert_cache_item(&pool, &item("/m_/d.mkv", "/m_/.cache/remux/d.mp4", "m4"))
            .await
            .unwrap();

        let rows = list_by_output_prefix(&pool, "/m/.cache/").await.unwrap();
        let movies: Vec<_> = rows.iter().map(|r| r.movie_id.as_str()).collect();
        assert_eq!(movies, ["m1", "m2"]);
        let rows = list_by_output_prefix(&pool, "/m_/").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].movie_id, "m4");
        assert!(list_by_output_prefix(&pool, "/m%").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn touch_moves_item_to_the_back_of_the_lru_order() {
        let pool = pool().await;
        let a = insert_cache_item(&pool, &item("/a.mkv", "/c/a.mp4", "m1"))
            .await
            .unwrap();
        let b = insert_cache_item(&pool, &item("/b.mkv", "/c/b.mp4", "m2"))
            .await
            .unwrap();

        assert_eq!(oldest(&pool, "lib", "u1").await.unwrap().unwrap().id, a.id);
        assert_eq!(touch(&pool, "u1", "lib", "m1").await.unwrap(), 1);
        assert_eq!(oldest(&pool, "lib", "u1").await.unwrap().unwrap().id, b.id);
        assert_eq!(touch(&pool, "u1", "lib", "missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deleting_rows_leave_the_accounting() {
        let pool = pool().await;
        let a = insert_cache_item(&pool, &item("/a.mkv", "/c/a.mp4", "m1"))
            .await
            .unwrap();
        insert_cache_item(&pool, &item("/b.mkv", "/c/b.mp4", "m2"))
            .await
            .unwrap();
        assert_eq!(total_bytes(&pool, "lib", "u1").await.unwrap(), 800);

        assert!(set_state(&pool, &a.id, "deleting").await.unwrap());
        assert_eq!(total_bytes(&pool, "lib", "u1").await.unwrap(), 400);
        assert_ne!(oldest(&pool, "lib", "u1").await.unwrap().unwrap().id, a.id);
        assert_eq!(list_by_state(&pool, "deleting").await.unwrap().len(), 1);

        assert!(delete_cache_item(&pool, &a.id).await.unwrap());
        assert!(find_by_input(&pool, "/a.mkv").await.unwrap().is_none());
    }
}

use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct MovieRow {
    pub id: String,
    pub library_id: String,
    pub title: String,
    pub year: Option<i64>,
    pub folder_path: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub created_ts: i64,
    pub updated_ts: i64,
}

type MovieTuple = (
    String,
    String,
    String,
    Option<i64>,
    String,
    String,
    i64,
    i64,
    i64,
);

const MOVIE_COLUMNS: &str =
    "id, library_id, title, year, folder_path, file_path, size_bytes, created_ts, updated_ts";

fn row_to_movie(r: MovieTuple) -> MovieRow {
    MovieRow {
        id: r.0,
        library_id: r.1,
        title: r.2,
        year: r.3,
        folder_path: r.4,
        file_path: r.5,
        size_bytes: r.6,
        created_ts: r.7,
        updated_ts: r.8,
    }
}

/// Fields needed to record a discovered movie file.
#[derive(Debug, Clone)]
pub struct NewMovie<'a> {
    pub library_id: &'a str,
    pub title: &'a str,
    pub year: Option<i64>,
    pub folder_path: &'a str,
    pub file_path: &'a str,
    pub size_bytes: i64,
}

/// Insert a movie or refresh the size of an existing one.
/// Returns the row and whether it was newly created.
pub async fn upsert_movie(
    pool: &SqlitePool,
    movie: &NewMovie<'_>,
) -> Result<(MovieRow, bool), sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO movie \
         (id, library_id, title, year, folder_path, file_path, size_bytes, created_ts, updated_ts) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(movie.library_id)
    .bind(movie.title)
    .bind(movie.year)
    .bind(movie.folder_path)
    .bind(movie.file_path)
    .bind(movie.size_bytes)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?
    .rows_affected()
        > 0;

    if !inserted {
        sqlx::query(
            "UPDATE movie SET size_bytes = ?, updated_ts = ? WHERE library_id = ? AND file_path = ?",
        )
        .bind(movie.size_bytes)
        .bind(now)
        .bind(movie.library_id)
        .bind(movie.file_path)
        .execute(pool)
        .await?;
    }

    let row: MovieTuple = sqlx::query_as(&format!(
        "SELECT {MOVIE_COLUMNS} FROM movie WHERE library_id = ? AND file_path = ?"
    ))
    .bind(movie.library_id)
    .bind(movie.file_path)
    .fetch_one(pool)
    .await?;

    Ok((row_to_movie(row), inserted))
}

pub async fn get_movie(pool: &SqlitePool, movie_id: &str) -> Result<Option<MovieRow>, sqlx::Error> {
    let row: Option<MovieTuple> =
        sqlx::query_as(&format!("SELECT {MOVIE_COLUMNS} FROM movie WHERE id = ?"))
            .bind(movie_id)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(row_to_movie))
}

pub async fn list_library_movies(
    pool: &SqlitePool,
    library_id: &str,
) -> Result<Vec<MovieRow>, sqlx::Error> {
    let rows: Vec<MovieTuple> = sqlx::query_as(&format!(
        "SELECT {MOVIE_COLUMNS} FROM movie WHERE library_id = ? ORDER BY title"
    ))
    .bind(library_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_movie).collect())
}

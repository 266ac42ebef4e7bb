use sqlx::SqlitePool;

use crate::now_ms;

#[derive(Debug, Clone)]
pub struct JobRow {
    pub queue: String,
    pub id: String,
    pub input_path: String,
    pub output_path: String,
    pub library_id: String,
    pub user_id: String,
    pub movie_id: String,
    pub state: String,
    pub progress: i64,
    pub error: Option<String>,
    pub enqueued_ms: i64,
    pub started_ms: Option<i64>,
    pub finished_ms: Option<i64>,
    pub updated_ms: i64,
}

type JobTuple = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    Option<String>,
    i64,
    Option<i64>,
    Option<i64>,
    i64,
);

const JOB_COLUMNS: &str = "queue, id, input_path, output_path, library_id, user_id, movie_id, \
     state, progress, error, enqueued_ms, started_ms, finished_ms, updated_ms";

fn row_to_job(r: JobTuple) -> JobRow {
    JobRow {
        queue: r.0,
        id: r.1,
        input_path: r.2,
        output_path: r.3,
        library_id: r.4,
        user_id: r.5,
        movie_id: r.6,
        state: r.7,
        progress: r.8,
        error: r.9,
        enqueued_ms: r.10,
        started_ms: r.11,
        finished_ms: r.12,
        updated_ms: r.13,
    }
}

#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub queue: &'a str,
    pub id: &'a str,
    pub input_path: &'a str,
    pub output_path: &'a str,
    pub library_id: &'a str,
    pub user_id: &'a str,
    pub movie_id: &'a str,
}

/// Insert a waiting job, or revive a failed job with the same id.
///
/// Any other existing row is left untouched. Returns the current row and
/// whether this call created (or revived) it.
pub async fn enqueue(pool: &SqlitePool, job: &NewJob<'_>) -> Result<(JobRow, bool), sqlx::Error> {
    let now = now_ms();
    let result = sqlx::query(
        "INSERT INTO transcode_job \
         (queue, id, input_path, output_path, library_id, user_id, movie_id, state, progress, \
          error, enqueued_ms, started_ms, finished_ms, updated_ms) \
         VALUES (?, ?, ?, ?, ?, ?, ?, 'waiting', 0, NULL, ?, NULL, NULL, ?) \
         ON CONFLICT(queue, id) DO UPDATE SET \
           output_path = excluded.output_path, \
           library_id = excluded.library_id, \
           user_id = excluded.user_id, \
           movie_id = excluded.movie_id, \
           state = 'waiting', \
           progress = 0, \
           error = NULL, \
           enqueued_ms = excluded.enqueued_ms, \
           started_ms = NULL, \
           finished_ms = NULL, \
           updated_ms = excluded.updated_ms \
         WHERE transcode_job.state = 'failed'",
    )
    .bind(job.queue)
    .bind(job.id)
    .bind(job.input_path)
    .bind(job.output_path)
    .bind(job.library_id)
    .bind(job.user_id)
    .bind(job.movie_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let row = get_job(pool, job.queue, job.id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    Ok((row, result.rows_affected() > 0))
}

pub async fn get_job(
    pool: &SqlitePool,
    queue: &str,
    job_id: &str,
) -> Result<Option<JobRow>, sqlx::Error> {
    let row: Option<JobTuple> = sqlx::query_as(&format!(
        "SELECT {JOB_COLUMNS} FROM transcode_job WHERE queue = ? AND id = ?"
    ))
    .bind(queue)
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(row_to_job))
}

/// Atomically move the oldest waiting job of `queue` to `active`.
pub async fn claim_next(pool: &SqlitePool, queue: &str) -> Result<Option<JobRow>, sqlx::Error> {
    let now = now_ms();
    let row: Option<JobTuple> = sqlx::query_as(&format!(
        "UPDATE transcode_job SET state = 'active', started_ms = ?, updated_ms = ? \
         WHERE rowid = (SELECT rowid FROM transcode_job \
                        WHERE queue = ? AND state = 'waiting' \
                        ORDER BY enqueued_ms, rowid LIMIT 1) \
           AND state = 'waiting' \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(now)
    .bind(now)
    .bind(queue)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(row_to_job))
}

/// Record progress for an active job.
pub async fn update_progress(
    pool: &SqlitePool,
    queue: &str,
    job_id: &str,
    progress: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE transcode_job SET progress = ?, updated_ms = ? \
         WHERE queue = ? AND id = ? AND state = 'active'",
    )
    .bind(progress)
    .bind(now_ms())
    .bind(queue)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Move an active job to `completed` (progress 100) or `failed`.
pub async fn finish(
    pool: &SqlitePool,
    queue: &str,
    job_id: &str,
    state: &str,
    error: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let now = now_ms();
    let result = sqlx::query(
        "UPDATE transcode_job SET state = ?, error = ?, \
           progress = CASE WHEN ? = 'completed' THEN 100 ELSE progress END, \
           finished_ms = ?, updated_ms = ? \
         WHERE queue = ? AND id = ? AND state = 'active'",
    )
    .bind(state)
    .bind(error)
    .bind(state)
    .bind(now)
    .bind(now)
    .bind(queue)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_job(pool: &SqlitePool, queue: &str, job_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM transcode_job WHERE queue = ? AND id = ?")
        .bind(queue)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_user_jobs(
    pool: &SqlitePool,
    queue: &str,
    user_id: &str,
) -> Result<Vec<JobRow>, sqlx::Error> {
    let rows: Vec<JobTuple> = sqlx::query_as(&format!(
        "SELECT {JOB_COLUMNS} FROM transcode_job WHERE queue = ? AND user_id = ? \
         ORDER BY enqueued_ms DESC"
    ))
    .bind(queue)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_job).collect())
}

/// Put jobs left `active` by an interrupted process back to `waiting`.
pub async fn requeue_active(pool: &SqlitePool, queue: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE transcode_job SET state = 'waiting', progress = 0, started_ms = NULL, updated_ms = ? \
         WHERE queue = ? AND state = 'active'",
    )
    .bind(now_ms())
    .bind(queue)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Drop failed jobs that finished before `cutoff_ms`.
pub async fn delete_failed_before(
    pool: &SqlitePool,
    queue: &str,
    cutoff_ms: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM transcode_job WHERE queue = ? AND state = 'failed' AND finished_ms < ?",
    )
    .bind(queue)
    .bind(cutoff_ms)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

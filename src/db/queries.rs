use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::checkpoint::{Checkpoint, CheckpointStatus};
use crate::models::job::{Job, JobError, JobState, Progress};
use crate::models::mode::Mode;

fn decode_err<E>(e: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(e))
}

/// Insert or update a job snapshot together with its checkpoints.
pub async fn upsert_job(pool: &PgPool, job: &Job) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let error = job
        .error
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(decode_err)?;

    sqlx::query(
        r#"
        INSERT INTO orchestration_jobs
            (id, mode, state, progress_percent, progress_step, progress_status,
             input, result, error, revision, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id) DO UPDATE
        SET state = EXCLUDED.state,
            progress_percent = EXCLUDED.progress_percent,
            progress_step = EXCLUDED.progress_step,
            progress_status = EXCLUDED.progress_status,
            result = EXCLUDED.result,
            error = EXCLUDED.error,
            revision = EXCLUDED.revision,
            updated_at = EXCLUDED.updated_at
        WHERE orchestration_jobs.revision <= EXCLUDED.revision
        "#,
    )
    .bind(job.id)
    .bind(job.mode.to_string())
    .bind(job.state.to_string())
    .bind(i16::from(job.progress.percent))
    .bind(job.progress.step as i32)
    .bind(&job.progress.status)
    .bind(&job.input)
    .bind(&job.result)
    .bind(error)
    .bind(job.revision as i64)
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(&mut *tx)
    .await?;

    for checkpoint in &job.checkpoints {
        sqlx::query(
            r#"
            INSERT INTO orchestration_checkpoints
                (id, job_id, status, payload, response, created_at, resolved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                response = EXCLUDED.response,
                resolved_at = EXCLUDED.resolved_at
            "#,
        )
        .bind(checkpoint.id)
        .bind(checkpoint.job_id)
        .bind(checkpoint.status.to_string())
        .bind(&checkpoint.payload)
        .bind(&checkpoint.response)
        .bind(checkpoint.created_at)
        .bind(checkpoint.resolved_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

/// Get a job by ID, with its checkpoints in creation order.
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, mode, state, progress_percent, progress_step, progress_status,
               input, result, error, revision, created_at, updated_at
        FROM orchestration_jobs
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let checkpoints = sqlx::query(
        r#"
        SELECT id, job_id, status, payload, response, created_at, resolved_at
        FROM orchestration_checkpoints
        WHERE job_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(checkpoint_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    job_from_row(&row, checkpoints).map(Some)
}

/// Delete a job; its checkpoints go with it.
pub async fn delete_job(pool: &PgPool, job_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM orchestration_jobs WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

fn job_from_row(row: &PgRow, checkpoints: Vec<Checkpoint>) -> Result<Job, sqlx::Error> {
    let mode: String = row.try_get("mode")?;
    let state: String = row.try_get("state")?;
    let percent: i16 = row.try_get("progress_percent")?;
    let step: i32 = row.try_get("progress_step")?;
    let revision: i64 = row.try_get("revision")?;
    let error: Option<serde_json::Value> = row.try_get("error")?;
    let error: Option<JobError> = error
        .map(serde_json::from_value)
        .transpose()
        .map_err(decode_err)?;

    Ok(Job {
        id: row.try_get("id")?,
        mode: Mode::from_str(&mode).map_err(decode_err)?,
        state: JobState::from_str(&state).map_err(decode_err)?,
        progress: Progress {
            percent: percent.clamp(0, 100) as u8,
            step: step.max(0) as u32,
            status: row.try_get("progress_status")?,
        },
        input: row.try_get("input")?,
        result: row.try_get("result")?,
        error,
        checkpoints,
        revision: revision.max(0) as u64,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn checkpoint_from_row(row: &PgRow) -> Result<Checkpoint, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Checkpoint {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        status: CheckpointStatus::from_str(&status).map_err(decode_err)?,
        payload: row.try_get("payload")?,
        response: row.try_get("response")?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

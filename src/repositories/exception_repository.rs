use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::ExceptionStore;
use crate::models::{ResolveOutcome, TripException};
use crate::utils::errors::AppResult;

pub struct PgExceptionRepository {
    pool: PgPool,
}

impl PgExceptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExceptionStore for PgExceptionRepository {
    async fn insert_exception(&self, exception: TripException) -> AppResult<TripException> {
        let stored = sqlx::query_as::<_, TripException>(
            r#"
            INSERT INTO trip_exceptions (id, trip_id, exception_type, severity, message, resolved, resolved_at, created_at)
            VALUES ($1, $2, $3, $4, $5, FALSE, NULL, $6)
            RETURNING *
            "#,
        )
        .bind(exception.id)
        .bind(exception.trip_id)
        .bind(exception.exception_type)
        .bind(exception.severity)
        .bind(&exception.message)
        .bind(exception.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn find_exception(&self, id: Uuid) -> AppResult<Option<TripException>> {
        let exception =
            sqlx::query_as::<_, TripException>("SELECT * FROM trip_exceptions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(exception)
    }

    async fn resolve_exception(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<ResolveOutcome>> {
        let resolved = sqlx::query_as::<_, TripException>(
            r#"
            UPDATE trip_exceptions
            SET resolved = TRUE, resolved_at = $2
            WHERE id = $1 AND resolved = FALSE
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(exception) = resolved {
            return Ok(Some(ResolveOutcome {
                exception,
                newly_resolved: true,
            }));
        }

        // Ya resuelta (idempotente) o inexistente
        Ok(self.find_exception(id).await?.map(|exception| ResolveOutcome {
            exception,
            newly_resolved: false,
        }))
    }

    async fn active_for_trip(&self, trip_id: Uuid) -> AppResult<Vec<TripException>> {
        let exceptions = sqlx::query_as::<_, TripException>(
            r#"
            SELECT * FROM trip_exceptions
            WHERE trip_id = $1 AND resolved = FALSE
            ORDER BY created_at DESC
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(exceptions)
    }

    async fn active_for_trips(&self, trip_ids: &[Uuid]) -> AppResult<Vec<TripException>> {
        if trip_ids.is_empty() {
            return Ok(Vec::new());
        }

        let exceptions = sqlx::query_as::<_, TripException>(
            r#"
            SELECT * FROM trip_exceptions
            WHERE trip_id = ANY($1) AND resolved = FALSE
            ORDER BY created_at DESC
            "#,
        )
        .bind(trip_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(exceptions)
    }
}

//! Monotonic per-scope counters used for human-readable document codes.

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};

use crate::entities::sequence;
use crate::errors::ServiceError;

/// Increments and returns the counter for `scope`, creating it at 1.
///
/// Run inside the caller's transaction so a rolled-back operation does not
/// consume a value.
pub async fn next_value<C: ConnectionTrait>(conn: &C, scope: &str) -> Result<i64, ServiceError> {
    let updated = sequence::Entity::update_many()
        .col_expr(
            sequence::Column::LastValue,
            Expr::col(sequence::Column::LastValue).add(1),
        )
        .col_expr(sequence::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(sequence::Column::Scope.eq(scope))
        .exec(conn)
        .await?;

    if updated.rows_affected == 0 {
        create_counter(conn, scope).await?;
        return Ok(1);
    }

    let current = sequence::Entity::find_by_id(scope.to_string())
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("sequence {} not found", scope)))?;
    Ok(current.last_value)
}

/// Inserts the counter for `scope` at 1. Losing the race to another
/// creator is reported as a retryable conflict.
async fn create_counter<C: ConnectionTrait>(conn: &C, scope: &str) -> Result<(), ServiceError> {
    sequence::ActiveModel {
        scope: Set(scope.to_string()),
        last_value: Set(1),
        updated_at: Set(Utc::now()),
    }
    .insert(conn)
    .await
    .map_err(|e| {
        if super::is_unique_violation(&e) {
            counter!("procura_db.write_conflicts", 1);
            ServiceError::SequenceConflict(scope.to_string())
        } else {
            ServiceError::db_error(e)
        }
    })?;
    Ok(())
}

/// Formats a document code such as `OC-ENG-000042`.
pub fn format_code(prefix: &str, department: Option<&str>, value: i64) -> String {
    match department {
        Some(dept) => format!("{}-{}-{:06}", prefix, dept, value),
        None => format!("{}-{:06}", prefix, value),
    }
}

//! Database query functions for the `plans` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{ModelId, Plan, PlanSummary, PlannedTask};

/// Columns selected for [`PlanSummary`] rows.
const SUMMARY_COLUMNS: &str =
    "id, goal, model_used, jsonb_array_length(plan_json) AS task_count, created_at";

/// Fields supplied by the caller when saving a plan. The store assigns the
/// id and creation timestamp.
#[derive(Debug, Clone, Copy)]
pub struct NewPlan<'a> {
    pub goal: &'a str,
    pub model_used: ModelId,
    pub tasks: &'a [PlannedTask],
}

/// Insert a new plan row. Returns the inserted plan with server-generated
/// defaults (id, created_at).
pub async fn insert_plan(pool: &PgPool, new: &NewPlan<'_>) -> Result<Plan> {
    let plan = sqlx::query_as::<_, Plan>(
        "INSERT INTO plans (goal, model_used, plan_json) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(new.goal)
    .bind(new.model_used)
    .bind(Json(new.tasks))
    .fetch_one(pool)
    .await
    .context("failed to insert plan")?;

    Ok(plan)
}

/// Fetch a plan by its ID.
pub async fn get_plan(pool: &PgPool, id: Uuid) -> Result<Option<Plan>> {
    let plan = sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch plan")?;

    Ok(plan)
}

/// List the most recent plans, newest first.
pub async fn list_recent_plans(pool: &PgPool, limit: i64) -> Result<Vec<PlanSummary>> {
    let query = format!(
        "SELECT {SUMMARY_COLUMNS} FROM plans \
         ORDER BY created_at DESC, id DESC \
         LIMIT $1"
    );
    let plans = sqlx::query_as::<_, PlanSummary>(&query)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("failed to list plans")?;

    Ok(plans)
}

/// Find plans whose goal contains `keyword`, ignoring case. Newest first.
///
/// The keyword is matched literally: `%`, `_` and `\` carry no pattern
/// meaning.
pub async fn search_plans(pool: &PgPool, keyword: &str) -> Result<Vec<PlanSummary>> {
    let query = format!(
        "SELECT {SUMMARY_COLUMNS} FROM plans \
         WHERE goal ILIKE $1 ESCAPE '\\' \
         ORDER BY created_at DESC, id DESC"
    );
    let pattern = format!("%{}%", escape_like(keyword));
    let plans = sqlx::query_as::<_, PlanSummary>(&query)
        .bind(pattern)
        .fetch_all(pool)
        .await
        .context("failed to search plans")?;

    Ok(plans)
}

/// Delete a plan. Returns `false` when no plan had that ID.
pub async fn delete_plan(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM plans WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete plan")?;

    Ok(result.rows_affected() > 0)
}

/// Total number of stored plans.
pub async fn count_plans(pool: &PgPool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM plans")
        .fetch_one(pool)
        .await
        .context("failed to count plans")?;

    Ok(count)
}

/// Escape `LIKE` metacharacters so `input` matches only itself.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

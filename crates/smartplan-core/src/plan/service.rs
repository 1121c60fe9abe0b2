//! Plan service layer.
//!
//! Runs the generation pipeline (prompt -> model -> normalize) and wraps the
//! plan store queries with the user-facing error taxonomy. A plan is only
//! written after it has been fully validated.

use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use smartplan_db::models::{ModelId, Plan, PlanSummary, PlannedTask};
use smartplan_db::queries::plans::{self as plan_queries, NewPlan};

use super::normalize::normalize_response;
use super::prompt::build_request;
use crate::error::{PlanError, truncate_output};
use crate::gateway::ModelGateway;

/// Number of plans shown when the caller does not ask for a specific count.
pub const DEFAULT_LIST_LIMIT: i64 = 20;

/// Largest listing the store will be asked for.
pub const MAX_LIST_LIMIT: i64 = 100;

/// A validated plan that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDraft {
    pub goal: String,
    pub model: ModelId,
    pub tasks: Vec<PlannedTask>,
}

/// Ask the model for a plan and validate the answer.
pub async fn generate_plan(
    gateway: &dyn ModelGateway,
    goal: &str,
    model: ModelId,
) -> Result<PlanDraft, PlanError> {
    let request = build_request(goal, model)?;

    info!(model = %model, gateway = gateway.name(), "requesting plan from model");
    let raw = gateway.generate(&request).await?;
    debug!(output = %truncate_output(&raw), "raw model output");

    let tasks = normalize_response(&raw).map_err(|e| {
        warn!(model = %model, error = %e, "model output rejected");
        PlanError::malformed(e, &raw)
    })?;

    Ok(PlanDraft {
        goal: goal.trim().to_string(),
        model,
        tasks,
    })
}

/// Persist a validated plan.
pub async fn save_plan(pool: &PgPool, draft: &PlanDraft) -> Result<Plan, PlanError> {
    let plan = plan_queries::insert_plan(
        pool,
        &NewPlan {
            goal: &draft.goal,
            model_used: draft.model,
            tasks: &draft.tasks,
        },
    )
    .await
    .map_err(PlanError::store)?;

    info!(plan_id = %plan.id, tasks = draft.tasks.len(), "plan saved");
    Ok(plan)
}

/// Generate a plan and persist it. Nothing is written if any step fails.
pub async fn generate_and_save(
    pool: &PgPool,
    gateway: &dyn ModelGateway,
    goal: &str,
    model: ModelId,
) -> Result<Plan, PlanError> {
    let draft = generate_plan(gateway, goal, model).await?;
    save_plan(pool, &draft).await
}

/// Clamp a requested listing size to `1..=MAX_LIST_LIMIT`.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT)
}

/// Most recent plans, newest first.
pub async fn recent_plans(pool: &PgPool, limit: Option<i64>) -> Result<Vec<PlanSummary>, PlanError> {
    plan_queries::list_recent_plans(pool, clamp_limit(limit))
        .await
        .map_err(PlanError::store)
}

/// Plans whose goal contains `keyword`, ignoring case.
pub async fn search_plans(pool: &PgPool, keyword: &str) -> Result<Vec<PlanSummary>, PlanError> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Err(PlanError::InvalidInput(
            "search keyword cannot be empty".to_string(),
        ));
    }
    if keyword.contains('\0') {
        return Err(PlanError::InvalidInput(
            "search keyword cannot contain NUL characters".to_string(),
        ));
    }
    plan_queries::search_plans(pool, keyword)
        .await
        .map_err(PlanError::store)
}

/// Fetch one plan.
pub async fn get_plan(pool: &PgPool, id: Uuid) -> Result<Option<Plan>, PlanError> {
    plan_queries::get_plan(pool, id)
        .await
        .map_err(PlanError::store)
}

/// Delete one plan. Returns `false` when it did not exist.
pub async fn delete_plan(pool: &PgPool, id: Uuid) -> Result<bool, PlanError> {
    let deleted = plan_queries::delete_plan(pool, id)
        .await
        .map_err(PlanError::store)?;
    if deleted {
        info!(plan_id = %id, "plan deleted");
    }
    Ok(deleted)
}

//! CLI handlers for plan commands.
//!
//! Implements:
//! - `smartplan generate <goal>`   -- ask the model for a plan and save it
//! - `smartplan list`              -- recent plans, newest first
//! - `smartplan search <keyword>`  -- plans whose goal contains a keyword
//! - `smartplan show <plan-id>`    -- one plan as a dependency-ordered timeline
//! - `smartplan delete <plan-id>`  -- remove a plan

use std::fmt::Write as _;

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use smartplan_core::PlanError;
use smartplan_core::gateway::ModelGateway;
use smartplan_core::plan::{self, Timeline};
use smartplan_db::models::{ModelId, Plan, PlanSummary};

// -----------------------------------------------------------------------
// smartplan generate <goal>
// -----------------------------------------------------------------------

/// Generate a plan for `goal`, persist it, and print its timeline.
pub async fn cmd_generate(
    pool: &PgPool,
    gateway: &dyn ModelGateway,
    goal: &str,
    model: ModelId,
    json: bool,
) -> Result<()> {
    let saved = match plan::generate_and_save(pool, gateway, goal, model).await {
        Ok(saved) => saved,
        Err(err) => {
            if let Some(note) = raw_output_note(&err) {
                eprint!("{note}");
            }
            return Err(err.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&saved)?);
    } else {
        println!("Plan created.");
        println!();
        print!("{}", render_plan(&saved)?);
    }
    Ok(())
}

// -----------------------------------------------------------------------
// smartplan list / search
// -----------------------------------------------------------------------

pub async fn cmd_list(pool: &PgPool, limit: Option<i64>) -> Result<()> {
    let plans = plan::recent_plans(pool, limit).await?;
    if plans.is_empty() {
        println!("No plans found. Use `smartplan generate <goal>` to create one.");
        return Ok(());
    }
    print!("{}", render_summaries(&plans)?);
    Ok(())
}

pub async fn cmd_search(pool: &PgPool, keyword: &str) -> Result<()> {
    let plans = plan::search_plans(pool, keyword).await?;
    if plans.is_empty() {
        println!("No plans match {:?}.", keyword.trim());
        return Ok(());
    }
    print!("{}", render_summaries(&plans)?);
    Ok(())
}

// -----------------------------------------------------------------------
// smartplan show / delete
// -----------------------------------------------------------------------

fn parse_plan_id(plan_id_str: &str) -> Result<Uuid> {
    plan_id_str
        .parse()
        .with_context(|| format!("invalid plan ID: {:?}", plan_id_str))
}

pub async fn cmd_show(pool: &PgPool, plan_id_str: &str, json: bool) -> Result<()> {
    let plan_id = parse_plan_id(plan_id_str)?;
    let found = plan::get_plan(pool, plan_id)
        .await?
        .with_context(|| format!("plan {plan_id} not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    } else {
        print!("{}", render_plan(&found)?);
    }
    Ok(())
}

pub async fn cmd_delete(pool: &PgPool, plan_id_str: &str) -> Result<()> {
    let plan_id = parse_plan_id(plan_id_str)?;
    if !plan::delete_plan(pool, plan_id).await? {
        anyhow::bail!("plan {plan_id} not found");
    }
    println!("Plan {plan_id} deleted.");
    Ok(())
}

// -----------------------------------------------------------------------
// Rendering
// -----------------------------------------------------------------------

/// The model's own words when its answer could not be used as a plan.
fn raw_output_note(err: &PlanError) -> Option<String> {
    let raw = err.raw_output()?;
    Some(format!("Raw model output:\n{raw}\n\n"))
}

/// Day counts rounded to two decimals; whole numbers print without a
/// fractional part.
pub fn fmt_days(days: f64) -> String {
    let rounded = (days * 100.0).round() / 100.0;
    format!("{rounded}")
}

/// Table of plan summaries.
///
/// The render helpers build a `String` instead of printing so their layout
/// can be asserted in tests.
pub fn render_summaries(plans: &[PlanSummary]) -> Result<String> {
    // ID is always 36 chars (UUID).
    let id_w = 36;
    let model_w = ModelId::ALL
        .iter()
        .map(|m| m.as_str().len())
        .max()
        .unwrap_or(5);
    let tasks_w = 5;

    let mut out = String::new();
    writeln!(
        out,
        "{:<id_w$}  {:<16}  {:<model_w$}  {:>tasks_w$}  GOAL",
        "ID", "CREATED", "MODEL", "TASKS",
    )?;
    for p in plans {
        writeln!(
            out,
            "{:<id_w$}  {:<16}  {:<model_w$}  {:>tasks_w$}  {}",
            p.id,
            p.created_at.format("%Y-%m-%d %H:%M"),
            p.model_used.as_str(),
            p.task_count,
            p.goal,
        )?;
    }
    Ok(out)
}

/// Plan header followed by its timeline table.
pub fn render_plan(saved: &Plan) -> Result<String> {
    let timeline = plan::timeline(&saved.tasks.0)
        .with_context(|| format!("stored plan {} has an invalid task graph", saved.id))?;

    let mut out = String::new();
    writeln!(out, "Plan: {}", saved.goal)?;
    writeln!(out, "  ID:             {}", saved.id)?;
    writeln!(out, "  Model:          {}", saved.model_used)?;
    writeln!(
        out,
        "  Created:        {}",
        saved.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(out, "  Tasks:          {}", saved.tasks.0.len())?;
    writeln!(
        out,
        "  Critical path:  {} days",
        fmt_days(timeline.critical_path_days)
    )?;
    writeln!(
        out,
        "  Sequential:     {} days",
        fmt_days(timeline.sequential_days)
    )?;
    writeln!(out)?;
    out.push_str(&render_timeline(&timeline)?);
    Ok(out)
}

fn render_timeline(timeline: &Timeline<'_>) -> Result<String> {
    let id_w = timeline
        .tasks
        .iter()
        .map(|s| s.task.id.len())
        .max()
        .unwrap_or(2)
        .max(2);
    let title_w = timeline
        .tasks
        .iter()
        .map(|s| s.task.title.chars().count())
        .max()
        .unwrap_or(5)
        .clamp(5, 48);

    let mut out = String::new();
    writeln!(
        out,
        "   {:<id_w$}  {:<title_w$}  {:>6}  {:>6}  {:>6}  DEPENDS ON",
        "ID", "TITLE", "DAYS", "START", "FINISH",
    )?;
    for s in &timeline.tasks {
        let marker = if s.critical { '*' } else { ' ' };
        let deps = if s.task.depends_on.is_empty() {
            "-".to_string()
        } else {
            s.task.depends_on.join(", ")
        };
        writeln!(
            out,
            " {marker} {:<id_w$}  {:<title_w$}  {:>6}  {:>6}  {:>6}  {deps}",
            s.task.id,
            s.task.title,
            fmt_days(s.task.duration_days),
            fmt_days(s.start_day),
            fmt_days(s.finish_day),
        )?;
    }
    writeln!(out)?;
    writeln!(out, "   * on the critical path")?;
    Ok(out)
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

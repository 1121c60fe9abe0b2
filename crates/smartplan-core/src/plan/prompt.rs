//! Prompt construction for plan generation.
//!
//! Pure logic: turns a goal and a model selection into a [`ModelRequest`].

use smartplan_db::models::ModelId;

use crate::error::PlanError;
use crate::gateway::ModelRequest;

/// JSON shape the model must produce.
const OUTPUT_SCHEMA: &str = r#"## Output Format

Respond with a JSON array of task objects and nothing else: no prose, no
Markdown, no code fences, no wrapping object.

```json
[
  {
    "id": "t1",
    "title": "Short actionable title",
    "duration_days": 2,
    "depends_on": [],
    "description": "One or two sentences on what the task involves"
  },
  {
    "id": "t2",
    "title": "Another task",
    "duration_days": 3,
    "depends_on": ["t1"]
  }
]
```

Field rules:
- `id` (string, REQUIRED): unique within the plan, e.g. "t1", "t2", ...
- `title` (string, REQUIRED): short imperative phrase.
- `duration_days` (number, REQUIRED): estimated working days, greater than 0.
- `depends_on` (array of ids, REQUIRED, may be empty): tasks that must finish
  before this one starts. Only reference ids declared in the same array.
  Never list a task's own id. Dependencies must not form a cycle.
- `description` (string, optional): brief explanation.
"#;

/// Planning guidance appended after the schema.
const PLANNING_GUIDELINES: &str = r#"## Planning Guidelines

1. Break the goal into concrete, verifiable tasks (typically 4-15).
2. List tasks in a sensible execution order.
3. Only add a dependency when the later task genuinely needs the earlier one
   finished; independent tasks may run in parallel.
4. Estimate durations realistically for one person or a small team.
"#;

/// Build the system instructions sent with every plan request.
pub fn build_system_prompt() -> String {
    let mut prompt = String::with_capacity(2048);
    prompt.push_str(
        "You are an expert project manager. Decompose the user's goal into a \
         dependency-ordered list of tasks with duration estimates.\n\n",
    );
    prompt.push_str("Output MUST be valid JSON only.\n\n");
    prompt.push_str(OUTPUT_SCHEMA);
    prompt.push('\n');
    prompt.push_str(PLANNING_GUIDELINES);
    prompt
}

/// Build the user turn carrying the goal.
fn build_user_prompt(goal: &str) -> String {
    format!(
        "The user's goal is:\n\n{goal}\n\n\
         Return the plan as a JSON array of task objects."
    )
}

/// Build a model request for `goal`.
///
/// Fails with [`PlanError::InvalidInput`] when the goal is empty, only
/// whitespace, or holds a NUL character. Surrounding whitespace is trimmed; the rest is passed through
/// verbatim.
pub fn build_request(goal: &str, model: ModelId) -> Result<ModelRequest, PlanError> {
    let goal = goal.trim();
    if goal.is_empty() {
        return Err(PlanError::InvalidInput("goal cannot be empty".to_string()));
    }
    if goal.contains('\0') {
        return Err(PlanError::InvalidInput(
            "goal cannot contain NUL characters".to_string(),
        ));
    }

    Ok(ModelRequest {
        model,
        system: build_system_prompt(),
        user: build_user_prompt(goal),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_contains_literal_goal_for_every_model() {
        for model in ModelId::ALL {
            let req = build_request("Launch a podcast", model).unwrap();
            assert_eq!(req.model, model);
            assert!(req.user.contains("Launch a podcast"));
            assert!(req.system.contains("JSON"));
        }
    }

    #[test]
    fn system_prompt_names_every_field() {
        let prompt = build_system_prompt();
        for field in ["\"id\"", "\"title\"", "\"duration_days\"", "\"depends_on\""] {
            assert!(prompt.contains(field), "missing {field}");
        }
        assert!(prompt.contains("JSON array"));
        assert!(prompt.contains("no code fences"));
    }

    #[test]
    fn goal_is_not_rewritten() {
        let goal = "Ship v2 \"Falcon\" {beta} by Q3 -- 100% test coverage";
        let req = build_request(goal, ModelId::default()).unwrap();
        assert!(req.user.contains(goal));
    }

    #[test]
    fn goal_surrounding_whitespace_trimmed() {
        let req = build_request("  \n Learn Rust \t", ModelId::default()).unwrap();
        assert!(req.user.contains("\n\nLearn Rust\n\n"));
    }

    #[test]
    fn rejects_empty_goal() {
        let err = build_request("", ModelId::default()).unwrap_err();
        assert!(matches!(err, PlanError::InvalidInput(_)));
    }

    #[test]
    fn rejects_whitespace_goal() {
        let err = build_request(" \t\n ", ModelId::Gemini20Flash).unwrap_err();
        assert!(matches!(err, PlanError::InvalidInput(_)));
    }

    #[test]
    fn rejects_goal_with_nul() {
        let err = build_request("Launch a\0podcast", ModelId::default()).unwrap_err();
        assert!(matches!(err, PlanError::InvalidInput(ref m) if m.contains("NUL")));
    }
}

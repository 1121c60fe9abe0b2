//! Plan pipeline: prompt construction, response normalization, dependency
//! graph, and the service layer tying them to the model and the store.

pub mod graph;
pub mod normalize;
pub mod prompt;
pub mod service;

pub use graph::{ScheduledTask, TaskGraph, Timeline, timeline};
pub use normalize::{NormalizeError, normalize_response};
pub use prompt::{build_request, build_system_prompt};
pub use service::{
    DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT, PlanDraft, clamp_limit, delete_plan, generate_and_save,
    generate_plan, get_plan, recent_plans, save_plan, search_plans,
};

//! Weekly capacity projection and earliest-week search

pub mod engine;
pub mod selector;

pub use engine::{
    compute_projection, CapacityEngine, CapacityInputs, CapacityProjection, EngineConfig,
    FortnightSummary, OooState, WeekRow,
};
pub use selector::{earliest_available_week, utilisation_ratio, SelectorConfig, BUFFER_WEEKS};

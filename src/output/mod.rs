pub mod dockerfile;
pub mod schema;

pub use schema::{
    BuildPlan, BuildReport, DependencyPlan, LaunchPlan, PlacementPlan, BASE_LABEL,
    FINGERPRINT_LABEL, PLAN_VERSION,
};

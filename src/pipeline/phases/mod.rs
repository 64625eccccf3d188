// Pipeline phases, one per stage, run strictly in order.
//
// Base Selection, Dependency Materialization, Artifact Placement and Process
// Launch each produce one result on the build context; assembly combines them
// into the plan and the build context archive, and the image phase hands that
// to the container engine.

#[path = "01_base.rs"]
pub mod base;
#[path = "02_dependencies.rs"]
pub mod dependencies;
#[path = "03_placement.rs"]
pub mod placement;
#[path = "04_launch.rs"]
pub mod launch;
#[path = "05_assemble.rs"]
pub mod assemble;
#[path = "06_image.rs"]
pub mod image;

//! Project model, frame rendering and the orchestrator driving a whole export.

pub(crate) mod orchestrator;
pub(crate) mod project;
pub(crate) mod render;

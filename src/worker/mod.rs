//! Background workers and the message protocol connecting them to the orchestrator.

pub(crate) mod audio;
pub(crate) mod protocol;
pub(crate) mod supervisor;
pub(crate) mod video;

#[cfg(test)]
#[path = "../../tests/unit/worker/fake.rs"]
pub(crate) mod fake;

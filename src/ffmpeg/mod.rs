//! Shared plumbing for driving the system `ffmpeg` binary.

pub(crate) mod caps;
pub(crate) mod process;

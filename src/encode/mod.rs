//! Encoders and the elementary-stream parsing that turns their output into MP4 samples.

pub(crate) mod adts;
pub(crate) mod annexb;
pub(crate) mod backend;
pub(crate) mod chunk;
pub(crate) mod config;
pub(crate) mod ffmpeg;
pub(crate) mod frame;

//! Audio mixing: fetch, decode and sum audio sources into one planar buffer.

pub(crate) mod buffer;
pub(crate) mod decode;
pub(crate) mod mix;
pub(crate) mod source;

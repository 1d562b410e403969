//! ISO BMFF (MP4) container writing and inspection.

pub(crate) mod boxes;
pub(crate) mod inspect;
pub(crate) mod mp4;

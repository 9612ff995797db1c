//! Serialization of regions: the tag container format, the on-disk region store and
//! the composable section codecs.

pub mod tag;
pub mod store;
pub mod section;

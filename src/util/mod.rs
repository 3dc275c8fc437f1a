//! Small shared helpers.

pub(crate) mod sync;

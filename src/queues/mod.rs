//! Batch processing and the results it produces.

pub mod batch;
pub mod run;
pub mod work;

//! A small deterministic pixel game for driving the learner end to end.

pub use self::{catch::*, stats::*};

mod catch;
mod stats;

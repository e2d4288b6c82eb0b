//! Change scanner: project walker, tracking rules, bounded hashing, two-phase detection.

pub mod changes;
pub mod hasher;
pub mod rules;
pub mod walker;

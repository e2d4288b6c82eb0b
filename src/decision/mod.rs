//! Build decision engine: change-set classification and strategy selection.

pub mod engine;
pub mod strategy;

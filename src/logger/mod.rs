//! Activity logging: append-only JSONL records of scans, decisions and commits.

pub mod jsonl;

//! Grading pipeline services

pub mod duplicate_ledger;
pub mod identity_tracker;
pub mod image_hasher;
pub mod leaderboard;
pub mod moderation;
pub mod publish_scheduler;
pub mod report_renderer;
pub mod specimen_store;
pub mod submission_pipeline;
pub mod vision_oracle;

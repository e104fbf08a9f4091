pub mod archive;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod eligibility;
pub mod template;

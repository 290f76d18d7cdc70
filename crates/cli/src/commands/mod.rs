pub mod config_cmd;
pub mod events;
pub mod personalized;
pub mod query;
pub mod status;

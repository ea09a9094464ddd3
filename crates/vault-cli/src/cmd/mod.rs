pub mod audit;
pub mod config;
pub mod deploy;
pub mod host;
pub mod init;
pub mod key;
pub mod status;
pub mod sync_config;

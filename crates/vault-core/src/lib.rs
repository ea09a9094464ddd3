pub mod audit;
pub mod config;
pub mod config_sync;
pub mod error;
pub mod host_ops;
pub mod inventory;
pub mod io;
pub mod key_ops;
pub mod paths;
pub mod pubkey;
pub mod runner;
pub mod types;

#[cfg(test)]
mod testutil;

pub use error::{Result, VaultError};
pub use inventory::{Inventory, InventoryManager};

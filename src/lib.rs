pub mod cli;
pub mod commands;
pub mod config;
pub mod device;
pub mod serial;
pub mod transfer;

pub use config::TransferConfig;
pub use device::DeviceManager;
pub use transfer::{Transfer, TransferError, TransferStatus};

//! Configuration management
//!
//! Where the ledger keeps its database and wallet file, and how hard blocks
//! are to mine.

pub mod settings;

pub use settings::{Config, CONFIG_FILE, GLOBAL_CONFIG};

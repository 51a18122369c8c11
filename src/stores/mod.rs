//! Entry store implementations.

pub mod memory;
pub mod moka;

pub use memory::HashMapStore;
pub use moka::{MokaStore, MokaStoreConfig};

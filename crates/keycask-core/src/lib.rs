//! Core contracts for keycask: the single-secret slot abstraction and the
//! total-result facade handed to host bridges.
//! This crate is intentionally small; cryptography and files live in `keycask-storage`.

pub mod manager;
pub mod slot;

pub use manager::KeyStoreManager;
pub use slot::{InMemorySecretSlot, SecretBytes, SecretSlot, SlotError};

/// Device-local key/value persistence.
pub mod kv;
/// Remote mirror abstraction and its backends.
pub mod mirror;
/// Progress records and identifiers shared across layers.
pub mod models;
/// Per-game progress persisted on this device.
pub mod progress_store;
/// Recently played games.
pub mod recent;
/// Device-local preferences.
pub mod settings_store;
/// Error surface shared by remote mirror backends.
pub mod storage;

/// Database model definitions.
pub mod models;
/// Session, config, registration and press persistence.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;

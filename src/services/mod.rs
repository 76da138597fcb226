/// OpenAPI document of the HTTP API.
pub mod documentation;
/// Health reporting.
pub mod health_service;
/// Restoring sessions from the store.
pub mod recovery;
/// Session lifecycle operations.
pub mod session_service;
/// Server-sent event streams.
pub mod sse_service;
/// Background supervision of the storage connection.
pub mod storage_supervisor;
/// Button WebSocket clients.
pub mod websocket_service;

/// Account actions driving the identity provider.
pub mod account_service;
/// Advisory account status text.
pub mod account_status;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Progress reads, writes and the recently played list.
pub mod progress_service;
/// Last-writer-wins reconciliation against the remote mirror.
pub mod reconciler;
/// Device-local preferences.
pub mod settings_service;
/// Server-Sent Events streaming service.
pub mod sse_service;
/// Remote mirror connection supervisor.
pub mod storage_supervisor;
/// Per-slug debounce of remote writes.
pub mod write_scheduler;

/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Player registry, statistics and leaderboard use-cases.
pub mod player_service;
/// Race session use-cases and result persistence.
pub mod race_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Score store connection supervisor.
pub mod storage_supervisor;
/// Idempotent hand-off of finalized results.
pub mod submission_gate;
/// Trigger pad WebSocket handling.
pub mod websocket_service;

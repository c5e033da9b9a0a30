//! Chat relay: session persistence, transcript relay and reply streaming.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, start-up, shutdown)    │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState, SSE)    │
//! └──────────┘ JSON/SSE │         │                                        │
//!                       │         │ reply() / reply_streaming()            │
//!                       │         v                                        │
//!                       │  orchestrator.rs  (TurnOrchestrator)             │
//!                       │     │                       │                    │
//!                       │     │ append / history      │ complete*()        │
//!                       │     v                       v                    │
//!                       │  db.rs  (SessionStore,   relay.rs  (OpenAiRelay) │
//!                       │          StoreHandle)       └─ sse.rs (decoding) │
//!                       │                                                  │
//!                       │  transcript.rs  (history → completion messages)  │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Types
//!
//! | Type               | Module            | Role                                        |
//! |--------------------|-------------------|---------------------------------------------|
//! | `SessionStore`     | `db`              | SQLite-backed turn log                      |
//! | `StoreHandle`      | `db`              | Async wrapper running store calls off-loop  |
//! | `CompletionRelay`  | `relay`           | Seam to the completion service              |
//! | `TurnOrchestrator` | `orchestrator`    | Validate, persist, relay, persist           |
//! | `StreamFrame`      | `models`          | One SSE event: a fragment or the done mark  |
//! | `AppState`         | `api`             | Shared state injected into handlers         |

pub mod api;
pub mod db;
pub mod models;
pub mod orchestrator;
pub mod relay;
pub mod server;
pub mod sse;
pub mod transcript;

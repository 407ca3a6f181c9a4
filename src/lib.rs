//! # Topic Timeline
//!
//! Turns a topic and a month range into a chronologically ordered event
//! timeline with cross-referenced sources, using a natural-language answer
//! service as the research backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐   ┌─────────┐
//! │ Planner  │──▶│ Worker pool  │──▶│ Normalizer  │──▶│  Merge  │──▶ JSON / CSV
//! │ 1/month  │   │ fetch+retry  │   │ text→events │   │ ids+ord │
//! └──────────┘   └──────┬───────┘   └─────────────┘   └─────────┘
//!                       ▼
//!                ┌──────────────┐
//!                │ Answer svc   │
//!                │ (SSE stream) │
//!                └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export TIMELINE_APP_KEY=...
//! tl plan "中菲南海冲突" --start 2012-01 --end 2012-06
//! tl run "中菲南海冲突" --start 2012-01 --end 2012-06 --out ./out
//! tl normalize ./reply.txt
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`planner`] | Date range → monthly query units |
//! | [`client`] | Answer service trait and SSE client |
//! | [`normalize`] | Tolerant reply parsing and citation extraction |
//! | [`literal`] | Permissive literal-syntax parser |
//! | [`fetch`] | Per-unit fetch with retry and period filtering |
//! | [`orchestrate`] | Concurrent dispatch and global-id merge |
//! | [`progress`] | Progress reporting on stderr |
//! | [`export`] | JSON persistence and CSV export |

pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod literal;
pub mod models;
pub mod normalize;
pub mod orchestrate;
pub mod planner;
pub mod progress;

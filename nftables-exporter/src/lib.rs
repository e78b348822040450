//! Prometheus exporter for nftables named counters.
//!
//! Every scrape lists the nftables tables, reads the named counters of each
//! table and exposes their totals as two counter metrics:
//!
//! - `nftables_counter_bytes{family, table, counter}`
//! - `nftables_counter_packets{family, table, counter}`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  CounterSource  │────>│    Collector    │────>│   ScrapeGate    │
//! │   (nft --json)  │     │ (labels, dedup) │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! nftables-exporter --config nftables-exporter.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod collector;
pub mod config;
pub mod exposition;
pub mod http;
pub mod mapping;
pub mod nft;
pub mod source;

pub use collector::{CounterCollector, SharedCollector};
pub use config::{ExporterConfig, ScrapeSettings};
pub use http::{HttpServer, ScrapeGate};
pub use nft::NftCommandSource;
pub use source::CounterSource;

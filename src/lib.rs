//! # Grounded RAG
//!
//! Tenant-scoped retrieval and citation-grounded answer generation over
//! document collections.
//!
//! Documents are split into checksummed chunks, embedded, and indexed under
//! the owning tenant. A query retrieves nearest neighbors from the tenant's
//! namespace only, diversifies them with MMR, and asks a generation model
//! for an answer that must cite the chunks it was shown. Answers whose
//! citations cannot be validated are retried a bounded number of times and
//! otherwise refused.
//!
//! ## Architecture
//!
//! ```text
//!  ingest:  source ─▶ extract ─▶ chunk ─▶ embed ─▶ ┌────────────┐
//!                                                  │ VectorStore│
//!                                                  │ ChunkText  │
//!  ask:     query ─▶ embed ─▶ search (tenant) ◀────┴────────────┘
//!                    ─▶ tenant guard ─▶ normalize ─▶ MMR
//!                    ─▶ grounded generation ─▶ answer + citations
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! grag init
//! grag ingest ./handbook.pdf --tenant acme
//! grag ask "What is the refund window?" --tenant acme
//! grag serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | Page text extraction |
//! | [`chunk`] | Fixed-window chunking with checksums |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector index and chunk-text stores |
//! | [`tenant`] | Tenant isolation guard |
//! | [`normalize`] | Raw hits → scored chunk hits |
//! | [`mmr`] | Maximum Marginal Relevance diversification |
//! | [`retrieve`] | Tenant-scoped retrieval |
//! | [`generate`] | Generation provider abstraction |
//! | [`grounding`] | Citation-validated answer generation |
//! | [`ingest`] | Document ingestion |
//! | [`pipeline`] | Assembled ingest/search/ask pipeline |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod grounding;
pub mod ingest;
pub mod migrate;
pub mod mmr;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod retrieve;
pub mod server;
pub mod store;
pub mod tenant;

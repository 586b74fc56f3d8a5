//! # Lexpipe
//!
//! A batch ingestion and indexing pipeline for appellate court opinions.
//!
//! Lexpipe turns a directory of opinion PDFs into a structured, searchable
//! SQLite database: text is extracted (remote parse service with a local
//! fallback), structured fields are pulled out with a local LLM, the opinion
//! body is chunked by section and split into citation-safe sentences, and
//! everything is indexed lexically (word dictionary, FTS5 sentences, legal
//! phrases) with optional chunk embeddings.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌──────────┐
//! │   PDFs    │──▶│  Extract   │──▶│  LLM +    │──▶│  SQLite   │
//! │ (+manifest)│   │ remote/local│   │ assemble  │   │ FTS5+Vec  │
//! └──────────┘   └───────────┘   └───────────┘   └────┬─────┘
//!                                                     │
//!                                          ┌──────────┴──────────┐
//!                                          ▼                     ▼
//!                                    ┌──────────┐         ┌──────────┐
//!                                    │ chunking │         │ lexical  │
//!                                    │ sentences│         │ indexing │
//!                                    └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lexpipe init                          # create database
//! lexpipe ingest opinion.pdf            # single PDF end to end
//! lexpipe batch ./pdfs --workers 4      # two-phase batch over a directory
//! lexpipe batch ./pdfs --resume ./ledger/checkpoint_job.json
//! lexpipe verify --case-id 42           # field-by-field report
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF text extraction (remote service + local fallback) |
//! | [`llm`] | LLM structured extraction and JSON repair |
//! | [`assemble`] | Case record assembly (county detection, fallbacks) |
//! | [`segment`] | Section-aware chunking and citation-safe sentences |
//! | [`lexicon`] | Word dictionary and sentence FTS indexing |
//! | [`index`] | Per-case indexing pass (chunks, sentences, phrases, vectors) |
//! | [`persist`] | Transactional case persistence |
//! | [`dimensions`] | Dimension table resolution and caching |
//! | [`batch`] | Two-phase batch driver |
//! | [`ledger`] | Checkpoint and failure log |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod assemble;
pub mod batch;
pub mod config;
pub mod db;
pub mod dimensions;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ledger;
pub mod lexicon;
pub mod llm;
pub mod manifest;
pub mod migrate;
pub mod models;
pub mod persist;
pub mod progress;
pub mod segment;
pub mod verify;

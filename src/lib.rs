//! # Beach Market Contest Service
//!
//! Back-office service for the Beach Market promotional contest: customers
//! upload a receipt photo, the service extracts the folio number with
//! multi-pass OCR, verifies the document against the per-branch sales
//! databases, and registers eligible participations for the prize draw.

pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod extraction;
pub mod http;
pub mod instance_manager;
pub mod ledger;
pub mod observability;
pub mod ocr_config;
pub mod ocr_errors;
pub mod pipeline;
pub mod preprocessing;
pub mod recognition;
pub mod registrar;
pub mod store;
pub mod variants;

// Re-export types for easier access
pub use extraction::FolioExtractor;
pub use ledger::{BranchLocator, LedgerMatch};
pub use pipeline::ContestPipeline;
pub use preprocessing::ReceiptNormalizer;

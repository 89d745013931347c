pub mod import;
pub mod recognition; // Multi-backend OCR behind one trait
pub mod reconcile; // Observation Reconciler
pub mod extraction; // Field Extractor
pub mod normalize; // Model-assisted gap filling
pub mod policy; // Policy Index: chunk, embed, search
pub mod validation; // Business rules with retrieved evidence
pub mod processor; // Single-document orchestrator
pub mod batch;
pub mod report;

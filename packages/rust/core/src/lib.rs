//! Job orchestration for kbforge.
//!
//! This crate ties together extraction, phrase analysis, knowledge base
//! merging and task bookkeeping into a background job per uploaded document.

pub mod executor;
pub mod processor;

pub use executor::{JobHandle, WorkerPool};
pub use processor::{DocumentProcessor, JobRequest, ProcessorSettings, Upload};

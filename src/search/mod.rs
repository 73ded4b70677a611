//! Search Module
//!
//! Document lookup used to ground chat replies:
//! - [`DocumentIndex`]: synchronous lookup returning ranked page excerpts
//! - [`InMemoryDocumentIndex`]: keyword index over pages held in memory
//!
//! Documents are loaded from text exports at startup (`DOCUMENTS_DIR`); uploading and
//! PDF extraction happen outside this crate.

pub mod documents;

pub use documents::{DocumentExcerpt, DocumentIndex, DocumentInfo, DocumentRecord, InMemoryDocumentIndex};

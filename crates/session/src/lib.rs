//! Session registry and keyword extraction (§4.10-§4.11): the mapping
//! from `session_id` to accumulated conversation metadata, and the
//! pipelines that populate it from raw text.

mod keyword_extractor;
mod session_registry;

pub use keyword_extractor::{extract_file_paths, extract_identifiers, extract_keywords, IdentifierKind};
pub use session_registry::{SessionMetadata, SessionRegistry};

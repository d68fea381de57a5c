pub mod error;
pub mod index;
pub mod parse;

pub use error::IngestError;
pub use index::{write_chunks, IngestReport};
pub use parse::{build_chunks, load_qa_json, parse_qa, split_paragraphs, InputFormat, QaPair};

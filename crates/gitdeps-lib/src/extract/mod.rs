pub mod error;
pub mod extractor;

pub use error::PackError;
pub use extractor::{
    INCOMING_FILE_SUFFIX, IncomingFile, extract_files, extract_files_from_raw_stream,
};

pub mod errors;
pub mod line_buffer;
pub mod models;
pub mod progress_parser;
pub mod url_parser;

pub use line_buffer::LineBuffer;
pub use progress_parser::{InferenceSettings, ProgressParser};
pub use url_parser::classify_url;

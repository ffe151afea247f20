//! sketch-cli library: the directory-backed store and file plumbing behind
//! the `sketch` binary, exposed for integration tests.

pub mod config;
pub mod content_file;
pub mod dir_kv;
pub mod watcher;

pub use config::SketchConfig;
pub use content_file::{ContentFile, ContentFileError};
pub use dir_kv::DirKv;
pub use watcher::ContentWatcher;

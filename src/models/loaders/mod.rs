pub mod toml_loader;

pub use toml_loader::{load_all_response_files, load_response_file, ResponseFile};

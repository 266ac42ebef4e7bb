pub mod parser;
pub mod scan;
pub mod walk;

pub use scan::{ScanError, ScanResult, ScannedMovie, scan_library};

//! Property view recording
//!
//! Views are deduplicated per property, viewer IP and calendar day.

pub mod counter;
pub mod ip_extractor;

pub use counter::{RecordedView, ViewCounter, ViewError};
pub use ip_extractor::extract_client_ip;

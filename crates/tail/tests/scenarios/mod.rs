//! Tailing scenarios
//!
//! Each module drives real file operations and checks what readers observe.

pub mod backpressure;
pub mod content_info;
pub mod fairness;
pub mod line_integrity;
pub mod rename;
pub mod resume;
pub mod rotation;
pub mod signature;
pub mod timeouts;

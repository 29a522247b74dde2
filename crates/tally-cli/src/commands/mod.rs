//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Shared utilities (config loading)
//! - `file` - Filing pipeline
//! - `import` - CSV to ledger conversion
//! - `preview` - Observer mode report
//! - `rules` - Rule file inspection

pub mod core;
pub mod file;
pub mod import;
pub mod preview;
pub mod rules;

// Re-export command functions for main.rs
pub use core::*;
pub use file::*;
pub use import::*;
pub use preview::*;
pub use rules::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

//! Utilities module for errors, logging, and config files

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::{init_logging, LogConfig, LogLevel};

/// Format a parameter count with thousands separators
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

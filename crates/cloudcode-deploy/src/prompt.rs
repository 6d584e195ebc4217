//! Interactive prompting

use std::io;

/// Asks the operator questions. The CLI reads stdin; tests script answers.
pub trait Prompter: Send + Sync {
    /// Yes/no question; an empty answer yields `default`
    fn confirm(&self, message: &str, default: bool) -> io::Result<bool>;

    /// Free text; an empty answer yields `default` when given
    fn input(&self, message: &str, default: Option<&str>) -> io::Result<String>;

    /// Hidden input
    fn password(&self, message: &str) -> io::Result<String>;
}

//! Drops editor, OS and sync-client noise before it reaches the engine.

use std::collections::HashSet;

/// Placeholder and cache files every desktop OS sprinkles around.
const OS_NOISE: &[&str] = &["Thumbs.db", "desktop.ini", ".DS_Store", "New Text Document.txt"];

#[derive(Debug, Clone)]
pub struct NoiseFilter {
    ignored: HashSet<String>,
}

impl NoiseFilter {
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ignored: HashSet<String> = OS_NOISE.iter().map(|s| s.to_string()).collect();
        ignored.extend(extra.into_iter().map(Into::into));
        Self { ignored }
    }

    /// True when `file_name` should never be backed up.
    pub fn is_noise(&self, file_name: &str) -> bool {
        if file_name.is_empty() || file_name.starts_with('.') || file_name.starts_with('~') {
            return true;
        }
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".tmp") || lower.ends_with(".temp") {
            return true;
        }
        self.ignored.contains(file_name)
    }
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

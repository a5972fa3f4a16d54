use std::fs;
use std::path::Path;

use anyhow::Context;

/// Drip-fed course inventory for the premium tariff, loaded once at startup.
/// One lesson per line; blank lines and `#` comments are skipped.
pub struct CourseContent {
    lessons: Vec<String>,
}

impl CourseContent {
    pub fn new(lessons: Vec<String>) -> Self {
        Self { lessons }
    }

    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("could not read course file {}", path.display()))?;

        let lessons = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();

        Ok(Self { lessons })
    }

    /// 1-based lookup matching the drip counter.
    pub fn lesson(&self, number: i32) -> Option<&str> {
        if number < 1 {
            return None;
        }

        self.lessons.get(number as usize - 1).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }
}

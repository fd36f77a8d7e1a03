use std::path::Path;

use crate::errors::{HarnessError, HarnessResult};

/// Class names, one per classifier output channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn load(path: impl AsRef<Path>) -> HarnessResult<LabelTable> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| HarnessError::Io { path: path.to_path_buf(), source })?;
        let table = LabelTable::from_text(&text);
        debug!("Loaded {} labels from {path:?}", table.len());
        Ok(table)
    }

    /// Splits on newlines. Empty lines are kept, so line `i` always names
    /// channel `i`.
    pub fn from_text(text: &str) -> LabelTable {
        LabelTable { labels: text.lines().map(|l| l.to_string()).collect() }
    }

    pub fn get(&self, index: usize) -> HarnessResult<&str> {
        self.labels
            .get(index)
            .map(|s| s.as_str())
            .ok_or(HarnessError::IndexOutOfRange { index, len: self.labels.len() })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for LabelTable {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> LabelTable {
        LabelTable { labels: iter.into_iter().map(Into::into).collect() }
    }
}

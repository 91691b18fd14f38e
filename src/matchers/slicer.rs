use super::tail;
use serde::{Deserialize, Serialize};

/// Window kept while the start marker has not been seen.
const SEARCH_WINDOW: usize = 200;
/// Window kept after a chunk containing the start marker.
const SLICE_WINDOW: usize = 300;
const PREVIEW_LEN: usize = 50;

/// Extracts the text between a start marker and an end marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSlicer {
    pub start_marker: String,
    /// Defaults to a newline when blank.
    #[serde(default)]
    pub end_marker: String,
    #[serde(default)]
    pub extracted_value: Option<String>,
    /// Value seen so far while its end marker has not arrived yet.
    #[serde(skip)]
    pub preview: Option<String>,
}

impl FieldSlicer {
    pub fn new(start_marker: impl Into<String>, end_marker: impl Into<String>) -> Self {
        Self {
            start_marker: start_marker.into(),
            end_marker: end_marker.into(),
            extracted_value: None,
            preview: None,
        }
    }

    fn end_marker(&self) -> &str {
        match self.end_marker.trim() {
            "" => "\n",
            trimmed => trimmed,
        }
    }

    /// Returns true when a new value was committed.
    pub(super) fn update(&mut self, buffer: &mut String, chunk: &str) -> bool {
        if self.start_marker.is_empty() {
            return false;
        }
        let combined = format!("{buffer}{chunk}");
        let Some(start) = combined.rfind(self.start_marker.as_str()) else {
            *buffer = tail(&combined, SEARCH_WINDOW);
            return false;
        };

        let after = &combined[start + self.start_marker.len()..];
        let changed = match after.find(self.end_marker()) {
            Some(end) => {
                self.preview = None;
                let value = after[..end].trim();
                if self.extracted_value.as_deref() != Some(value) {
                    self.extracted_value = Some(value.to_string());
                    true
                } else {
                    false
                }
            }
            None => {
                let partial = after.trim();
                let mut preview: String = partial.chars().take(PREVIEW_LEN).collect();
                if partial.chars().count() > PREVIEW_LEN {
                    preview.push('…');
                }
                self.preview = Some(preview);
                false
            }
        };
        *buffer = tail(&combined, SLICE_WINDOW);
        changed
    }

    pub(super) fn reset(&mut self) {
        self.extracted_value = None;
        self.preview = None;
    }
}

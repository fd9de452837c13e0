use std::path::Path;

use crate::error::{PipelineError, PipelineResult};

/// Class-index table mapping model output indices to display names.
///
/// Without a labels file every class resolves to `class{N}`.
#[derive(Clone, Debug, Default)]
pub struct ClassNames {
    names: Vec<String>,
}

impl ClassNames {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Load names from a text file, one per line. Blank lines and `#` comments are skipped.
    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::ModelLoadError(format!(
                "failed to read labels file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::parse(&raw))
    }

    pub fn parse(raw: &str) -> Self {
        let names = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolve a class index.
    pub fn resolve(&self, class_id: usize) -> String {
        self.names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class{}", class_id))
    }

    /// Strict lookup: `None` when a non-empty table does not contain the index.
    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_blanks() {
        let names = ClassNames::parse("# defects\nscratch\n\n  dent \n");
        assert_eq!(names.len(), 2);
        assert_eq!(names.resolve(0), "scratch");
        assert_eq!(names.resolve(1), "dent");
    }

    #[test]
    fn unknown_index_falls_back() {
        let names = ClassNames::default();
        assert_eq!(names.resolve(4), "class4");
        assert!(names.get(4).is_none());
    }

    #[test]
    fn missing_file_is_model_load_error() {
        let err = ClassNames::from_file(Path::new("/nonexistent/labels.txt")).unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoadError(_)));
    }
}

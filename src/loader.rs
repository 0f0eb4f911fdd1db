use crate::error::CompileError;
use std::path::{Path, PathBuf};

pub const SOURCE_EXTENSION: &str = "sbs";
pub const STAGE_STEM: &str = "stage";
pub const STAGE_NAME: &str = "Stage";

/// One discovered source file, classified and named before compilation.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub unit_name: String,
    pub is_stage: bool,
}

impl SourceFile {
    /// Renames the unit; the stage keeps its reserved name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        if !self.is_stage {
            self.unit_name = name.into();
        }
        self
    }
}

/// Finds every `.sbs` file in `folder`, sorted by file name so builds are
/// reproducible regardless of directory enumeration order. The file whose
/// stem is the reserved word `stage` (compared case-insensitively) becomes
/// the Stage; a second match is a hard error, never resolved by picking one.
pub fn discover(folder: &Path) -> Result<Vec<SourceFile>, CompileError> {
    let entries = std::fs::read_dir(folder).map_err(|err| CompileError::SourceRead {
        path: folder.to_path_buf(),
        message: err.to_string(),
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| CompileError::SourceRead {
            path: folder.to_path_buf(),
            message: err.to_string(),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let has_source_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(SOURCE_EXTENSION))
            .unwrap_or(false);
        if has_source_extension {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut sources = Vec::new();
    let mut stage_path: Option<PathBuf> = None;
    for path in paths {
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("")
            .to_string();
        if stem.is_empty() {
            continue;
        }
        let is_stage = stem.eq_ignore_ascii_case(STAGE_STEM);
        if is_stage {
            if let Some(first) = &stage_path {
                return Err(CompileError::DuplicateStage {
                    first: first.clone(),
                    second: path,
                });
            }
            stage_path = Some(path.clone());
        }
        let unit_name = if is_stage {
            STAGE_NAME.to_string()
        } else {
            stem
        };
        sources.push(SourceFile {
            path,
            unit_name,
            is_stage,
        });
    }
    Ok(sources)
}

/// Reads a unit's source text. The file handle is released as soon as the
/// text is in memory.
pub fn read_source(file: &SourceFile) -> Result<String, CompileError> {
    std::fs::read_to_string(&file.path).map_err(|err| CompileError::SourceRead {
        path: file.path.clone(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "").unwrap();
    }

    #[test]
    fn discovery_is_sorted_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "zebra.sbs");
        touch(dir.path(), "apple.sbs");
        touch(dir.path(), "mango.sbs");
        let sources = discover(dir.path()).unwrap();
        let names: Vec<_> = sources.iter().map(|s| s.unit_name.as_str()).collect();
        assert_eq!(names, vec!["apple", "mango", "zebra"]);
    }

    #[test]
    fn classifies_the_stage_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "stage.sbs");
        touch(dir.path(), "cat.sbs");
        let sources = discover(dir.path()).unwrap();
        let stage: Vec<_> = sources.iter().filter(|s| s.is_stage).collect();
        assert_eq!(stage.len(), 1);
        assert_eq!(stage[0].unit_name, "Stage");
    }

    #[test]
    fn stage_stem_matches_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Stage.sbs");
        let sources = discover(dir.path()).unwrap();
        assert!(sources[0].is_stage);
    }

    #[test]
    fn two_stage_files_are_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "stage.sbs");
        touch(dir.path(), "STAGE.sbs");
        let err = discover(dir.path()).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateStage { .. }));
    }

    #[test]
    fn ignores_files_with_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "cat.sbs");
        touch(dir.path(), "cat.svg");
        touch(dir.path(), "notes.txt");
        let sources = discover(dir.path()).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].unit_name, "cat");
    }

    #[test]
    fn explicit_name_overrides_the_stem() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "cat.sbs");
        let source = discover(dir.path()).unwrap().remove(0).with_name("Hero");
        assert_eq!(source.unit_name, "Hero");
    }
}

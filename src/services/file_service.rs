use crate::backend::Platform;
use crate::constants::{FILE_FILTER_LABEL, REQUIRED_EXTENSION};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {path}")]
    NotFound { path: String },
    #[error("Failed to open folder for {path}: {source}")]
    Reveal {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Native file picker. Returns `None` when the user cancels.
pub trait FileChooser: Send + Sync {
    fn choose_file(&self, start_dir: Option<&Path>) -> Option<PathBuf>;
}

#[derive(Clone, Debug, Default)]
pub struct FileService;

impl FileService {
    pub fn new() -> Self {
        Self
    }

    /// Opens the platform file manager with `path` selected (or its folder on Linux).
    pub fn reveal_in_folder(&self, path: &Path) -> Result<(), FileError> {
        if !path.exists() {
            return Err(FileError::NotFound {
                path: path.to_string_lossy().to_string(),
            });
        }

        let (program, args) = reveal_command(Platform::current(), path);
        tracing::debug!("Revealing {:?} via {} {:?}", path, program, args);

        Command::new(program)
            .args(&args)
            .spawn()
            .map(|_| ())
            .map_err(|source| FileError::Reveal {
                path: path.to_string_lossy().to_string(),
                source,
            })
    }
}

impl FileChooser for FileService {
    fn choose_file(&self, start_dir: Option<&Path>) -> Option<PathBuf> {
        let mut dialog =
            rfd::FileDialog::new().add_filter(FILE_FILTER_LABEL, &[REQUIRED_EXTENSION]);

        if let Some(dir) = start_dir.filter(|dir| dir.is_dir()) {
            dialog = dialog.set_directory(dir);
        }

        dialog.pick_file()
    }
}

/// Program and arguments that show `path` in the file manager.
pub fn reveal_command(platform: Platform, path: &Path) -> (&'static str, Vec<String>) {
    let target = path.to_string_lossy().to_string();
    match platform {
        Platform::Windows => ("explorer", vec![format!("/select,{}", target)]),
        Platform::MacOs => ("open", vec!["-R".to_string(), target]),
        // xdg-open cannot select a file, so open the containing folder
        Platform::Linux => {
            let folder = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(|parent| parent.to_string_lossy().to_string())
                .unwrap_or(target);
            ("xdg-open", vec![folder])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reveal_selects_the_file_where_supported() {
        let path = Path::new("/data/out/book_processed.xlsx");

        let (program, args) = reveal_command(Platform::MacOs, path);
        assert_eq!(program, "open");
        assert_eq!(args, vec!["-R", "/data/out/book_processed.xlsx"]);

        let (program, args) = reveal_command(Platform::Windows, path);
        assert_eq!(program, "explorer");
        assert_eq!(args, vec!["/select,/data/out/book_processed.xlsx"]);
    }

    #[test]
    fn reveal_opens_parent_folder_on_linux() {
        let (program, args) =
            reveal_command(Platform::Linux, Path::new("/data/out/book_processed.xlsx"));

        assert_eq!(program, "xdg-open");
        assert_eq!(args, vec!["/data/out"]);
    }

    #[test]
    fn reveal_missing_file_fails_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.xlsx");

        assert!(matches!(
            FileService::new().reveal_in_folder(&missing),
            Err(FileError::NotFound { .. })
        ));
    }
}

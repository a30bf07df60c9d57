use crate::constants::{OUTPUT_SUFFIX, REQUIRED_EXTENSION};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Input file is required")]
    MissingInputFile,
    #[error("Unsupported input file format: {format} (expected .{expected})")]
    UnsupportedInputFormat { format: String, expected: String },
    #[error("Input path has no file name: {path}")]
    MissingFileName { path: String },
}

impl ValidationError {
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingInputFile => "Please select a file to convert.".to_string(),
            Self::UnsupportedInputFormat { expected, .. } => {
                format!("Only .{} files can be converted.", expected)
            }
            Self::MissingFileName { path } => format!("Not a valid file path: {}", path),
        }
    }
}

/// Path checks done before a backend is ever spawned. File contents are never inspected.
#[derive(Clone, Debug)]
pub struct ValidationService {
    required_extension: String,
}

impl Default for ValidationService {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationService {
    pub fn new() -> Self {
        Self {
            required_extension: REQUIRED_EXTENSION.to_string(),
        }
    }

    pub fn required_extension(&self) -> &str {
        &self.required_extension
    }

    pub fn validate_input_file(&self, path: &Path) -> Result<(), ValidationError> {
        if path.as_os_str().is_empty() {
            return Err(ValidationError::MissingInputFile);
        }

        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case(&self.required_extension) => {}
            Some(ext) => {
                return Err(ValidationError::UnsupportedInputFormat {
                    format: ext.to_string(),
                    expected: self.required_extension.clone(),
                });
            }
            None => {
                return Err(ValidationError::UnsupportedInputFormat {
                    format: "No file extension".to_string(),
                    expected: self.required_extension.clone(),
                });
            }
        }

        if path.file_stem().map(|stem| stem.is_empty()).unwrap_or(true) {
            return Err(ValidationError::MissingFileName {
                path: path.to_string_lossy().to_string(),
            });
        }

        Ok(())
    }

    /// `<dir>/<stem>_processed.<ext>` next to the input.
    pub fn derive_output_path(&self, input_path: &Path) -> Result<PathBuf, ValidationError> {
        self.validate_input_file(input_path)?;

        let stem = input_path
            .file_stem()
            .ok_or_else(|| ValidationError::MissingFileName {
                path: input_path.to_string_lossy().to_string(),
            })?;
        // Stays an OsString so non-UTF-8 stems survive unchanged
        let mut output_name = OsString::from(stem);
        output_name.push(OUTPUT_SUFFIX);
        output_name.push(".");
        output_name.push(&self.required_extension);

        Ok(match input_path.parent() {
            Some(parent) => parent.join(output_name),
            None => PathBuf::from(output_name),
        })
    }
}

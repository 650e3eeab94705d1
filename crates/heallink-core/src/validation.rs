//! Client-side size checks, run before any network activity.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DEFAULT_MAX_FILE_SIZE_MB;

const KIB: f64 = 1024.0;
const UNITS: [&str; 3] = ["KB", "MB", "GB"];

/// Anything with a display name and a byte size can be validated.
pub trait SizedFile {
    fn name(&self) -> &str;
    fn size_bytes(&self) -> u64;
}

/// Render a byte count for humans: `"0 Bytes"`, `"512 Bytes"`, `"1.50 KB"`,
/// `"2.45 MB"`. Sizes of 1 MB and above are never shown in KB.
pub fn format_file_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} Bytes");
    }
    let mut value = bytes as f64 / KIB;
    let mut unit = 0;
    while value >= KIB && unit < UNITS.len() - 1 {
        value /= KIB;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("File size ({formatted_size}) exceeds maximum limit of {max_size_mb} MB")]
pub struct FileTooLarge {
    pub size_bytes: u64,
    pub formatted_size: String,
    pub max_size_mb: f64,
}

pub fn validate_file_size(size_bytes: u64, max_size_mb: f64) -> Result<(), FileTooLarge> {
    let max_bytes = max_size_mb * KIB * KIB;
    if size_bytes as f64 > max_bytes {
        return Err(FileTooLarge {
            size_bytes,
            formatted_size: format_file_size(size_bytes),
            max_size_mb,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidFile {
    pub filename: String,
    pub size: u64,
    pub formatted_size: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct ValidatedFiles<F> {
    pub valid_files: Vec<F>,
    pub invalid_files: Vec<InvalidFile>,
}

/// Partition a selection into acceptable and oversized files, keeping the
/// input order within each side.
pub fn validate_files<F: SizedFile>(files: Vec<F>, max_size_mb: f64) -> ValidatedFiles<F> {
    let mut valid_files = Vec::new();
    let mut invalid_files = Vec::new();
    for file in files {
        match validate_file_size(file.size_bytes(), max_size_mb) {
            Ok(()) => valid_files.push(file),
            Err(e) => invalid_files.push(InvalidFile {
                filename: file.name().to_string(),
                size: e.size_bytes,
                formatted_size: e.formatted_size.clone(),
                error: e.to_string(),
            }),
        }
    }
    ValidatedFiles {
        valid_files,
        invalid_files,
    }
}

pub fn validate_files_default<F: SizedFile>(files: Vec<F>) -> ValidatedFiles<F> {
    validate_files(files, DEFAULT_MAX_FILE_SIZE_MB)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    struct Picked(&'static str, u64);

    impl SizedFile for Picked {
        fn name(&self) -> &str {
            self.0
        }
        fn size_bytes(&self) -> u64 {
            self.1
        }
    }

    #[test]
    fn format_file_size_units() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(1023), "1023 Bytes");
        assert_eq!(format_file_size(1024), "1.00 KB");
        assert_eq!(format_file_size(1536), "1.50 KB");
        assert_eq!(format_file_size(1_572_864), "1.50 MB");
        assert_eq!(format_file_size(15 * MB), "15.00 MB");
        assert_eq!(format_file_size(3 * 1024 * MB), "3.00 GB");
    }

    #[test]
    fn format_file_size_caps_at_gb() {
        assert_eq!(format_file_size(2048 * 1024 * MB), "2048.00 GB");
    }

    #[test]
    fn validate_file_size_boundary() {
        assert!(validate_file_size(10 * MB, 10.0).is_ok());
        assert!(validate_file_size(10 * MB + 1, 10.0).is_err());
        assert!(validate_file_size(0, 10.0).is_ok());
    }

    #[test]
    fn validate_file_size_message() {
        let err = validate_file_size(15 * MB, 10.0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "File size (15.00 MB) exceeds maximum limit of 10 MB"
        );
        assert_eq!(err.size_bytes, 15 * MB);
    }

    #[test]
    fn validate_files_partitions_in_order() {
        let files = vec![
            Picked("a.pdf", MB),
            Picked("huge.mov", 50 * MB),
            Picked("b.png", 2 * MB),
            Picked("huge2.mov", 11 * MB),
        ];
        let result = validate_files(files, 10.0);
        let valid: Vec<_> = result.valid_files.iter().map(|f| f.0).collect();
        assert_eq!(valid, vec!["a.pdf", "b.png"]);
        let invalid: Vec<_> = result
            .invalid_files
            .iter()
            .map(|f| f.filename.as_str())
            .collect();
        assert_eq!(invalid, vec!["huge.mov", "huge2.mov"]);
        assert_eq!(result.invalid_files[1].formatted_size, "11.00 MB");
        assert_eq!(result.invalid_files[1].size, 11 * MB);
    }

    #[test]
    fn validate_files_default_uses_ten_mb() {
        let result = validate_files_default(vec![Picked("ok", 2 * MB), Picked("big", 15 * MB)]);
        assert_eq!(result.valid_files.len(), 1);
        assert_eq!(result.invalid_files.len(), 1);
    }
}

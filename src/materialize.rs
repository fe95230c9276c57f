//! Unique-copy materializer.
//!
//! Copies an accepted file into the fixed output directory under a clean,
//! collision-free name: `{category}-{YYYYmmdd-HHMMSS}-{micros}{ext}`. The
//! sub-second component keeps names unique under rapid repeated calls within
//! the same second (and avoids OS-appended " (1)" suffixes).
//!
//! Copy failures degrade gracefully: the pipeline proceeds with the original
//! path instead of failing, and the degraded mode is visible to callers via
//! [`Materialized::Original`].

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::classify::Category;
use crate::error::MaterializeError;

/// Where the bytes ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    /// A fresh copy in the output directory.
    Copied(PathBuf),
    /// Degraded mode: the copy could not be made, use the source in place.
    Original(PathBuf),
}

impl Materialized {
    pub fn path(&self) -> &Path {
        match self {
            Materialized::Copied(p) | Materialized::Original(p) => p,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Materialized::Original(_))
    }
}

#[derive(Debug, Clone)]
pub struct Materializer {
    output_dir: PathBuf,
}

impl Materializer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Copy `source` into the output directory under a unique clean name.
    ///
    /// A missing source is a real error; a failed copy (permissions, full
    /// disk) is not — it degrades to the original path.
    pub fn materialize(
        &self,
        source: &Path,
        category: Category,
    ) -> Result<Materialized, MaterializeError> {
        if !source.exists() {
            return Err(MaterializeError::SourceMissing(source.to_path_buf()));
        }

        if let Err(e) = std::fs::create_dir_all(&self.output_dir) {
            warn!(
                dir = %self.output_dir.display(),
                error = %e,
                "Cannot create output directory, using original file"
            );
            return Ok(Materialized::Original(source.to_path_buf()));
        }

        let dest = self.output_dir.join(unique_name(source, category));
        match std::fs::copy(source, &dest) {
            Ok(_) => {
                info!(copy = %dest.display(), "Created unique copy");
                Ok(Materialized::Copied(dest))
            }
            Err(e) => {
                warn!(
                    source = %source.display(),
                    error = %e,
                    "Could not copy file, using original"
                );
                Ok(Materialized::Original(source.to_path_buf()))
            }
        }
    }
}

fn unique_name(source: &Path, category: Category) -> String {
    let now = chrono::Local::now();
    let stamp = now.format("%Y%m%d-%H%M%S");
    let micros = now.timestamp_subsec_micros();
    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    format!("{}-{}-{:06}{}", category.label(), stamp, micros, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(path: &Path, content: &[u8]) {
        std::fs::File::create(path).unwrap().write_all(content).unwrap();
    }

    #[test]
    fn copies_with_clean_name_and_extension() {
        let src_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("Orderbekräftelse-2024.pdf");
        write_file(&source, b"pdf bytes");

        let m = Materializer::new(out_dir.path());
        let result = m
            .materialize(&source, Category::Orderbekraftelse)
            .unwrap();

        assert!(!result.is_degraded());
        let name = result.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("Orderbekräftelse-"));
        assert!(name.ends_with(".pdf"));
        assert_eq!(std::fs::read(result.path()).unwrap(), b"pdf bytes");
        // Original is untouched by the materializer itself.
        assert!(source.exists());
    }

    #[test]
    fn missing_source_is_an_error() {
        let out_dir = tempfile::tempdir().unwrap();
        let m = Materializer::new(out_dir.path());
        let result = m.materialize(Path::new("/nope/missing.pdf"), Category::Faktura);
        assert!(matches!(result, Err(MaterializeError::SourceMissing(_))));
    }

    #[test]
    fn unwritable_output_degrades_to_original() {
        let src_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("Faktura_1234567.pdf");
        write_file(&source, b"x");

        // Output "directory" is actually a file, so create_dir_all fails.
        let blocker = src_dir.path().join("blocked");
        write_file(&blocker, b"");

        let m = Materializer::new(blocker.join("out"));
        let result = m.materialize(&source, Category::Faktura).unwrap();
        assert!(result.is_degraded());
        assert_eq!(result.path(), source);
    }

    #[test]
    fn rapid_calls_yield_distinct_names() {
        let src_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("Inköp.pdf");
        write_file(&source, b"x");

        let m = Materializer::new(out_dir.path());
        let a = m.materialize(&source, Category::Order).unwrap();
        let b = m.materialize(&source, Category::Order).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().exists());
        assert!(b.path().exists());
    }

    #[test]
    fn category_label_prefixes_name() {
        let src_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("1234567.pdf");
        write_file(&source, b"x");

        let m = Materializer::new(out_dir.path());
        let result = m.materialize(&source, Category::Faktura).unwrap();
        let name = result.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("Faktura-"));
    }
}

//! Reference face images on disk, one file per identity: `<roll_no>.<ext>`.

use crate::store::{Sample, SampleStore, StoreError};
use image::ImageFormat;
use std::fs;
use std::path::{Path, PathBuf};

pub struct SampleDir {
    root: PathBuf,
}

impl SampleDir {
    /// Use `root`, creating it if missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn existing_for(&self, roll_no: &str) -> Result<Vec<PathBuf>, StoreError> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if sample_key(&path).as_deref() == Some(roll_no) {
                found.push(path);
            }
        }
        Ok(found)
    }
}

/// Roll number for a sample file, or `None` for anything that isn't one.
fn sample_key(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with('.') {
        return None;
    }
    ImageFormat::from_path(path).ok()?;
    Some(stem.to_string())
}

impl SampleStore for SampleDir {
    fn put(&self, roll_no: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let ext = image::guess_format(bytes)
            .ok()
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("jpg");
        let target = self.root.join(format!("{roll_no}.{ext}"));
        let tmp = self.root.join(format!(".{roll_no}.tmp"));

        fs::write(&tmp, bytes)?;
        for stale in self.existing_for(roll_no)? {
            if stale != target {
                fs::remove_file(&stale)?;
            }
        }
        fs::rename(&tmp, &target)?;

        tracing::debug!(roll_no, path = %target.display(), "stored face sample");
        Ok(())
    }

    fn get(&self, roll_no: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.existing_for(roll_no)?.first() {
            Some(path) => Ok(Some(fs::read(path)?)),
            None => Ok(None),
        }
    }

    fn remove(&self, roll_no: &str) -> Result<(), StoreError> {
        for path in self.existing_for(roll_no)? {
            fs::remove_file(&path)?;
            tracing::debug!(roll_no, path = %path.display(), "removed face sample");
        }
        Ok(())
    }

    fn samples(&self) -> Result<Vec<Sample>, StoreError> {
        let mut samples = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(roll_no) = sample_key(&path) else {
                continue;
            };
            match fs::read(&path) {
                Ok(bytes) => samples.push(Sample { roll_no, bytes }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable face sample skipped")
                }
            }
        }
        samples.sort_by(|a, b| a.roll_no.cmp(&b.roll_no));
        Ok(samples)
    }
}

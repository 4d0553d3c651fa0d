//! Zip container access shared by the docx and pptx readers.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use zip::ZipArchive;
use zip::result::ZipError;

/// Reader-level result; the error is a human-readable detail that the
/// extractor wraps into a parse error.
pub(crate) type PartResult<T> = std::result::Result<T, String>;

pub(crate) struct Package {
    archive: ZipArchive<File>,
}

impl Package {
    pub fn open(path: &Path) -> PartResult<Self> {
        let file = File::open(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
        let archive = ZipArchive::new(file).map_err(|e| format!("not a valid package: {e}"))?;
        Ok(Self { archive })
    }

    /// Read a part as UTF-8 text. `Ok(None)` when the part does not exist.
    pub fn read_part(&mut self, name: &str) -> PartResult<Option<String>> {
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(format!("cannot read {name}: {e}")),
        };

        let mut contents = String::new();
        entry
            .read_to_string(&mut contents)
            .map_err(|e| format!("cannot read {name}: {e}"))?;
        Ok(Some(contents))
    }

    /// Like [`Package::read_part`], but a missing part is an error.
    pub fn require_part(&mut self, name: &str) -> PartResult<String> {
        self.read_part(name)?
            .ok_or_else(|| format!("missing part {name}"))
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.archive.file_names()
    }
}

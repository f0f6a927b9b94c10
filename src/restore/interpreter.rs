//! Tar interpreter used during restore: consults the current chain level's
//! sentinel to decide whether an entry's body is a raw file or a page
//! delta to be applied against the file already materialized by an
//! earlier (parent) chain level.

use std::io::Read;
use std::path::PathBuf;

use crate::error::Result;
use crate::extractor::TarInterpreter;
use crate::fsx;
use crate::page;
use crate::sentinel::Sentinel;

pub struct RestoreInterpreter<'a> {
    dest: PathBuf,
    sentinel: &'a Sentinel,
    /// Present only while unwrapping an incremental chain level: the
    /// directory the level's prior content was moved aside into, so an
    /// incremented entry's base content can be copied back before its delta
    /// is applied in place.
    base_dir: Option<&'a std::path::Path>,
}

impl<'a> RestoreInterpreter<'a> {
    pub fn new(dest: impl Into<PathBuf>, sentinel: &'a Sentinel, base_dir: Option<&'a std::path::Path>) -> Self {
        RestoreInterpreter {
            dest: dest.into(),
            sentinel,
            base_dir,
        }
    }
}

impl TarInterpreter for RestoreInterpreter<'_> {
    fn interpret(&self, header: &tar::Header, body: &mut dyn Read) -> Result<()> {
        let rel = header.path()?;
        let target = self.dest.join(&rel);

        if header.entry_type() == tar::EntryType::Directory {
            std::fs::create_dir_all(&target)?;
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let rel_str = rel.to_string_lossy().into_owned();
        let is_incremented = self
            .sentinel
            .files
            .get(&rel_str)
            .map(|f| f.is_incremented)
            .unwrap_or(false);

        if is_incremented {
            // The delta only rewrites the blocks it names, so `target` must
            // hold the base content first — copy it back from the moved-
            // aside prior level if it isn't already at the target path.
            if !target.exists() {
                if let Some(base_dir) = self.base_dir {
                    let base_path = base_dir.join(&rel);
                    if base_path.exists() {
                        std::fs::copy(&base_path, &target)?;
                    }
                }
            }
            page::apply_delta(&target, body)?;
        } else {
            let mut out = std::fs::File::create(&target)?;
            std::io::copy(body, &mut out)?;
        }

        if let Ok(mode) = header.mode() {
            let _ = fsx::set_unix_permissions(&target, mode);
        }

        Ok(())
    }
}

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    Copied,
    Cached,
}

/// Gallery-relative `source_ref` as a path, refusing anything that could
/// leave the gallery.
pub fn ref_to_path(source_ref: &str) -> io::Result<PathBuf> {
    let valid = !source_ref.is_empty()
        && source_ref
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != ".." && !seg.contains('\\'));
    if !valid {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid source reference {:?}", source_ref),
        ));
    }
    Ok(source_ref.split('/').collect())
}

/// Copy `gallery_dir/source_ref` into `dest_dir/source_ref` unless it is
/// already there. The copy lands through a rename, so a concurrent duplicate
/// only replaces an identical file.
pub fn materialize(
    gallery_dir: &Path,
    dest_dir: &Path,
    source_ref: &str,
) -> io::Result<Materialized> {
    let rel = ref_to_path(source_ref)?;
    let dst = dest_dir.join(&rel);
    if dst.exists() {
        return Ok(Materialized::Cached);
    }

    let mut src = File::open(gallery_dir.join(&rel))?;
    let parent = dst.parent().unwrap_or(dest_dir);
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    io::copy(&mut src, &mut tmp)?;
    tmp.persist(&dst).map_err(|e| e.error)?;
    Ok(Materialized::Copied)
}

use std::path::{Path, PathBuf};

/// Reduce a client-supplied file name to a safe basename.
///
/// Non-ASCII characters are dropped, path separators and whitespace runs
/// become `_`, anything outside `[A-Za-z0-9._-]` is removed and leading or
/// trailing `.`/`_` are stripped. Returns `None` when nothing is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let spaced: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Write an upload under `uploads_dir` and return its path.
pub fn save_upload(uploads_dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(uploads_dir)?;
    let path = uploads_dir.join(file_name);
    std::fs::write(&path, bytes)?;
    Ok(path)
}

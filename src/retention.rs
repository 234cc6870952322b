//! Rolling local archive: keeps the newest `max_images` captures and deletes the rest.

use crate::error::RetentionError;
use crate::prelude::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, error, info};
use utoipa::ToSchema;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub examined: usize,
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ImageInfo {
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
}

struct Entry {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

fn is_image(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
}

/// Image files in `dir`, oldest first. Ties are ordered by name.
fn scan(dir: &Path, extensions: &[String]) -> Result<Vec<Entry>, RetentionError> {
    let read_dir = fs::read_dir(dir).map_err(|source| RetentionError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut entries: Vec<Entry> = read_dir
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            let path = entry.path();
            (metadata.is_file() && is_image(&path, extensions)).then(|| Entry {
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size: metadata.len(),
                path,
            })
        })
        .collect();

    entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
    Ok(entries)
}

/// Deletes every image in `dir` beyond the newest `max_images`. `0` disables the
/// pass. A file that cannot be removed is logged and skipped.
pub fn enforce_retention(
    dir: &Path,
    max_images: usize,
    extensions: &[String],
) -> Result<RetentionReport> {
    if max_images == 0 || !dir.exists() {
        return Ok(RetentionReport::default());
    }

    let entries = scan(dir, extensions)?;
    let mut report = RetentionReport {
        examined: entries.len(),
        ..RetentionReport::default()
    };
    if entries.len() <= max_images {
        return Ok(report);
    }

    let excess = entries.len() - max_images;
    for entry in entries.into_iter().take(excess) {
        match fs::remove_file(&entry.path) {
            Ok(()) => {
                info!("Removed old image: {:?}", entry.path);
                report.removed.push(entry.path);
            }
            Err(e) => {
                error!("Failed to remove {:?}: {}", entry.path, e);
                report.failed.push(entry.path);
            }
        }
    }

    debug!(
        "Retention pass over {:?}: {} examined, {} removed, {} failed",
        dir,
        report.examined,
        report.removed.len(),
        report.failed.len()
    );
    Ok(report)
}

/// Newest-first listing of at most `limit` images.
pub fn list_images(dir: &Path, extensions: &[String], limit: usize) -> Result<Vec<ImageInfo>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let images = scan(dir, extensions)?
        .into_iter()
        .rev()
        .take(limit)
        .filter_map(|entry| {
            Some(ImageInfo {
                filename: entry.path.file_name()?.to_string_lossy().into_owned(),
                timestamp: DateTime::<Utc>::from(entry.modified),
                size: entry.size,
            })
        })
        .collect();
    Ok(images)
}

/// Resolves `filename` inside `dir`, refusing anything that could escape it.
pub fn resolve_image(dir: &Path, filename: &str, extensions: &[String]) -> Result<PathBuf> {
    let plain = !filename.is_empty()
        && filename != "."
        && filename != ".."
        && !filename.contains(['/', '\\'])
        && is_image(Path::new(filename), extensions);
    if !plain {
        return Err(RetentionError::InvalidName(filename.to_string()).into());
    }

    let path = dir.join(filename);
    if !path.is_file() {
        return Err(RetentionError::NotFound(filename.to_string()).into());
    }
    Ok(path)
}

/// Explicit user deletion of one capture.
pub fn delete_image(dir: &Path, filename: &str, extensions: &[String]) -> Result<PathBuf> {
    let path = resolve_image(dir, filename, extensions)?;
    fs::remove_file(&path).map_err(|source| RetentionError::Delete {
        path: path.clone(),
        source,
    })?;
    info!("Deleted image: {:?}", path);
    Ok(path)
}

/// Writes every image in `dir` into a flat zip archive, oldest first.
pub fn archive_images<W: Write + Seek>(dir: &Path, extensions: &[String], writer: W) -> Result<W> {
    if !dir.is_dir() {
        return Err(RetentionError::NotFound(dir.display().to_string()).into());
    }

    // Captures are already compressed; favour speed.
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(1))
        .unix_permissions(0o644);

    let mut zip = ZipWriter::new(writer);
    let mut count = 0;
    for entry in scan(dir, extensions)? {
        let Some(name) = entry.path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let mut source = match fs::File::open(&entry.path) {
            Ok(file) => file,
            // Pruned between the scan and now.
            Err(e) => {
                debug!("Skipping {:?}: {}", entry.path, e);
                continue;
            }
        };
        zip.start_file(name, options).map_err(RetentionError::from)?;
        std::io::copy(&mut source, &mut zip)?;
        count += 1;
    }

    let writer = zip.finish().map_err(RetentionError::from)?;
    info!("Archived {} image(s) from {:?}", count, dir);
    Ok(writer)
}

/// MIME type for a stored capture, by extension.
pub fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use test_case::test_case;

    fn exts() -> Vec<String> {
        vec!["jpg".into(), "jpeg".into()]
    }

    /// Creates `count` images whose mtimes increase with their index.
    fn populate(count: usize) -> (TempDir, Vec<PathBuf>) {
        let dir = tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(86_400);
        let paths = (0..count)
            .map(|i| {
                let path = dir.path().join(format!("img_{:03}.jpg", i));
                let file = File::create(&path).unwrap();
                file.set_modified(base + Duration::from_secs(60 * i as u64))
                    .unwrap();
                path
            })
            .collect();
        (dir, paths)
    }

    #[test]
    fn twelve_images_keep_newest_ten() {
        let (dir, paths) = populate(12);

        let report = enforce_retention(dir.path(), 10, &exts()).unwrap();

        assert_eq!(report.examined, 12);
        assert_eq!(report.removed, paths[..2].to_vec());
        assert!(report.failed.is_empty());
        for path in &paths[..2] {
            assert!(!path.exists());
        }
        for path in &paths[2..] {
            assert!(path.exists());
        }
    }

    #[test_case(1)]
    #[test_case(5)]
    #[test_case(9)]
    fn retains_exactly_the_newest(max_images: usize) {
        let (dir, paths) = populate(9);

        enforce_retention(dir.path(), max_images, &exts()).unwrap();

        let kept: Vec<_> = paths.iter().filter(|p| p.exists()).cloned().collect();
        assert_eq!(kept, paths[paths.len() - max_images..].to_vec());
    }

    #[test]
    fn second_pass_is_a_noop() {
        let (dir, _) = populate(6);

        enforce_retention(dir.path(), 3, &exts()).unwrap();
        let again = enforce_retention(dir.path(), 3, &exts()).unwrap();

        assert_eq!(again.examined, 3);
        assert!(again.removed.is_empty());
    }

    #[test]
    fn zero_disables_retention() {
        let (dir, paths) = populate(4);

        let report = enforce_retention(dir.path(), 0, &exts()).unwrap();

        assert_eq!(report, RetentionReport::default());
        assert!(paths.iter().all(|p| p.exists()));
    }

    #[test]
    fn other_files_are_ignored() {
        let (dir, _) = populate(3);
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, "keep me").unwrap();
        std::fs::create_dir(dir.path().join("sub.jpg")).unwrap();

        enforce_retention(dir.path(), 1, &exts()).unwrap();

        assert!(notes.exists());
        assert!(dir.path().join("sub.jpg").is_dir());
        assert_eq!(list_images(dir.path(), &exts(), 50).unwrap().len(), 1);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("nope");

        assert_eq!(
            enforce_retention(&gone, 10, &exts()).unwrap(),
            RetentionReport::default()
        );
        assert!(list_images(&gone, &exts(), 50).unwrap().is_empty());
    }

    #[test]
    fn listing_is_newest_first_and_limited() {
        let (dir, _) = populate(5);

        let images = list_images(dir.path(), &exts(), 2).unwrap();

        let names: Vec<_> = images.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, vec!["img_004.jpg", "img_003.jpg"]);
    }

    #[test_case("../etc/passwd.jpg" ; "parent traversal")]
    #[test_case("a/b.jpg" ; "nested")]
    #[test_case("notes.txt" ; "not an image")]
    #[test_case("" ; "empty")]
    fn delete_rejects_unsafe_names(name: &str) {
        let (dir, _) = populate(1);
        assert!(matches!(
            delete_image(dir.path(), name, &exts()),
            Err(Error::Retention(RetentionError::InvalidName(_)))
        ));
    }

    #[test]
    fn delete_removes_one_image() {
        let (dir, paths) = populate(2);

        delete_image(dir.path(), "img_000.jpg", &exts()).unwrap();

        assert!(!paths[0].exists());
        assert!(paths[1].exists());
        assert!(matches!(
            delete_image(dir.path(), "img_000.jpg", &exts()),
            Err(Error::Retention(RetentionError::NotFound(_)))
        ));
    }

    #[test]
    fn archive_holds_every_image_flat() {
        let (dir, _) = populate(3);
        std::fs::write(dir.path().join("img_001.jpg"), b"JPEG").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let cursor = archive_images(dir.path(), &exts(), std::io::Cursor::new(Vec::new())).unwrap();

        let mut archive = zip::ZipArchive::new(cursor).unwrap();
        let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["img_000.jpg", "img_001.jpg", "img_002.jpg"]);

        let mut contents = Vec::new();
        std::io::Read::read_to_end(&mut archive.by_name("img_001.jpg").unwrap(), &mut contents)
            .unwrap();
        assert_eq!(contents, b"JPEG");
    }

    #[test]
    fn archive_of_missing_directory_is_not_found() {
        let dir = tempdir().unwrap();

        let result = archive_images(&dir.path().join("nope"), &exts(), std::io::Cursor::new(Vec::new()));

        assert!(matches!(
            result,
            Err(Error::Retention(RetentionError::NotFound(_)))
        ));
    }

    #[test_case("a.JPG", "image/jpeg")]
    #[test_case("a.jpeg", "image/jpeg")]
    #[test_case("a.png", "image/png")]
    #[test_case("a.tiff", "image/tiff")]
    #[test_case("a.raw", "application/octet-stream")]
    fn content_type_follows_extension(name: &str, expected: &str) {
        assert_eq!(content_type(Path::new(name)), expected);
    }
}

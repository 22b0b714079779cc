// backupvault/src/backup/archive.rs
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::ArchiveError;

/// Creates a deflate-compressed zip archive from one or more source trees.
///
/// Every regular file under each source is stored under a name relative to
/// the *parent* of that source, so `/srv/app/src/main.rs` archived from
/// `/srv/app` becomes `app/src/main.rs`. Directories are implied by the file
/// names and never written as entries.
///
/// Paths in `excluded`, and the destination itself, are skipped together
/// with everything beneath them. They must be spelled the way the walk
/// reports them, i.e. joined onto the source path.
///
/// On error the destination may hold a partial archive; removing it is up to
/// the caller.
///
/// # Returns
/// Number of file entries written.
pub fn create_zip_archive(
    archive_dest_path: &Path,
    source_paths: &[PathBuf],
    excluded: &[PathBuf],
) -> Result<usize, ArchiveError> {
    tracing::debug!(
        archive = %archive_dest_path.display(),
        sources = source_paths.len(),
        "Creating zip archive"
    );

    let archive_file = File::create(archive_dest_path)
        .map_err(|e| ArchiveError::io(archive_dest_path, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(archive_file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let skip = |path: &Path| path == archive_dest_path || excluded.iter().any(|x| path == x);

    let mut entries = 0usize;
    for source in source_paths {
        let base = source.parent().unwrap_or_else(|| Path::new(""));

        let walker = WalkDir::new(source)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !skip(e.path()));
        for entry in walker {
            let entry = entry.map_err(|e| ArchiveError::Walk {
                root: source.clone(),
                source: e,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let name = entry_name(path.strip_prefix(base).unwrap_or(path));

            zip.start_file(name.as_str(), options)
                .map_err(|e| ArchiveError::Zip {
                    entry: name.clone(),
                    source: e,
                })?;
            let mut reader =
                BufReader::new(File::open(path).map_err(|e| ArchiveError::io(path, e))?);
            io::copy(&mut reader, &mut zip).map_err(|e| ArchiveError::io(path, e))?;
            entries += 1;
        }
    }

    let writer = zip.finish().map_err(|e| ArchiveError::Zip {
        entry: "<central directory>".to_string(),
        source: e,
    })?;
    writer
        .into_inner()
        .map_err(|e| ArchiveError::io(archive_dest_path, e.into_error()))?
        .sync_all()
        .map_err(|e| ArchiveError::io(archive_dest_path, e))?;

    tracing::info!(
        archive = %archive_dest_path.display(),
        entries,
        "Zip archive created"
    );
    Ok(entries)
}

/// Extracts a zip archive into `extract_to_dir`, refusing entries whose
/// names would land outside it.
///
/// # Returns
/// Paths of the extracted files.
pub fn extract_zip_archive(
    archive_path: &Path,
    extract_to_dir: &Path,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let archive_file =
        File::open(archive_path).map_err(|e| ArchiveError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(BufReader::new(archive_file)).map_err(|e| {
        ArchiveError::Zip {
            entry: archive_path.display().to_string(),
            source: e,
        }
    })?;

    fs::create_dir_all(extract_to_dir).map_err(|e| ArchiveError::io(extract_to_dir, e))?;

    let mut extracted = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(|e| ArchiveError::Zip {
            entry: format!("#{index}"),
            source: e,
        })?;
        let relative = file
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafeEntry(file.name().to_string()))?;
        let target = extract_to_dir.join(relative);

        if file.is_dir() {
            fs::create_dir_all(&target).map_err(|e| ArchiveError::io(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
        }
        let mut out = File::create(&target).map_err(|e| ArchiveError::io(&target, e))?;
        io::copy(&mut file, &mut out).map_err(|e| ArchiveError::io(&target, e))?;
        extracted.push(target);
    }

    tracing::info!(
        archive = %archive_path.display(),
        destination = %extract_to_dir.display(),
        files = extracted.len(),
        "Zip archive extracted"
    );
    Ok(extracted)
}

// Forward slashes regardless of host separator.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

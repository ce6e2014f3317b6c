//! Zip packing and unpacking for result-set exchange.

use std::fs::File;
use std::io;
use std::path::Path;

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

/// Pack a directory tree into a zip archive. Entry names are relative to
/// `src_dir`, so unpacking reproduces the tree without its parent.
pub fn zip_dir(src_dir: &Path, zip_path: &Path) -> Result<()> {
    let file = File::create(zip_path)?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    add_entries(&mut writer, src_dir, src_dir, options)?;
    writer.finish()?;
    Ok(())
}

fn add_entries(
    writer: &mut ZipWriter<File>,
    root: &Path,
    dir: &Path,
    options: FileOptions,
) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .collect::<io::Result<Vec<_>>>()?
        .into_iter()
        .map(|entry| entry.path())
        .collect();
    entries.sort();

    for path in entries {
        let name = path
            .strip_prefix(root)
            .map_err(|e| Error::Archive(e.to_string()))?
            .to_string_lossy()
            .into_owned();

        if path.is_dir() {
            writer.add_directory(format!("{name}/"), options)?;
            add_entries(writer, root, &path, options)?;
        } else {
            writer.start_file(name, options)?;
            let mut source = File::open(&path)?;
            io::copy(&mut source, writer)?;
        }
    }

    Ok(())
}

/// Unpack an archive into `dest`, skipping entries whose names would escape
/// the destination directory.
pub fn unzip(zip_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(zip_path)?;
    let mut archive = ZipArchive::new(file)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = match entry.enclosed_name() {
            Some(name) => name.to_owned(),
            None => continue,
        };
        let out_path = dest.join(name);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out_file = File::create(&out_path)?;
            io::copy(&mut entry, &mut out_file)?;
        }
    }

    Ok(())
}

use std::{
    fs::File,
    io::{self, BufReader, BufWriter},
    path::Path,
};

use anyhow::{anyhow, Context, Result};
use glob::glob;
use log::debug;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

fn options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Packs a single file into `dest`, stored under its own file name.
pub fn zip_file(source: &Path, dest: &Path) -> Result<()> {
    let name = source
        .file_name()
        .ok_or_else(|| anyhow!("Not a file path: {}", source.display()))?
        .to_string_lossy()
        .into_owned();

    let out = File::create(dest)
        .with_context(|| format!("Failed to create archive: {}", dest.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(out));
    add_file(&mut zip, source, name)?;
    zip.finish()
        .with_context(|| format!("Failed to finalize archive: {}", dest.display()))?;
    debug!("Packed {} into {}", source.display(), dest.display());
    Ok(())
}

/// Packs every file below `source_dir` into `dest` with entries named
/// `<entry_prefix>/<relative path>`. Returns the number of entries.
pub fn zip_directory(source_dir: &Path, entry_prefix: &str, dest: &Path) -> Result<usize> {
    let pattern = format!("{}/**/*", source_dir.display());
    let mut files = Vec::new();
    for entry in glob(&pattern).context("Failed to read glob pattern")? {
        let path = entry?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let out = File::create(dest)
        .with_context(|| format!("Failed to create archive: {}", dest.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(out));
    for path in &files {
        let relative = path.strip_prefix(source_dir).unwrap_or(path);
        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let name = if entry_prefix.is_empty() {
            components.join("/")
        } else {
            format!("{}/{}", entry_prefix, components.join("/"))
        };
        add_file(&mut zip, path, name)?;
    }
    zip.finish()
        .with_context(|| format!("Failed to finalize archive: {}", dest.display()))?;
    debug!("Packed {} files from {} into {}", files.len(), source_dir.display(), dest.display());
    Ok(files.len())
}

fn add_file<W: io::Write + io::Seek>(zip: &mut ZipWriter<W>, source: &Path, name: String) -> Result<()> {
    let file = File::open(source)
        .with_context(|| format!("Failed to open file: {}", source.display()))?;
    zip.start_file(name.as_str(), options())
        .with_context(|| format!("Failed to add archive entry: {}", name))?;
    io::copy(&mut BufReader::new(file), zip)
        .with_context(|| format!("Failed to compress: {}", source.display()))?;
    Ok(())
}

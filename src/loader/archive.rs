/// `loader/archive.rs` - reads pack entries out of an archive
///
/// Packs are zip files or tar archives, the tar optionally gzip-compressed.
/// The container is detected from the first bytes. Every entry is fully
/// read into memory before any script runs, and the underlying stream is
/// dropped on every exit path.
use std::io::{BufRead, Cursor, Read, Seek};

use flate2::bufread::GzDecoder;

use super::entry::{classify, sort_entries, ContentEntry, EntryKind, EntryPayload, JsonObject};
use crate::error::ReadError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_MAGIC: [u8; 2] = *b"PK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Zip,
    GzipTar,
    Tar,
}

impl Container {
    fn sniff(head: &[u8]) -> Self {
        if head.starts_with(&ZIP_MAGIC) {
            Self::Zip
        } else if head.starts_with(&GZIP_MAGIC) {
            Self::GzipTar
        } else {
            Self::Tar
        }
    }
}

/// Read, classify and sort every pack entry in the archive.
pub fn read_entries<R: BufRead>(mut reader: R, max_entry_bytes: u64) -> Result<Vec<ContentEntry>, ReadError> {
    let container = Container::sniff(reader.fill_buf()?);
    log::debug!("reading pack archive as {container:?}");

    let mut entries = match container {
        Container::Zip => {
            // The zip directory sits at the end, so the archive needs seeking.
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            collect_zip(Cursor::new(bytes), max_entry_bytes)?
        }
        Container::GzipTar => collect_tar(GzDecoder::new(reader), max_entry_bytes)?,
        Container::Tar => collect_tar(reader, max_entry_bytes)?,
    };
    sort_entries(&mut entries);
    Ok(entries)
}

fn collect_tar<R: Read>(reader: R, max_entry_bytes: u64) -> Result<Vec<ContentEntry>, ReadError> {
    let mut archive = tar::Archive::new(reader);
    let mut entries = Vec::new();

    for entry in archive.entries()? {
        let entry = entry?;
        let path = normalize(&String::from_utf8_lossy(&entry.path_bytes()));

        let entry_type = entry.header().entry_type();
        if !entry_type.is_file() {
            if !entry_type.is_dir() {
                log::warn!("skipping non-file entry {path}");
            }
            continue;
        }

        let size = entry.size();
        if let Some(content) = read_entry(path, size, entry, max_entry_bytes)? {
            entries.push(content);
        }
    }

    Ok(entries)
}

fn collect_zip<R: Read + Seek>(reader: R, max_entry_bytes: u64) -> Result<Vec<ContentEntry>, ReadError> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut entries = Vec::new();

    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let path = normalize(file.name());
        let size = file.size();
        if let Some(content) = read_entry(path, size, file, max_entry_bytes)? {
            entries.push(content);
        }
    }

    Ok(entries)
}

/// Classify one file entry and read its body. `None` for non-pack files.
fn read_entry<R: Read>(
    path: String,
    size: u64,
    body: R,
    max_entry_bytes: u64,
) -> Result<Option<ContentEntry>, ReadError> {
    let Some((kind, params)) = classify(&path) else {
        log::debug!("ignoring {path}");
        return Ok(None);
    };

    if size > max_entry_bytes {
        return Err(ReadError::EntryTooLarge {
            path,
            size,
            limit: max_entry_bytes,
        });
    }

    // The declared size is not trusted for the read itself.
    let mut bytes = Vec::with_capacity(size as usize);
    body.take(max_entry_bytes.saturating_add(1)).read_to_end(&mut bytes)?;
    let read = bytes.len() as u64;
    if read > max_entry_bytes {
        return Err(ReadError::EntryTooLarge {
            path,
            size: read,
            limit: max_entry_bytes,
        });
    }

    let payload = match kind {
        EntryKind::PackOptions => EntryPayload::Options(parse_options(&path, &bytes)?),
        _ => EntryPayload::Script(bytes),
    };
    log::debug!("classified {path} as {}", kind.as_str());
    Ok(Some(ContentEntry::new(kind, params, path, payload)))
}

fn parse_options(path: &str, bytes: &[u8]) -> Result<JsonObject, ReadError> {
    match serde_json::from_slice(bytes) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(ReadError::OptionsNotObject {
            path: path.to_string(),
        }),
        Err(source) => Err(ReadError::InvalidOptions {
            path: path.to_string(),
            source,
        }),
    }
}

/// Archivers often prefix members with `./`.
fn normalize(path: &str) -> String {
    let mut path = path.replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    path
}

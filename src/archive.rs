use std::io::{self, Cursor, Write};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::installer::InstallError;
use crate::release::{Archive, ArchiveFormat};

/// Copy the entry named `executable` out of `archive` into `dest`.
///
/// Entries match on their final path component, so both `nitro` and
/// `nitro_linux_x86_64/nitro` are found.
pub fn extract_executable<W: Write>(
    archive: &Archive,
    executable: &str,
    dest: &mut W,
) -> Result<u64, InstallError> {
    let copied = match archive.format {
        ArchiveFormat::Zip => extract_from_zip(&archive.bytes, executable, dest)?,
        ArchiveFormat::TarGz => extract_from_tar_gz(&archive.bytes, executable, dest)?,
    };

    copied.ok_or_else(|| InstallError::MissingExecutable {
        archive: archive.name.clone(),
        executable: executable.to_string(),
    })
}

fn extract_from_zip<W: Write>(
    data: &[u8],
    executable: &str,
    dest: &mut W,
) -> Result<Option<u64>, InstallError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|err| InstallError::Extract(format!("reading zip archive: {err}")))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|err| InstallError::Extract(format!("reading zip entry {i}: {err}")))?;
        if entry.is_dir() || !file_name_matches(entry.name(), executable) {
            continue;
        }

        let copied = io::copy(&mut entry, dest)?;
        return Ok(Some(copied));
    }

    Ok(None)
}

fn extract_from_tar_gz<W: Write>(
    data: &[u8],
    executable: &str,
    dest: &mut W,
) -> Result<Option<u64>, InstallError> {
    let mut tar = tar::Archive::new(GzDecoder::new(data));
    let entries = tar
        .entries()
        .map_err(|err| InstallError::Extract(format!("reading tar entries: {err}")))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|err| InstallError::Extract(format!("reading tar entry: {err}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|err| InstallError::Extract(format!("reading tar entry path: {err}")))?
            .to_string_lossy()
            .to_string();
        if !file_name_matches(&path, executable) {
            continue;
        }

        let copied = io::copy(&mut entry, dest)?;
        return Ok(Some(copied));
    }

    Ok(None)
}

fn file_name_matches(entry: &str, executable: &str) -> bool {
    Path::new(entry)
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name == executable)
}

use std::collections::HashMap;
use std::io::Read;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;
use tracing::debug;

use crate::PrepError;

// Read the named members of a .tar.gz stream into memory. Members are matched
// on their full path inside the archive and every name must be present.
pub fn read_members(reader: impl Read, names: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut members = HashMap::with_capacity(names.len());

    for entry in archive.entries().context("failed to read tar archive")? {
        let mut entry = entry.context("failed to read tar entry")?;
        let path = entry.path()?.to_string_lossy().into_owned();
        let path = path.trim_start_matches("./");
        if !names.contains(&path) {
            continue;
        }
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to extract {}", path))?;
        debug!("Extracted {} ({} bytes)", path, data.len());
        members.insert(path.to_string(), data);
        // Members are streamed, stop as soon as everything has been seen
        if members.len() == names.len() {
            break;
        }
    }

    if let Some(missing) = names.iter().find(|name| !members.contains_key(**name)) {
        return Err(PrepError::MissingMember(missing.to_string()).into());
    }
    Ok(members)
}

// Remove a member returned by read_members
pub fn take_member(members: &mut HashMap<String, Vec<u8>>, name: &str) -> Result<Vec<u8>, PrepError> {
    members
        .remove(name)
        .ok_or_else(|| PrepError::MissingMember(name.to_string()))
}

// Read exactly `len` bytes. The buffer grows with what the stream actually
// holds, so a corrupt size field cannot force a huge allocation up front.
pub(crate) fn read_sized(reader: &mut impl Read, len: usize, what: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    (&mut *reader)
        .take(len as u64)
        .read_to_end(&mut data)
        .with_context(|| format!("failed to read {}", what))?;
    if data.len() < len {
        return Err(PrepError::Truncated {
            what: what.to_string(),
            expected: len,
            found: data.len(),
        }
        .into());
    }
    Ok(data)
}

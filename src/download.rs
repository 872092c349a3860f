use std::io::Seek;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::{debug, info};

// Download a URL into a temporary file. The file is deleted when the returned
// handle is dropped, whether or not the caller got to use it.
pub fn fetch(url: &str) -> Result<NamedTempFile> {
    info!("Downloading {}", url);
    let client = reqwest::blocking::Client::builder()
        // Large archives take minutes; there is no deadline on a download
        .timeout(None)
        .build()
        .context("failed to build HTTP client")?;
    let mut response = client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .with_context(|| format!("failed to download {}", url))?;

    let mut file = NamedTempFile::new().context("failed to create temporary file")?;
    let size = response
        .copy_to(&mut file)
        .with_context(|| format!("failed to read response body from {}", url))?;
    file.rewind()?;
    debug!("Downloaded {} bytes from {} to {:?}", size, url, file.path());
    Ok(file)
}

use anyhow::{Context, Result};
use reqwest::Client;
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use tokio::fs;
use url::Url;
use zip::ZipArchive;

/// Download the given ZIP URL and save it under `dest_dir` using the original filename.
/// Returns the full path of the saved file.
pub async fn download_zip(
    client: &Client,
    url_str: &str,
    dest_dir: impl AsRef<Path>,
) -> Result<PathBuf> {
    let dest_dir = dest_dir.as_ref();
    let url = Url::parse(url_str).with_context(|| format!("parsing archive URL {}", url_str))?;
    let filename = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("data.zip");
    let dest_path = dest_dir.join(filename);

    if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let resp = client
        .get(url.as_str())
        .send()
        .await
        .with_context(|| format!("GET {}", url))?
        .error_for_status()
        .with_context(|| format!("GET {}", url))?;
    let bytes = resp
        .bytes()
        .await
        .with_context(|| format!("reading body from {}", url))?;
    fs::write(&dest_path, &bytes)
        .await
        .with_context(|| format!("writing {}", dest_path.display()))?;

    Ok(dest_path)
}

/// Extract every entry of `zip_path` into `dest_dir`. Blocking.
pub fn extract_zip(zip_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(zip_path)
        .with_context(|| format!("Failed to open ZIP file: {:?}", zip_path))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Failed to read ZIP archive: {:?}", zip_path))?;
    std::fs::create_dir_all(dest_dir)?;
    archive
        .extract(dest_dir)
        .with_context(|| format!("extracting {:?} into {:?}", zip_path, dest_dir))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    #[test]
    fn extracts_nested_entries() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("data.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&zip_path)?);
            let options = SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            zip.start_file("CallReport/FOICU.txt", options)?;
            zip.write_all(b"CU_NUMBER\n1\n")?;
            zip.finish()?;
        }

        let out = dir.path().join("data");
        extract_zip(&zip_path, &out)?;
        let text = std::fs::read_to_string(out.join("CallReport").join("FOICU.txt"))?;
        assert_eq!(text, "CU_NUMBER\n1\n");
        Ok(())
    }

    #[test]
    fn corrupt_zip_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("bad.zip");
        std::fs::write(&zip_path, b"not a zip")?;
        assert!(extract_zip(&zip_path, &dir.path().join("out")).is_err());
        Ok(())
    }
}

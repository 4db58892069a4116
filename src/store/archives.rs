use std::io::Cursor;
use std::path::Path;
use tokio_tar::{Builder, Header};

/// Entry name the engine reads build instructions from.
pub const MANIFEST_ENTRY: &str = "Dockerfile";

/// Pack a build context for the container engine: the whole source tree plus
/// the rendered manifest as the `Dockerfile` entry. The source tree on disk is
/// left untouched.
pub async fn pack_context(source: &Path, manifest: &str) -> std::io::Result<Vec<u8>> {
    let mut builder = Builder::new(Cursor::new(Vec::new()));

    builder.append_dir_all(".", source).await?;

    let mut header = Header::new_gnu();
    header.set_size(manifest.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, MANIFEST_ENTRY, manifest.as_bytes())
        .await?;

    let cursor = builder.into_inner().await?;
    Ok(cursor.into_inner())
}

//! Remote artifact copy
//!
//! Artifacts are pulled out of a running container by exec'ing
//! `tar czf - -C <path> .` and unpacking the gzipped stream as it arrives.
//! The stream never lands in memory whole: the exec stdout is bridged into a
//! blocking gzip + tar reader so peak memory stays bounded by the decoder
//! buffers, while entry paths are sanitized against traversal outside the
//! destination directory.

use crate::platform::PlatformClient;
use crate::types::{Error, Result};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};

/// Copies above this size get a summary log line for operator visibility.
const LARGE_COPY_BYTES: u64 = 1 << 20;

/// Stream a tar archive of `src_paths` out of a container and unpack it
/// under `dest`. Returns the number of file bytes written.
pub async fn copy_from_container(
    platform: &dyn PlatformClient,
    pod: &str,
    container: &str,
    src_paths: &[&str],
    dest: &Path,
) -> Result<u64> {
    let mut command = vec!["tar".to_string(), "czf".to_string(), "-".to_string()];
    for path in src_paths {
        command.push("-C".to_string());
        command.push((*path).to_string());
        command.push(".".to_string());
    }

    let session = platform.exec_stream(pod, container, command).await?;
    let reader = SyncIoBridge::new(session.stdout);
    let dest = dest.to_path_buf();
    let unpack = tokio::task::spawn_blocking(move || unpack_archive(reader, &dest));

    let (unpacked, status) = tokio::join!(unpack, session.status);
    let bytes = unpacked
        .map_err(|err| Error::GenericError(anyhow::anyhow!("archive unpacker panicked: {err}")))??;
    status?;

    if bytes > LARGE_COPY_BYTES {
        info!("copied {bytes} bytes of artifacts from pod {pod}");
    }
    Ok(bytes)
}

/// Unpack a gzipped tar stream under `dest`, skipping anything that would
/// land outside it. Runs on a blocking thread.
fn unpack_archive<R: Read>(reader: R, dest: &Path) -> Result<u64> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut total = 0u64;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.into_owned();

        let Some(relative) = sanitize_entry_path(&raw) else {
            debug!("skipping tar entry {}", raw.display());
            continue;
        };
        let target = dest.join(&relative);

        if entry.header().entry_type().is_dir() {
            create_dir(&target)?;
            continue;
        }
        if let Some(link) = entry.link_name()? {
            warn!(
                "skipping link entry {} -> {} in artifact stream",
                raw.display(),
                link.display()
            );
            continue;
        }
        if let Some(parent) = target.parent() {
            create_dir(parent)?;
        }
        let mut file = std::fs::File::create(&target)?;
        total += std::io::copy(&mut entry, &mut file)?;
    }
    Ok(total)
}

#[cfg(unix)]
fn create_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o750)
        .create(path)
}

#[cfg(not(unix))]
fn create_dir(path: &Path) -> std::io::Result<()> {
    std::fs::DirBuilder::new().recursive(true).create(path)
}

/// Normalize a tar entry name to a path strictly below the destination.
/// Returns `None` for the archive root, absolute names, and any name that
/// escapes upward.
fn sanitize_entry_path(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => clean.push(part),
            Component::ParentDir => {
                if !clean.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

//! Release staging and checksum verification
//!
//! Before any host is touched, the artifact tree is copied into a staging
//! directory with the configured exclusion globs applied (gitignore
//! semantics). The staged tree is what the transport ships, and what the
//! digest is computed over, so every host receives byte-identical content.

use std::fs;
use std::path::{Path, PathBuf};

use ignore::gitignore::GitignoreBuilder;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::error::{ConvoyError, ConvoyResult};
use crate::models::Release;

/// A staged artifact tree, deleted when dropped.
#[derive(Debug)]
pub struct StagedArtifact {
    dir: TempDir,
    /// Relative paths of staged files, sorted
    pub files: Vec<PathBuf>,
    /// "sha256:<hex>" digest over the staged tree
    pub digest: String,
}

impl StagedArtifact {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Stage a release's artifact tree, applying exclusion globs.
///
/// Validates the declared checksum (if any) against the staged digest.
pub fn stage(release: &Release, excludes: &[String]) -> ConvoyResult<StagedArtifact> {
    if !release.artifact.is_dir() {
        return Err(ConvoyError::ArtifactNotFound {
            path: release.artifact.clone(),
        });
    }

    let matcher = build_matcher(&release.artifact, excludes)?;
    let dir = tempfile::tempdir()?;

    let mut files = Vec::new();
    copy_tree(&release.artifact, Path::new(""), dir.path(), &matcher, &mut files)?;
    files.sort();

    let digest = digest_tree(dir.path(), &files)?;

    if let Some(expected) = &release.checksum {
        if expected != &digest {
            return Err(ConvoyError::ChecksumMismatch {
                expected: expected.clone(),
                actual: digest,
            });
        }
    }

    Ok(StagedArtifact { dir, files, digest })
}

fn build_matcher(
    root: &Path,
    excludes: &[String],
) -> ConvoyResult<ignore::gitignore::Gitignore> {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in excludes {
        builder
            .add_line(None, pattern)
            .map_err(|e| ConvoyError::Config {
                message: format!("invalid exclude pattern '{}': {}", pattern, e),
            })?;
    }
    builder.build().map_err(|e| ConvoyError::Config {
        message: format!("cannot build exclude matcher: {}", e),
    })
}

fn copy_tree(
    src_root: &Path,
    rel: &Path,
    dst_root: &Path,
    matcher: &ignore::gitignore::Gitignore,
    files: &mut Vec<PathBuf>,
) -> ConvoyResult<()> {
    let src_dir = src_root.join(rel);
    for entry in fs::read_dir(&src_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let rel_path = rel.join(&name);
        let is_dir = entry.file_type()?.is_dir();

        if matcher
            .matched_path_or_any_parents(&rel_path, is_dir)
            .is_ignore()
        {
            continue;
        }

        if is_dir {
            fs::create_dir_all(dst_root.join(&rel_path))?;
            copy_tree(src_root, &rel_path, dst_root, matcher, files)?;
        } else {
            let dst = dst_root.join(&rel_path);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dst)?;
            files.push(rel_path);
        }
    }
    Ok(())
}

/// Digest over sorted relative paths and file contents, "sha256:" prefixed.
fn digest_tree(root: &Path, sorted_files: &[PathBuf]) -> ConvoyResult<String> {
    let mut hasher = Sha256::new();
    for rel in sorted_files {
        // Path separators normalized so the digest is platform-stable
        let rel_str = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        hasher.update(rel_str.as_bytes());
        hasher.update([0u8]);
        hasher.update(fs::read(root.join(rel))?);
        hasher.update([0u8]);
    }
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

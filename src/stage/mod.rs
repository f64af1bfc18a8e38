//! Mountpoint staging.
//!
//! Every image that packages "the whole tree under its mountpoint" must see
//! only that subtree. Staging copies the source filesystem tree once into
//! `<tmp>/root`, then splits each declared mountpoint out into its own
//! directory `<tmp>/<path>`, removing it from the root copy. Handlers then
//! read exactly one staging directory each.
//!
//! The temp directory is run-scoped: it must start absent or empty, is
//! written only here, and is wiped on every exit path.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::image::catalog::Catalog;
use crate::image::Image;

/// A staging location, deduplicated by path.
#[derive(Debug, Clone)]
pub struct Mountpoint {
    /// Path relative to the source tree; empty string is the tree root.
    pub path: String,
    /// Absolute staging directory under the run temp root.
    pub mountpath: PathBuf,
}

/// The full set of staging directories for one run.
///
/// The root mountpoint (`path = ""`, mapped to `<tmp>/root`) always exists
/// and is always first.
#[derive(Debug)]
pub struct MountSet {
    mounts: Vec<Mountpoint>,
}

impl MountSet {
    /// Materialize the staging tree for every mountpoint the catalog declares.
    ///
    /// Copies the source tree into `<tmp>/root`, then relocates each non-root
    /// mountpoint subtree to `<tmp>/<path>`. Nested mountpoints are rejected
    /// up front: relocations are only independent when no mountpoint path
    /// contains another.
    pub fn collect(catalog: &Catalog, rootpath: &Path, tmppath: &Path) -> Result<Self> {
        let mut set = MountSet {
            mounts: vec![Mountpoint {
                path: String::new(),
                mountpath: tmppath.join("root"),
            }],
        };

        fs::create_dir_all(tmppath)
            .with_context(|| format!("creating staging directory '{}'", tmppath.display()))?;
        copy_tree(rootpath, &tmppath.join("root")).with_context(|| {
            format!(
                "copying source tree '{}' into staging area",
                rootpath.display()
            )
        })?;

        for image in catalog.images() {
            if let Some(path) = image.mountpoint.as_deref() {
                set.add(path, tmppath);
            }
        }

        set.reject_nested()?;

        for mount in &set.mounts {
            if mount.path.is_empty() {
                continue;
            }
            let source = tmppath.join("root").join(&mount.path);
            if !source.is_dir() {
                bail!(
                    "mountpoint '{}' does not exist in the source tree",
                    mount.path
                );
            }
            move_subtree(&source, &mount.mountpath)
                .with_context(|| format!("relocating mountpoint '{}'", mount.path))?;
        }

        Ok(set)
    }

    /// Record `path` if it is new. Repeated requests for the same path reuse
    /// the existing record; the empty path is the root.
    fn add(&mut self, path: &str, tmppath: &Path) {
        if self.mounts.iter().any(|m| m.path == path) {
            return;
        }
        self.mounts.push(Mountpoint {
            path: path.to_string(),
            mountpath: tmppath.join(path),
        });
    }

    fn reject_nested(&self) -> Result<()> {
        for outer in &self.mounts {
            if outer.path.is_empty() {
                continue;
            }
            for inner in &self.mounts {
                if inner.path.len() > outer.path.len()
                    && inner.path.starts_with(&outer.path)
                    && inner.path.as_bytes()[outer.path.len()] == b'/'
                {
                    bail!(
                        "nested mountpoints are not supported: '{}' contains '{}'",
                        outer.path,
                        inner.path
                    );
                }
            }
        }
        Ok(())
    }

    /// Resolve an image's declared mountpoint to its staging directory.
    ///
    /// Images without a mountpoint (and the empty path) resolve to the root
    /// staging directory.
    pub fn mountpath_for(&self, image: &Image) -> &Path {
        let path = image.mountpoint.as_deref().unwrap_or("");
        self.mounts
            .iter()
            .find(|m| m.path == path)
            .unwrap_or(&self.mounts[0])
            .mountpath
            .as_path()
    }

    pub fn mounts(&self) -> &[Mountpoint] {
        &self.mounts
    }

    #[cfg(test)]
    pub(crate) fn root_only(tmppath: &Path) -> Self {
        MountSet {
            mounts: vec![Mountpoint {
                path: String::new(),
                mountpath: tmppath.join("root"),
            }],
        }
    }
}

/// Require the staging directory to be absent (created here) or empty.
///
/// A populated directory aborts the run rather than clobbering unrelated
/// data.
pub fn check_tmp_path(tmppath: &Path) -> Result<()> {
    if !tmppath.exists() {
        fs::create_dir_all(tmppath)
            .with_context(|| format!("creating staging directory '{}'", tmppath.display()))?;
        return Ok(());
    }

    let mut entries = fs::read_dir(tmppath)
        .with_context(|| format!("reading staging directory '{}'", tmppath.display()))?;
    if entries.next().is_some() {
        bail!(
            "staging directory '{}' exists and is not empty",
            tmppath.display()
        );
    }
    Ok(())
}

/// Wipe the contents of the staging directory, keeping the directory itself.
pub fn cleanup(tmppath: &Path) -> Result<()> {
    if !tmppath.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(tmppath)
        .with_context(|| format!("reading staging directory '{}'", tmppath.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("removing '{}'", path.display()))?;
        } else {
            fs::remove_file(&path)
                .with_context(|| format!("removing '{}'", path.display()))?;
        }
    }
    Ok(())
}

/// Recursively copy a directory tree, preserving symlinks.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        bail!("source tree '{}' is not a directory", src.display());
    }

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("walking '{}'", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("walking '{}'", src.display()))?;
        let target = dst.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("creating directory '{}'", target.display()))?;
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(entry.path())
                .with_context(|| format!("reading link '{}'", entry.path().display()))?;
            std::os::unix::fs::symlink(&link_target, &target)
                .with_context(|| format!("creating symlink '{}'", target.display()))?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "copying '{}' to '{}'",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }
    Ok(())
}

/// Move a subtree to a new location, creating the destination's parent.
///
/// Source and destination are both under the staging root, so a plain rename
/// suffices.
pub(crate) fn move_subtree(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))?;
    }
    fs::rename(src, dst).with_context(|| {
        format!("moving '{}' to '{}'", src.display(), dst.display())
    })
}

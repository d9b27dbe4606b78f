//! Caching of fully prepared environments.
//!
//! A snapshot slot holds the captured on-disk state of a repo dir under
//! `state/`, plus an `initialized` marker that is written only once the
//! capture is complete. A slot without the marker is rebuilt from scratch, so
//! an interrupted build can never be mistaken for a usable snapshot.

use std::fs;
use std::process::Command;

use anyhow::{ensure, Context};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

/// How a snapshot is captured on a cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStrategy {
    /// Recursively copy the work dir into the slot after the build.
    CopyTree,
    /// Mount the work dir as an overlayfs whose lower layer is the (empty)
    /// slot; capture by detaching the overlay and promoting its upper (delta)
    /// layer into the slot. Requires mount privileges.
    OverlayFs,
}

/// Root directory holding snapshot slots.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    root: Utf8PathBuf,
}

impl SnapshotCache {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    /// The slot for one scenario at one fleet size. Changing either gets a
    /// fresh slot.
    pub fn slot(&self, scenario: &str, ncopies: usize) -> SnapshotDir {
        SnapshotDir::new(self.root.join(format!("{scenario}-{ncopies}")))
    }
}

/// A named cache slot for one prepared environment.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    path: Utf8PathBuf,
}

impl SnapshotDir {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn state_path(&self) -> Utf8PathBuf {
        self.path.join("state")
    }

    fn marker_path(&self) -> Utf8PathBuf {
        self.path.join("initialized")
    }

    fn upper_path(&self) -> Utf8PathBuf {
        self.path.join("upper")
    }

    fn overlay_work_path(&self) -> Utf8PathBuf {
        self.path.join("work")
    }

    pub fn is_initialized(&self) -> bool {
        self.marker_path().exists()
    }

    /// On a hit, restore the captured state into `work_dir` and skip `build`
    /// entirely. On a miss, run `build` against `work_dir` and, if `retain`
    /// is set, capture the result and mark the slot initialized. A failed
    /// build leaves the slot uninitialized.
    ///
    /// With [`SnapshotStrategy::OverlayFs`] the work dir is a freshly mounted
    /// empty overlay when `build` runs; `build` must populate it from
    /// scratch.
    pub fn get_or_build(
        &self,
        work_dir: &Utf8Path,
        strategy: SnapshotStrategy,
        retain: bool,
        build: impl FnOnce() -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        if self.is_initialized() {
            info!("snapshot hit, restoring {} into {work_dir}", self.path);
            return self.restore(work_dir);
        }

        // Leftovers of an interrupted capture are not trustworthy.
        if self.path.exists() {
            fs::remove_dir_all(&self.path).with_context(|| format!("clear {}", self.path))?;
        }
        fs::create_dir_all(&self.path).with_context(|| format!("create {}", self.path))?;

        let overlay = retain && strategy == SnapshotStrategy::OverlayFs;
        if overlay {
            ensure!(
                !work_dir.exists(),
                "overlay mountpoint {work_dir} must not exist yet"
            );
            fs::create_dir_all(work_dir)?;
            fs::create_dir(self.state_path())?;
            fs::create_dir(self.upper_path())?;
            fs::create_dir(self.overlay_work_path())?;
            overlay_mount(
                &self.state_path(),
                &self.upper_path(),
                &self.overlay_work_path(),
                work_dir,
            )?;
        }

        if let Err(e) = build() {
            if overlay {
                let _ = overlay_unmount(work_dir);
            }
            return Err(e);
        }

        if !retain {
            info!("skip taking snapshot");
            return Ok(());
        }

        match strategy {
            SnapshotStrategy::CopyTree => {
                info!("taking snapshot of {work_dir} by recursive copy");
                copy_dir_recursive(work_dir, &self.state_path())?;
            }
            SnapshotStrategy::OverlayFs => {
                info!("taking snapshot of {work_dir} from the overlay upper layer");
                overlay_unmount(work_dir)?;
                // The lower layer was empty, so the upper layer is the whole
                // captured state.
                fs::remove_dir(self.state_path())?;
                fs::rename(self.upper_path(), self.state_path())?;
                // Remount the captured slot as the live work dir, with fresh
                // scratch dirs.
                fs::create_dir(self.upper_path())?;
                fs::remove_dir_all(self.overlay_work_path())?;
                fs::create_dir(self.overlay_work_path())?;
                overlay_mount(
                    &self.state_path(),
                    &self.upper_path(),
                    &self.overlay_work_path(),
                    work_dir,
                )?;
            }
        }
        // Only now does the slot count as a hit.
        fs::write(self.marker_path(), b"")
            .with_context(|| format!("write marker {}", self.marker_path()))?;
        Ok(())
    }

    /// Restore the captured state into `work_dir`, replacing whatever is
    /// there.
    pub fn restore(&self, work_dir: &Utf8Path) -> anyhow::Result<()> {
        ensure!(
            self.is_initialized(),
            "snapshot {} is not initialized",
            self.path
        );
        if work_dir.exists() {
            fs::remove_dir_all(work_dir).with_context(|| format!("clear {work_dir}"))?;
        }
        copy_dir_recursive(&self.state_path(), work_dir)
    }
}

fn overlay_mount(
    lower: &Utf8Path,
    upper: &Utf8Path,
    work: &Utf8Path,
    mountpoint: &Utf8Path,
) -> anyhow::Result<()> {
    let options = format!("lowerdir={lower},upperdir={upper},workdir={work}");
    let output = Command::new("mount")
        .args(["-t", "overlay", "overlay", "-o", &options, mountpoint.as_str()])
        .output()
        .context("run mount")?;
    ensure!(
        output.status.success(),
        "mount overlay on {mountpoint} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

fn overlay_unmount(mountpoint: &Utf8Path) -> anyhow::Result<()> {
    let output = Command::new("umount")
        .arg(mountpoint.as_str())
        .output()
        .context("run umount")?;
    ensure!(
        output.status.success(),
        "umount {mountpoint} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

/// Recursive copy preserving directory structure and symlinks.
pub fn copy_dir_recursive(src: &Utf8Path, dst: &Utf8Path) -> anyhow::Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("create {dst}"))?;
    for entry in src
        .read_dir_utf8()
        .with_context(|| format!("list {src}"))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_recursive(src_path, &dst_path)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(src_path.read_link_utf8()?, &dst_path)?;
        } else {
            fs::copy(src_path, &dst_path)
                .with_context(|| format!("copy {src_path} to {dst_path}"))?;
        }
    }
    Ok(())
}

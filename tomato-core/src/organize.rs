use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Top-level folder left behind by the dataset archive once its class
/// folders have been emptied.
pub const EXTRACTION_ARTIFACT: &str = "content";

/// Static `source label -> target label` table.
///
/// Adding a category means adding a row, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelMap {
    pairs: &'static [(&'static str, &'static str)],
}

impl LabelMap {
    pub const TOMATO: LabelMap = LabelMap::new(&[
        ("Damaged", "Danificados"),
        ("Unripe", "Verdes"),
        ("Ripe", "Maduros"),
        ("Old", "Velhos"),
    ]);

    pub const fn new(pairs: &'static [(&'static str, &'static str)]) -> Self {
        Self { pairs }
    }

    pub fn target(&self, source: &str) -> Option<&'static str> {
        self.pairs
            .iter()
            .find(|(s, _)| *s == source)
            .map(|(_, t)| *t)
    }

    pub fn targets(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.pairs.iter().map(|(_, t)| *t)
    }

    pub fn is_target(&self, name: &str) -> bool {
        self.targets().any(|t| t == name)
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        Self::TOMATO
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizeReport {
    /// Files moved into each target directory
    pub moved: BTreeMap<String, usize>,
    /// Files that got a `{i}_` prefix because the name was already taken
    pub renamed: usize,
    pub artifact_removed: bool,
}

impl OrganizeReport {
    pub fn total(&self) -> usize {
        self.moved.values().sum()
    }
}

/// Move the files of every folder named after a source label below `root`
/// into `root/<target label>`.
///
/// Folders with other names are not touched. Only the direct regular-file
/// children of a matching folder are moved; the folder itself stays.
/// Afterwards `root/content` is removed if present.
pub fn organize(root: impl AsRef<Path>, labels: &LabelMap) -> Result<OrganizeReport> {
    let root = root.as_ref();
    let mut report = OrganizeReport::default();
    for target in labels.targets() {
        let dir = root.join(target);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        report.moved.insert(target.to_string(), 0);
    }

    for (dir, target) in source_dirs(root, labels) {
        let target_dir = root.join(target);
        let mut moved = 0;
        let entries =
            fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
            let from = entry.path();
            if !from.is_file() {
                continue;
            }
            let (to, renamed) = free_destination(&target_dir, &entry.file_name());
            fs::rename(&from, &to).with_context(|| {
                format!("failed to move {} to {}", from.display(), to.display())
            })?;
            debug!("moved {} -> {}", from.display(), to.display());
            report.renamed += renamed as usize;
            moved += 1;
        }
        info!("{moved} files from {} -> {target}", dir.display());
        *report.moved.entry(target.to_string()).or_default() += moved;
    }

    let artifact = root.join(EXTRACTION_ARTIFACT);
    if artifact.is_dir() {
        fs::remove_dir_all(&artifact)
            .with_context(|| format!("failed to remove {}", artifact.display()))?;
        info!("removed extraction folder {}", artifact.display());
        report.artifact_removed = true;
    }
    Ok(report)
}

/// Folders below `root` named after a source label, with their target.
/// Target folders directly under `root` are not descended into.
fn source_dirs(root: &Path, labels: &LabelMap) -> Vec<(PathBuf, &'static str)> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| {
            e.depth() > 1 || !e.file_name().to_str().is_some_and(|n| labels.is_target(n))
        })
        .filter_map(|res| match res {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("skipping unreadable entry: {err}");
                None
            }
        })
        .filter(|e| e.file_type().is_dir())
        .filter_map(|e| {
            let target = labels.target(e.file_name().to_str()?)?;
            Some((e.into_path(), target))
        })
        .collect()
}

/// First path in `dir` for `name` that does not exist yet, prefixing
/// `{i}_` on collisions. The flag tells whether a prefix was needed.
fn free_destination(dir: &Path, name: &OsStr) -> (PathBuf, bool) {
    let mut to = dir.join(name);
    let mut i = 0;
    while to.exists() {
        to = dir.join(format!("{}_{}", i, name.to_string_lossy()));
        i += 1;
    }
    (to, i > 0)
}

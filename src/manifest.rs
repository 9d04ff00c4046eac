//! Project manifest generation.
//!
//! The manifest is a plain-text listing of the project tree handed to the
//! planning agents as base context, regenerated at cycle start and again
//! before each commit so the committed snapshot matches the tree.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Directories never included in the manifest.
const SKIP_DIRS: &[&str] = &[".git", ".tend", "target", "node_modules", ".venv"];

fn is_skipped(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

/// Generate the manifest text for a project tree.
pub fn generate_manifest(project_dir: &Path) -> Result<String> {
    let mut files = Vec::new();
    for entry in WalkDir::new(project_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
    {
        let entry = entry.context("Failed to walk project tree")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(project_dir)
            .unwrap_or(entry.path());
        files.push(relative.display().to_string());
    }

    let mut manifest = format!("# project manifest ({} files)\n", files.len());
    for file in files {
        manifest.push_str(&file);
        manifest.push('\n');
    }
    Ok(manifest)
}

/// Regenerate the manifest and persist it; returns the text.
pub fn write_manifest(project_dir: &Path, manifest_path: &Path) -> Result<String> {
    let manifest = generate_manifest(project_dir)?;
    if let Some(parent) = manifest_path.parent() {
        fs::create_dir_all(parent).context("Failed to create manifest directory")?;
    }
    fs::write(manifest_path, &manifest).context("Failed to write manifest file")?;
    Ok(manifest)
}

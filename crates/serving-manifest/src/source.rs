//! Loading manifests from disk

use std::fs;
use std::path::{Path, PathBuf};

use serving_common::yaml::parse_documents;
use serving_common::{Error, Result};
use tracing::debug;

use crate::resource::Resource;

/// Read every resource from a YAML file or a directory of YAML files
///
/// Directory entries are read in lexical order so the release ordering
/// (`100-namespace.yaml`, `200-roles.yaml`, ...) is preserved. Nested
/// directories are only descended into when `recursive` is set.
pub fn load_documents(path: &Path, recursive: bool) -> Result<Vec<Resource>> {
    let files = if path.is_dir() {
        let mut files = Vec::new();
        collect_yaml_files(path, recursive, &mut files)?;
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut resources = Vec::new();
    for file in files {
        let content = fs::read_to_string(&file).map_err(|e| {
            Error::internal_with_context("manifest", format!("read {}: {e}", file.display()))
        })?;
        let docs = parse_documents(&content).map_err(|e| {
            Error::serialization(format!("{}: {e}", file.display()))
        })?;
        debug!(file = %file.display(), documents = docs.len(), "loaded manifest file");
        for doc in docs {
            resources.push(Resource::from_value(doc)?);
        }
    }
    Ok(resources)
}

fn collect_yaml_files(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| {
            Error::internal_with_context("manifest", format!("read dir {}: {e}", dir.display()))
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();

    for entry in entries {
        if entry.is_dir() {
            if recursive {
                collect_yaml_files(&entry, recursive, out)?;
            }
        } else if is_yaml(&entry) {
            out.push(entry);
        }
    }
    Ok(())
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

#![allow(dead_code)]

use modloom::{
    catalog::{CancelToken, CatalogSource},
    metadata::METADATA_FILE,
    page::RemoteRecord,
    CatalogError, ModRegistry, RegistryOptions,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};
use tempfile::TempDir;

/// Empty mods root in a fresh temp dir.
pub fn setup_mods_root() -> (TempDir, PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("mods");
    fs::create_dir_all(&root).unwrap();
    (tmp, root)
}

/// Writes a mod folder with a complete metadata.xml.
pub fn write_mod(root: &Path, folder: &str, catalog_id: &str, name: &str) -> PathBuf {
    write_metadata(
        root,
        folder,
        &format!(
            "<metadata>\n  <name>{name}</name>\n  <directory>{folder}</directory>\n  \
             <id>{catalog_id}</id>\n  <description>[h1]{name}[/h1] test mod</description>\n  \
             <version>1.0</version>\n  <visibility>Public</visibility>\n</metadata>\n"
        ),
    )
}

pub fn write_metadata(root: &Path, folder: &str, xml: &str) -> PathBuf {
    let dir = root.join(folder);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(METADATA_FILE), xml).unwrap();
    dir
}

/// In-memory catalog. Ids without an entry are reported as removed.
#[derive(Default)]
pub struct FakeCatalog {
    records: HashMap<String, Result<RemoteRecord, CatalogError>>,
    calls: Mutex<Vec<String>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listing(mut self, catalog_id: &str, dependencies: &[u64]) -> Self {
        let record = RemoteRecord {
            file_size: Some("1.0 MB".into()),
            dependency_ids: dependencies.to_vec(),
            ..RemoteRecord::default()
        };
        self.records.insert(catalog_id.to_string(), Ok(record));
        self
    }

    pub fn failing(mut self, catalog_id: &str) -> Self {
        self.records.insert(
            catalog_id.to_string(),
            Err(CatalogError::TransientFetchFailure {
                catalog_id: catalog_id.to_string(),
                attempts: 5,
                last: "HTTP 503".into(),
            }),
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CatalogSource for FakeCatalog {
    fn fetch(&self, catalog_id: &str, _cancel: &CancelToken) -> Result<RemoteRecord, CatalogError> {
        self.calls.lock().unwrap().push(catalog_id.to_string());
        self.records.get(catalog_id).cloned().unwrap_or_else(|| {
            Err(CatalogError::NotFoundRemotely {
                catalog_id: catalog_id.to_string(),
            })
        })
    }
}

/// Registry over `catalog` with sequential builds rooted at `root`.
pub fn registry(catalog: FakeCatalog, root: &Path) -> ModRegistry<FakeCatalog> {
    ModRegistry::new(
        catalog,
        RegistryOptions {
            mods_root: Some(root.to_path_buf()),
            fetch_remote: true,
            max_concurrency: 1,
        },
    )
}

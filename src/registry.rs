use crate::{
    catalog::{CancelToken, CatalogSource},
    error::{CatalogError, ResolveError},
    graph::{LoadOrder, ModGraph},
    metadata::{self, LocalRecord},
    model::{Mod, ModId, ModRef, ModWarning},
    page::RemoteRecord,
};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::{mpsc, Mutex},
    thread,
};
use tracing::{debug, info, warn};

type RemoteOutcome = Result<RemoteRecord, CatalogError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Directory holding one subdirectory per installed mod. Needed to
    /// resolve catalog-id references.
    pub mods_root: Option<PathBuf>,
    pub fetch_remote: bool,
    pub max_concurrency: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            mods_root: None,
            fetch_remote: true,
            max_concurrency: 4,
        }
    }
}

/// Deduplicating factory for [`Mod`] nodes. Owns the graph; every identity
/// maps to at most one node for the registry's lifetime.
pub struct ModRegistry<S> {
    source: S,
    options: RegistryOptions,
    cancel: CancelToken,
    graph: ModGraph,
    by_dir: HashMap<PathBuf, ModId>,
    by_catalog_id: HashMap<String, ModId>,
    remote: HashMap<String, RemoteOutcome>,
}

impl<S: CatalogSource> ModRegistry<S> {
    pub fn new(source: S, options: RegistryOptions) -> Self {
        Self {
            source,
            options,
            cancel: CancelToken::new(),
            graph: ModGraph::new(),
            by_dir: HashMap::new(),
            by_catalog_id: HashMap::new(),
            remote: HashMap::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn graph(&self) -> &ModGraph {
        &self.graph
    }

    pub fn into_graph(self) -> ModGraph {
        self.graph
    }

    pub fn get(&self, id: ModId) -> Option<&Mod> {
        self.graph.get(id)
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Returns the node already registered for `mod_ref`, if any.
    pub fn lookup(&self, mod_ref: &ModRef) -> Option<ModId> {
        match mod_ref {
            ModRef::Id(id) => self.by_catalog_id.get(&id.to_string()).copied(),
            ModRef::Path(path) => self
                .by_dir
                .get(path)
                .or_else(|| self.by_dir.get(&dir_key(path)))
                .copied(),
        }
    }

    /// Resolves one identity, reusing the cached node when it exists.
    ///
    /// Local failures are returned and leave nothing cached. Remote failures
    /// only clear `catalog_ok`; dependencies that fail to build are left out
    /// of the edge set and noted on the node.
    pub fn build(&mut self, mod_ref: &ModRef) -> Result<ModId, ResolveError> {
        let root = self.options.mods_root.clone();
        self.build_in(mod_ref, root.as_deref())
    }

    /// `search_root` locates catalog-id references. Dependencies are searched
    /// in the configured mods root, else next to the dependent's directory.
    fn build_in(
        &mut self,
        mod_ref: &ModRef,
        search_root: Option<&Path>,
    ) -> Result<ModId, ResolveError> {
        if let Some(id) = self.lookup(mod_ref) {
            return Ok(id);
        }

        let dir = locate(mod_ref, search_root)?;
        let key = dir_key(&dir);
        if let Some(id) = self.by_dir.get(&key).copied() {
            self.alias(mod_ref, &key, id);
            return Ok(id);
        }

        let local = metadata::load_local(&dir)?;
        if let Some(id) = local
            .id
            .as_ref()
            .and_then(|catalog_id| self.by_catalog_id.get(catalog_id))
            .copied()
        {
            debug!(dir = %dir.display(), "directory aliases an already built mod");
            self.alias(mod_ref, &key, id);
            return Ok(id);
        }

        let remote = self.remote_for(&local);
        let dependency_ids = match &remote {
            Some(Ok(record)) => record.dependency_ids.clone(),
            _ => Vec::new(),
        };
        if let Some(Err(err)) = &remote {
            warn!(
                dir = %dir.display(),
                catalog_id = err.catalog_id(),
                "catalog data unavailable: {err}"
            );
        }

        // Registered before recursing so a dependency cycle finds this node.
        let catalog_id = local.id.clone();
        let node = Mod::from_records(mod_ref.clone(), local, remote.as_ref());
        let id = self.graph.insert(node);
        self.alias(mod_ref, &key, id);
        if let Some(catalog_id) = catalog_id {
            self.by_catalog_id.insert(catalog_id, id);
        }
        info!(mod_id = %id, dir = %dir.display(), "registered mod");

        let dependency_root = self
            .options
            .mods_root
            .clone()
            .or_else(|| key.parent().map(Path::to_path_buf));
        for dependency in dependency_ids {
            match self.build_in(&ModRef::Id(dependency), dependency_root.as_deref()) {
                Ok(dependency_id) => self.connect(id, dependency_id),
                Err(err) => {
                    warn!(mod_id = %id, dependency, "dependency omitted: {err}");
                    if let Some(node) = self.graph.node_mut(id) {
                        node.unresolved_dependencies.push(dependency.to_string());
                    }
                    self.graph.warn(
                        id,
                        ModWarning::DependencyUnresolved {
                            catalog_id: dependency.to_string(),
                            reason: err.to_string(),
                        },
                    );
                }
            }
        }

        Ok(id)
    }

    /// Builds every reference independently. Failed references are logged
    /// and left out; the rest come back in input order.
    pub fn build_all(&mut self, refs: &[ModRef]) -> Vec<ModId> {
        if self.options.fetch_remote && self.options.max_concurrency > 1 {
            self.prefetch(refs);
        }

        let mut built = Vec::new();
        for mod_ref in refs {
            match self.build(mod_ref) {
                Ok(id) => built.push(id),
                Err(err) => warn!("skipping {mod_ref}: {err}"),
            }
        }
        built
    }

    /// Builds every installed mod under the configured mods root.
    pub fn build_installed(&mut self) -> Vec<ModId> {
        let Some(root) = self.options.mods_root.clone() else {
            return Vec::new();
        };
        let refs: Vec<ModRef> = metadata::installed_dirs(&root)
            .into_iter()
            .map(ModRef::Path)
            .collect();
        self.build_all(&refs)
    }

    /// Runs the ordering pass over everything built so far.
    pub fn assign_positions(&mut self) -> LoadOrder {
        self.graph.assign_positions()
    }

    /// Fetches catalog pages for `refs` and their installed dependencies in
    /// waves, at most `max_concurrency` requests at a time. Results land in
    /// the remote memo; the graph is untouched.
    pub fn prefetch(&mut self, refs: &[ModRef]) {
        let mut wave: Vec<String> = Vec::new();
        for mod_ref in refs {
            if self.lookup(mod_ref).is_some() {
                continue;
            }
            let catalog_id = match mod_ref {
                ModRef::Id(id) => self.installed_dir(&id.to_string()).map(|_| id.to_string()),
                ModRef::Path(path) => metadata::load_local(path).ok().and_then(|record| record.id),
            };
            if let Some(catalog_id) = catalog_id {
                self.queue_fetch(&mut wave, catalog_id);
            }
        }

        while !wave.is_empty() {
            debug!(count = wave.len(), "prefetching catalog pages");
            let fetched = fetch_concurrently(
                &self.source,
                std::mem::take(&mut wave),
                self.options.max_concurrency,
                &self.cancel,
            );
            let mut discovered: Vec<String> = Vec::new();
            for (catalog_id, outcome) in fetched {
                if let Ok(record) = &outcome {
                    for dependency in &record.dependency_ids {
                        discovered.push(dependency.to_string());
                    }
                }
                self.remote.insert(catalog_id, outcome);
            }
            for catalog_id in discovered {
                if self.installed_dir(&catalog_id).is_some() {
                    self.queue_fetch(&mut wave, catalog_id);
                }
            }
        }
    }

    fn queue_fetch(&self, wave: &mut Vec<String>, catalog_id: String) {
        if self.remote.contains_key(&catalog_id)
            || self.by_catalog_id.contains_key(&catalog_id)
            || wave.contains(&catalog_id)
        {
            return;
        }
        wave.push(catalog_id);
    }

    fn installed_dir(&self, catalog_id: &str) -> Option<PathBuf> {
        let root = self.options.mods_root.as_ref()?;
        metadata::find_by_catalog_id(root, catalog_id)
    }

    fn remote_for(&mut self, local: &LocalRecord) -> Option<RemoteOutcome> {
        if !self.options.fetch_remote {
            return None;
        }
        let catalog_id = local.id.as_ref()?;
        if let Some(outcome) = self.remote.get(catalog_id) {
            return Some(outcome.clone());
        }
        let outcome = self.source.fetch(catalog_id, &self.cancel);
        self.remote.insert(catalog_id.clone(), outcome.clone());
        Some(outcome)
    }

    fn alias(&mut self, mod_ref: &ModRef, dir_key: &Path, id: ModId) {
        self.by_dir.insert(dir_key.to_path_buf(), id);
        match mod_ref {
            ModRef::Path(path) => {
                self.by_dir.insert(path.clone(), id);
            }
            ModRef::Id(catalog_id) => {
                self.by_catalog_id.insert(catalog_id.to_string(), id);
            }
        }
    }

    fn connect(&mut self, dependent: ModId, dependency: ModId) {
        self.graph.link(dependent, dependency);
        if self.graph.depends_on(dependency, dependent) {
            let members = vec![self.graph.label(dependent), self.graph.label(dependency)];
            warn!(mod_id = %dependent, other = %dependency, "mods depend on each other");
            self.graph.warn(dependent, ModWarning::circular(members));
        }
    }
}

fn locate(mod_ref: &ModRef, search_root: Option<&Path>) -> Result<PathBuf, ResolveError> {
    match mod_ref {
        ModRef::Path(path) => {
            if !path.exists() {
                return Err(ResolveError::not_installed(mod_ref.describe()));
            }
            if !path.is_dir() {
                return Err(ResolveError::invalid(mod_ref.describe(), "not a directory"));
            }
            Ok(path.clone())
        }
        ModRef::Id(id) => {
            let Some(root) = search_root else {
                return Err(ResolveError::invalid(
                    mod_ref.describe(),
                    "catalog ids need a mods root",
                ));
            };
            if !root.is_dir() {
                return Err(ResolveError::invalid(
                    mod_ref.describe(),
                    format!("mods root {} is not a directory", root.display()),
                ));
            }
            metadata::find_by_catalog_id(root, &id.to_string())
                .ok_or_else(|| ResolveError::not_installed(mod_ref.describe()))
        }
    }
}

/// Canonical form of an install directory for dedup; falls back to the path
/// as given when it cannot be canonicalised.
fn dir_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Fetches `ids` with a fixed pool of workers pulling from a shared queue.
fn fetch_concurrently<S: CatalogSource>(
    source: &S,
    ids: Vec<String>,
    workers: usize,
    cancel: &CancelToken,
) -> Vec<(String, RemoteOutcome)> {
    let workers = workers.clamp(1, ids.len().max(1));
    let queue = Mutex::new(ids.into_iter());
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            scope.spawn(move || loop {
                let next = match queue.lock() {
                    Ok(mut pending) => pending.next(),
                    Err(_) => None,
                };
                let Some(catalog_id) = next else {
                    break;
                };
                let outcome = source.fetch(&catalog_id, cancel);
                if tx.send((catalog_id, outcome)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut seen = HashSet::new();
    rx.into_iter()
        .filter(|(catalog_id, _)| seen.insert(catalog_id.clone()))
        .collect()
}

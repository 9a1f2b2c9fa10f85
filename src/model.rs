use crate::{
    dates,
    error::{CatalogError, ResolveError},
    metadata::LocalRecord,
    page::RemoteRecord,
};
use serde::Serialize;
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};
use time::PrimitiveDateTime;

/// Identity of a build request: an install directory or a catalog id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModRef {
    Path(PathBuf),
    Id(u64),
}

impl ModRef {
    pub fn describe(&self) -> String {
        match self {
            ModRef::Path(path) => path.display().to_string(),
            ModRef::Id(id) => id.to_string(),
        }
    }
}

impl fmt::Display for ModRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModRef::Path(path) => write!(f, "path {}", path.display()),
            ModRef::Id(id) => write!(f, "id {id}"),
        }
    }
}

impl FromStr for ModRef {
    type Err = ResolveError;

    /// All-digit input is a catalog id, anything else is taken as a directory.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ResolveError::invalid(raw, "empty reference"));
        }
        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            return trimmed
                .parse::<u64>()
                .map(ModRef::Id)
                .map_err(|err| ResolveError::invalid(raw, err.to_string()));
        }
        Ok(ModRef::Path(PathBuf::from(trimmed)))
    }
}

impl From<u64> for ModRef {
    fn from(id: u64) -> Self {
        ModRef::Id(id)
    }
}

impl From<PathBuf> for ModRef {
    fn from(path: PathBuf) -> Self {
        ModRef::Path(path)
    }
}

impl From<&Path> for ModRef {
    fn from(path: &Path) -> Self {
        ModRef::Path(path.to_path_buf())
    }
}

/// Handle to a node owned by a [`crate::graph::ModGraph`]. Handles are issued
/// in discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModId(pub(crate) usize);

impl ModId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ModId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Author {
    pub name: String,
    pub profile_url: Option<String>,
    pub icon_url: Option<String>,
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Author (")?;
        writeln!(f, "  │ {:<9}= {}", "name", self.name)?;
        writeln!(f, "  │ {:<9}= {}", "url", self.profile_url.as_deref().unwrap_or("-"))?;
        writeln!(f, "  ╰ {:<9}= {}", "icon_url", self.icon_url.as_deref().unwrap_or("-"))?;
        write!(f, ")")
    }
}

/// Non-fatal diagnostics attached to a mod. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModWarning {
    MissingField { field: String },
    CircularDependency { members: Vec<String> },
    CatalogUnavailable { reason: String },
    DependencyUnresolved { catalog_id: String, reason: String },
    MalformedDependencyLink { href: String },
}

impl ModWarning {
    pub(crate) fn circular(mut members: Vec<String>) -> Self {
        members.sort();
        members.dedup();
        ModWarning::CircularDependency { members }
    }

    pub fn is_circular(&self) -> bool {
        matches!(self, ModWarning::CircularDependency { .. })
    }
}

impl fmt::Display for ModWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModWarning::MissingField { field } => write!(f, "metadata is missing <{field}>"),
            ModWarning::CircularDependency { members } => {
                write!(f, "circular dependency between {}", members.join(", "))
            }
            ModWarning::CatalogUnavailable { reason } => {
                write!(f, "catalog data unavailable: {reason}")
            }
            ModWarning::DependencyUnresolved { catalog_id, reason } => {
                write!(f, "dependency {catalog_id} could not be resolved: {reason}")
            }
            ModWarning::MalformedDependencyLink { href } => {
                write!(f, "ignored dependency link without a usable id: {href}")
            }
        }
    }
}

/// One resolved mod. Built once by the registry; afterwards only the
/// dependents, warnings and load position change.
#[derive(Debug, Clone)]
pub struct Mod {
    pub(crate) id: ModId,
    pub(crate) mod_ref: ModRef,
    pub(crate) dir: PathBuf,
    pub(crate) catalog_id: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) version: Option<String>,
    pub(crate) visibility: Option<String>,
    pub(crate) file_size: Option<String>,
    pub(crate) uploaded_at: Option<PrimitiveDateTime>,
    pub(crate) last_updated_at: Option<PrimitiveDateTime>,
    pub(crate) preview_image_url: Option<String>,
    pub(crate) authors: Vec<Author>,
    pub(crate) dependencies: Vec<ModId>,
    pub(crate) dependents: Vec<ModId>,
    pub(crate) unresolved_dependencies: Vec<String>,
    pub(crate) metadata_ok: bool,
    pub(crate) catalog_ok: bool,
    pub(crate) position: Option<usize>,
    pub(crate) warnings: Vec<ModWarning>,
}

impl Mod {
    /// Assembles a node from its local record and, when a fetch was made, the
    /// remote outcome. The graph assigns the real id on insertion.
    pub(crate) fn from_records(
        mod_ref: ModRef,
        local: LocalRecord,
        remote: Option<&Result<RemoteRecord, CatalogError>>,
    ) -> Self {
        let mut warnings: Vec<ModWarning> = local
            .missing
            .iter()
            .map(|field| ModWarning::MissingField {
                field: field.to_string(),
            })
            .collect();
        let metadata_ok = local.missing.is_empty();

        let mut node = Mod {
            id: ModId(usize::MAX),
            mod_ref,
            dir: local.dir,
            catalog_id: local.id,
            name: local.name,
            description: local.description,
            version: local.version,
            visibility: local.visibility,
            file_size: None,
            uploaded_at: None,
            last_updated_at: None,
            preview_image_url: None,
            authors: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            unresolved_dependencies: Vec::new(),
            metadata_ok,
            catalog_ok: true,
            position: None,
            warnings: Vec::new(),
        };

        match remote {
            Some(Ok(record)) => {
                node.file_size = record.file_size.clone();
                node.uploaded_at = record.uploaded_at;
                node.last_updated_at = record.last_updated_at;
                node.preview_image_url = record.preview_image_url.clone();
                node.authors = record.authors.clone();
                warnings.extend(
                    record
                        .rejected_links
                        .iter()
                        .map(|href| ModWarning::MalformedDependencyLink { href: href.clone() }),
                );
            }
            Some(Err(err)) => {
                node.catalog_ok = false;
                warnings.push(ModWarning::CatalogUnavailable {
                    reason: err.to_string(),
                });
            }
            None => {}
        }

        node.warnings = warnings;
        node
    }

    pub fn id(&self) -> ModId {
        self.id
    }

    pub fn mod_ref(&self) -> &ModRef {
        &self.mod_ref
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn catalog_id(&self) -> Option<&str> {
        self.catalog_id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn visibility(&self) -> Option<&str> {
        self.visibility.as_deref()
    }

    pub fn file_size(&self) -> Option<&str> {
        self.file_size.as_deref()
    }

    pub fn uploaded_at(&self) -> Option<PrimitiveDateTime> {
        self.uploaded_at
    }

    pub fn last_updated_at(&self) -> Option<PrimitiveDateTime> {
        self.last_updated_at
    }

    pub fn preview_image_url(&self) -> Option<&str> {
        self.preview_image_url.as_deref()
    }

    pub fn authors(&self) -> &[Author] {
        &self.authors
    }

    pub fn dependencies(&self) -> &[ModId] {
        &self.dependencies
    }

    pub fn dependents(&self) -> &[ModId] {
        &self.dependents
    }

    pub fn unresolved_dependencies(&self) -> &[String] {
        &self.unresolved_dependencies
    }

    pub fn metadata_ok(&self) -> bool {
        self.metadata_ok
    }

    pub fn catalog_ok(&self) -> bool {
        self.catalog_ok
    }

    /// Load-order index, `None` until an ordering pass has run.
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn warnings(&self) -> &[ModWarning] {
        &self.warnings
    }

    pub fn has_circular_warning(&self) -> bool {
        self.warnings.iter().any(ModWarning::is_circular)
    }

    /// Short identity used in diagnostics: the catalog id, else the folder name.
    pub fn label(&self) -> String {
        if let Some(id) = &self.catalog_id {
            return id.clone();
        }
        self.dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.dir.display().to_string())
    }

    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.label())
    }

    /// Stable ordering key inside a dependency cycle: numeric catalog id first,
    /// then install directory.
    pub(crate) fn identity_key(&self) -> (u64, String, PathBuf) {
        let numeric = self
            .catalog_id
            .as_deref()
            .and_then(|id| id.parse::<u64>().ok())
            .unwrap_or(u64::MAX);
        (
            numeric,
            self.catalog_id.clone().unwrap_or_default(),
            self.dir.clone(),
        )
    }
}

impl fmt::Display for Mod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |value: Option<&str>| value.unwrap_or("-").to_string();
        let date = |value: Option<PrimitiveDateTime>| {
            value
                .map(dates::format_catalog_date)
                .unwrap_or_else(|| "-".to_string())
        };
        let ids = |list: &[ModId]| {
            list.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let description = self
            .description
            .as_deref()
            .map(|text| shorten(text, 128))
            .unwrap_or_else(|| "-".to_string());

        writeln!(f, "Mod {} (", self.id)?;
        writeln!(f, "  Metadata:")?;
        writeln!(f, "    │ {:<17}= {}", "name", opt(self.name()))?;
        writeln!(f, "    │ {:<17}= {}", "id", opt(self.catalog_id()))?;
        writeln!(f, "    │ {:<17}= {}", "size", opt(self.file_size()))?;
        writeln!(f, "    │ {:<17}= {}", "version", opt(self.version()))?;
        writeln!(f, "    │ {:<17}= {}", "uploaded", date(self.uploaded_at))?;
        writeln!(f, "    │ {:<17}= {}", "last_updated", date(self.last_updated_at))?;
        if self.authors.is_empty() {
            writeln!(f, "    │ {:<17}= []", "authors")?;
        } else {
            writeln!(f, "    │ {:<17}= [", "authors")?;
            for author in &self.authors {
                for line in author.to_string().lines() {
                    writeln!(f, "    │     {line}")?;
                }
            }
            writeln!(f, "    │ ]")?;
        }
        writeln!(f, "    │ {:<17}= {}", "description", description)?;
        writeln!(f, "    │ {:<17}= {}", "visibility", opt(self.visibility()))?;
        writeln!(f, "    ╰ {:<17}= {}", "preview", opt(self.preview_image_url()))?;
        writeln!(f)?;
        writeln!(f, "  Internal:")?;
        writeln!(f, "    │ {:<17}= {}", "ref", self.mod_ref)?;
        writeln!(f, "    │ {:<17}= {}", "dir", self.dir.display())?;
        writeln!(
            f,
            "    │ {:<17}= {}",
            "position",
            self.position
                .map(|value| value.to_string())
                .unwrap_or_else(|| "-".to_string())
        )?;
        writeln!(f, "    │ {:<17}= {}/{}", "metadata/catalog", self.metadata_ok, self.catalog_ok)?;
        writeln!(f, "    │ {:<17}= [{}]", "dependencies", ids(&self.dependencies))?;
        writeln!(f, "    │ {:<17}= [{}]", "dependents", ids(&self.dependents))?;
        writeln!(
            f,
            "    ╰ {:<17}= [{}]",
            "unresolved",
            self.unresolved_dependencies.join(", ")
        )?;
        write!(f, ")")
    }
}

fn shorten(text: &str, width: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }
    let mut out = String::new();
    for word in collapsed.split(' ') {
        if out.chars().count() + word.chars().count() + 7 > width {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out.push_str(" [...]");
    out
}

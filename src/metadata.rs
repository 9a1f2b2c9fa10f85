use crate::error::ResolveError;
use quick_xml::{events::Event, Reader};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const METADATA_FILE: &str = "metadata.xml";

/// Fields read from a mod's `metadata.xml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalRecord {
    pub dir: PathBuf,
    pub name: Option<String>,
    pub id: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub visibility: Option<String>,
    /// Expected fields that were absent or empty, in table order.
    pub missing: Vec<&'static str>,
}

impl LocalRecord {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Option<String> {
        match slot {
            Slot::Name => &mut self.name,
            Slot::Id => &mut self.id,
            Slot::Description => &mut self.description,
            Slot::Version => &mut self.version,
            Slot::Visibility => &mut self.visibility,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Name,
    Id,
    Description,
    Version,
    Visibility,
}

struct FieldRule {
    tag: &'static str,
    slot: Slot,
    /// Without this field the mod cannot be looked up in the catalog.
    keys_catalog: bool,
}

/// Every field is expected as a direct child of the root element; a missing
/// one only produces a warning.
const FIELDS: [FieldRule; 5] = [
    FieldRule {
        tag: "name",
        slot: Slot::Name,
        keys_catalog: false,
    },
    FieldRule {
        tag: "id",
        slot: Slot::Id,
        keys_catalog: true,
    },
    FieldRule {
        tag: "description",
        slot: Slot::Description,
        keys_catalog: false,
    },
    FieldRule {
        tag: "version",
        slot: Slot::Version,
        keys_catalog: false,
    },
    FieldRule {
        tag: "visibility",
        slot: Slot::Visibility,
        keys_catalog: false,
    },
];

pub fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILE)
}

pub fn has_metadata(dir: &Path) -> bool {
    metadata_path(dir).is_file()
}

/// Reads and parses the metadata file of one mod directory.
pub fn load_local(dir: &Path) -> Result<LocalRecord, ResolveError> {
    let path = metadata_path(dir);
    if !path.is_file() {
        return Err(ResolveError::not_installed(dir.display().to_string()));
    }
    let bytes = fs::read(&path).map_err(|err| ResolveError::MalformedMetadata {
        path: path.clone(),
        reason: err.to_string(),
    })?;
    let record = parse_metadata(dir, &bytes)
        .map_err(|reason| ResolveError::MalformedMetadata { path, reason })?;

    for rule in &FIELDS {
        if !record.missing.contains(&rule.tag) {
            continue;
        }
        if rule.keys_catalog {
            warn!(dir = %dir.display(), "metadata has no <{}>; catalog lookup disabled", rule.tag);
        } else {
            warn!(dir = %dir.display(), "metadata has no <{}>", rule.tag);
        }
    }
    Ok(record)
}

/// Parses metadata XML. Only text of direct children of the root element is
/// considered; an unbalanced or unreadable document is an error.
pub fn parse_metadata(dir: &Path, bytes: &[u8]) -> Result<LocalRecord, String> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut saw_root = false;
    let mut current: Option<Slot> = None;
    let mut record = LocalRecord {
        dir: dir.to_path_buf(),
        ..LocalRecord::default()
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                if depth == 1 {
                    saw_root = true;
                } else if depth == 2 {
                    current = slot_for(e.name().as_ref());
                }
            }
            Ok(Event::Empty(_)) => {
                if depth == 0 {
                    saw_root = true;
                }
            }
            Ok(Event::Text(text)) => {
                if depth == 2 {
                    if let Some(slot) = current {
                        let value = text.unescape().map_err(|err| err.to_string())?;
                        append_text(record.slot_mut(slot), &value);
                    }
                }
            }
            Ok(Event::CData(data)) => {
                if depth == 2 {
                    if let Some(slot) = current {
                        let value = String::from_utf8_lossy(&data.into_inner()).to_string();
                        append_text(record.slot_mut(slot), value.trim());
                    }
                }
            }
            Ok(Event::End(_)) => {
                if depth == 0 {
                    return Err("unexpected closing tag".to_string());
                }
                if depth == 2 {
                    current = None;
                }
                depth -= 1;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(format!(
                    "{err} at byte {}",
                    reader.buffer_position()
                ))
            }
        }
        buf.clear();
    }

    if !saw_root {
        return Err("document has no root element".to_string());
    }
    if depth != 0 {
        return Err("document ended before all elements were closed".to_string());
    }

    for rule in &FIELDS {
        let slot = record.slot_mut(rule.slot);
        if slot.as_deref().map_or(true, str::is_empty) {
            *slot = None;
            record.missing.push(rule.tag);
        }
    }
    Ok(record)
}

/// Scans the immediate subdirectories of `mods_root` for the mod whose
/// metadata id equals `catalog_id`. Unreadable or unrelated folders are skipped.
pub fn find_by_catalog_id(mods_root: &Path, catalog_id: &str) -> Option<PathBuf> {
    let wanted = catalog_id.trim();
    for entry in WalkDir::new(mods_root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        let dir = entry.path();
        if !dir.is_dir() || !has_metadata(dir) {
            continue;
        }
        match load_local(dir) {
            Ok(record) if record.id.as_deref() == Some(wanted) => {
                return Some(dir.to_path_buf());
            }
            Ok(_) => {}
            Err(err) => debug!("skipping {}: {err}", dir.display()),
        }
    }
    None
}

/// Immediate subdirectories of `mods_root` that carry a metadata file.
pub fn installed_dirs(mods_root: &Path) -> Vec<PathBuf> {
    WalkDir::new(mods_root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| path.is_dir() && has_metadata(path))
        .collect()
}

fn slot_for(tag: &[u8]) -> Option<Slot> {
    FIELDS
        .iter()
        .find(|rule| rule.tag.as_bytes() == tag)
        .map(|rule| rule.slot)
}

fn append_text(slot: &mut Option<String>, value: &str) {
    match slot {
        Some(existing) => existing.push_str(value),
        None => *slot = Some(value.to_string()),
    }
}

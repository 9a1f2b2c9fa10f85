use crate::config::PathsConfig;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Where the game, its libraries and its mods live. Discovery is left to the
/// implementor; the resolver only reports.
pub trait PathResolver {
    fn install_root(&self) -> Option<PathBuf>;
    fn library_roots(&self) -> Vec<PathBuf>;
    fn mods_and_save_roots(&self) -> Option<(PathBuf, PathBuf)>;

    fn mods_root(&self) -> Option<PathBuf> {
        self.mods_and_save_roots().map(|(mods, _)| mods)
    }

    fn edition(&self) -> Option<GameEdition> {
        self.mods_and_save_roots()
            .and_then(|(_, save)| GameEdition::from_save_root(&save))
    }
}

/// Reports exactly what the configuration names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfiguredPaths {
    install_root: Option<PathBuf>,
    library_roots: Vec<PathBuf>,
    mods_root: Option<PathBuf>,
    save_root: Option<PathBuf>,
}

impl ConfiguredPaths {
    pub fn from_config(config: &PathsConfig) -> Self {
        Self {
            install_root: config.install_root.clone(),
            library_roots: config.library_roots.clone(),
            mods_root: config.mods_root.clone(),
            save_root: config.save_root.clone(),
        }
    }

    pub fn with_mods_root(mut self, mods_root: PathBuf) -> Self {
        self.mods_root = Some(mods_root);
        self
    }
}

impl PathResolver for ConfiguredPaths {
    fn install_root(&self) -> Option<PathBuf> {
        self.install_root.clone()
    }

    fn library_roots(&self) -> Vec<PathBuf> {
        self.library_roots.clone()
    }

    fn mods_and_save_roots(&self) -> Option<(PathBuf, PathBuf)> {
        let mods = self.mods_root.clone()?;
        let save = self.save_root.clone().unwrap_or_else(|| mods.clone());
        Some((mods, save))
    }

    fn mods_root(&self) -> Option<PathBuf> {
        self.mods_root.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEdition {
    Repentance,
    AfterbirthPlus,
}

impl GameEdition {
    /// Classifies a save directory by the edition name in its path.
    pub fn from_save_root(save_root: &Path) -> Option<Self> {
        let text = save_root.to_string_lossy();
        if text.contains("Repentance") {
            Some(GameEdition::Repentance)
        } else if text.contains("Afterbirth+") {
            Some(GameEdition::AfterbirthPlus)
        } else {
            None
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            GameEdition::Repentance => "Repentance",
            GameEdition::AfterbirthPlus => "Afterbirth+",
        }
    }
}

//! Save file handling for the world state.
//!
//! The document is a single JSON object:
//! `{"version": 2, "gameType": "...", "pois": {"<guid>": {...}}}`.
//! Before an existing file is loaded it is copied to the first free sibling
//! `<file>.<n>`, and saving writes `<file>.tmp` then renames it into place.

use crate::error::ServerError;
use crate::world::{PoiRecord, WorldState};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

pub const SAVE_FORMAT_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SaveFile {
    pub version: u32,
    pub game_type: String,
    #[serde(default)]
    pub pois: BTreeMap<String, PoiRecord>,
}

impl SaveFile {
    pub fn from_world(world: &WorldState) -> Self {
        Self {
            version: SAVE_FORMAT_VERSION,
            game_type: world.game_type().to_string(),
            pois: world.pois().clone(),
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// First `<file>.<n>` (n starting at 1) that does not exist yet.
pub fn next_backup_path(path: &Path) -> PathBuf {
    let mut n: u32 = 1;
    loop {
        let candidate = with_suffix(path, &format!(".{}", n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Copies an existing save file aside. Returns the backup path, if any.
pub fn backup(path: &Path) -> Result<Option<PathBuf>, ServerError> {
    if !path.exists() {
        return Ok(None);
    }
    let target = next_backup_path(path);
    fs::copy(path, &target)?;
    info!("Backed up {} to {}", path.display(), target.display());
    Ok(Some(target))
}

/// Loads the world from `path`, or starts an empty one labelled `game_type`.
pub fn load(path: &Path, game_type: &str) -> Result<WorldState, ServerError> {
    if !path.exists() {
        info!(
            "No state file at {}, starting a fresh {} world",
            path.display(),
            game_type
        );
        return Ok(WorldState::new(game_type));
    }

    backup(path)?;
    let text = fs::read_to_string(path)?;
    let save: SaveFile = serde_json::from_str(&text)?;
    if save.version != SAVE_FORMAT_VERSION {
        return Err(ServerError::SaveVersion {
            path: path.to_path_buf(),
            found: save.version,
            expected: SAVE_FORMAT_VERSION,
        });
    }

    info!(
        "Loaded {} POIs for game type {} from {}",
        save.pois.len(),
        save.game_type,
        path.display()
    );
    Ok(WorldState::restore(save.game_type, save.pois))
}

/// Writes the world to `path`, replacing any previous file atomically.
pub fn save(path: &Path, world: &WorldState) -> Result<(), ServerError> {
    let text = serde_json::to_string_pretty(&SaveFile::from_world(world))?;
    let tmp = with_suffix(path, ".tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    info!("Saved {} POIs to {}", world.poi_count(), path.display());
    Ok(())
}

//! Game variant descriptions and per-installation profiles.
//!
//! A [`GameProfile`] pins down everything variant-specific: the main
//! master file, where the plugin data directory lives, which manifests
//! record the load order and the active set, and which method keeps the
//! load order (plugin timestamps or an explicit text file).

use crate::error::Error;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;

/// The supported game variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameId {
    Morrowind,
    Oblivion,
    Skyrim,
    Fallout3,
    FalloutNv,
}

/// How a game persists its load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOrderMethod {
    /// The order is implied by plugin file modification times,
    /// masters first.
    Timestamp,
    /// A dedicated `loadorder.txt` records the total order; a separate
    /// manifest records activations.
    Textfile,
}

/// Which header layout a game's plugin files use.
///
/// Fallout 3 and Fallout: New Vegas share the `Tes5` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderDialect {
    /// `TES3` magic, 16-byte record header, u32 subrecord lengths.
    Tes3,
    /// `TES4` magic, 20-byte record header, u16 subrecord lengths.
    Tes4,
    /// `TES4` magic, 24-byte record header, u16 subrecord lengths.
    Tes5,
}

impl GameId {
    pub fn display_name(self) -> &'static str {
        match self {
            GameId::Morrowind => "Morrowind",
            GameId::Oblivion => "Oblivion",
            GameId::Skyrim => "Skyrim",
            GameId::Fallout3 => "Fallout 3",
            GameId::FalloutNv => "Fallout: New Vegas",
        }
    }

    /// The load-order method the variant ships with.
    pub fn default_method(self) -> LoadOrderMethod {
        match self {
            GameId::Skyrim => LoadOrderMethod::Textfile,
            _ => LoadOrderMethod::Timestamp,
        }
    }

    /// The main master file the engine hard-codes.
    pub fn main_master(self) -> &'static str {
        match self {
            GameId::Morrowind => "Morrowind.esm",
            GameId::Oblivion => "Oblivion.esm",
            GameId::Skyrim => "Skyrim.esm",
            GameId::Fallout3 => "Fallout3.esm",
            GameId::FalloutNv => "FalloutNV.esm",
        }
    }

    pub fn dialect(self) -> HeaderDialect {
        match self {
            GameId::Morrowind => HeaderDialect::Tes3,
            GameId::Oblivion => HeaderDialect::Tes4,
            GameId::Skyrim | GameId::Fallout3 | GameId::FalloutNv => HeaderDialect::Tes5,
        }
    }

    fn plugins_folder_name(self) -> &'static str {
        match self {
            GameId::Morrowind => "Data Files",
            _ => "Data",
        }
    }

    fn appdata_folder_name(self) -> &'static str {
        match self {
            GameId::Morrowind => "",
            GameId::Oblivion => "Oblivion",
            GameId::Skyrim => "Skyrim",
            GameId::Fallout3 => "Fallout3",
            GameId::FalloutNv => "FalloutNV",
        }
    }

    fn active_plugins_file_name(self) -> &'static str {
        match self {
            GameId::Morrowind => "Morrowind.ini",
            _ => "plugins.txt",
        }
    }
}

/// Variant-specific configuration for one installed game.
///
/// Immutable after construction, except that timestamp-ordered variants
/// may reassign the main master file (total conversions replace it).
#[derive(Debug, Clone)]
pub struct GameProfile {
    id: GameId,
    method: LoadOrderMethod,
    master_file: String,
    game_path: Utf8PathBuf,
    active_plugins_file: Utf8PathBuf,
    load_order_file: Utf8PathBuf,
}

impl GameProfile {
    /// Build a profile with the variant's default load-order method.
    ///
    /// `local_path` is the per-user application-data directory holding
    /// the manifests for variants that keep them there. When `None`, it
    /// is discovered from the platform's conventions; pass it explicitly
    /// where that discovery is not possible.
    pub fn new(
        id: GameId,
        game_path: impl AsRef<Utf8Path>,
        local_path: Option<&Utf8Path>,
    ) -> Result<GameProfile, Error> {
        Self::with_method(id, game_path, local_path, id.default_method())
    }

    /// Build a profile with an explicit load-order method, for
    /// installations whose launcher maintains a `loadorder.txt` even
    /// though the variant defaults to timestamp ordering.
    pub fn with_method(
        id: GameId,
        game_path: impl AsRef<Utf8Path>,
        local_path: Option<&Utf8Path>,
        method: LoadOrderMethod,
    ) -> Result<GameProfile, Error> {
        let game_path = game_path.as_ref().to_path_buf();

        let manifest_dir = if manifests_live_in_game_dir(id, &game_path) {
            game_path.clone()
        } else {
            match local_path {
                Some(path) => path.to_path_buf(),
                None => default_local_dir(id).ok_or_else(|| {
                    Error::InvalidArgs(
                        "the local application data directory could not be determined; \
                         pass it explicitly"
                            .to_string(),
                    )
                })?,
            }
        };

        Ok(GameProfile {
            id,
            method,
            master_file: id.main_master().to_string(),
            active_plugins_file: manifest_dir.join(id.active_plugins_file_name()),
            load_order_file: manifest_dir.join("loadorder.txt"),
            game_path,
        })
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn method(&self) -> LoadOrderMethod {
        self.method
    }

    pub fn master_file(&self) -> &str {
        &self.master_file
    }

    pub fn game_path(&self) -> &Utf8Path {
        &self.game_path
    }

    pub fn dialect(&self) -> HeaderDialect {
        self.id.dialect()
    }

    /// The directory holding the plugin data files.
    pub fn plugins_folder(&self) -> Utf8PathBuf {
        self.game_path.join(self.id.plugins_folder_name())
    }

    /// The manifest recording the active plugins.
    pub fn active_plugins_file(&self) -> &Utf8Path {
        &self.active_plugins_file
    }

    /// The manifest recording the total load order. Only meaningful for
    /// [`LoadOrderMethod::Textfile`] profiles.
    pub fn load_order_file(&self) -> &Utf8Path {
        &self.load_order_file
    }

    pub(crate) fn set_master_file(&mut self, name: &str) {
        self.master_file = name.to_string();
    }
}

/// Morrowind keeps its manifests next to the game. Oblivion does too,
/// but only when its ini opts out of the per-user directory.
fn manifests_live_in_game_dir(id: GameId, game_path: &Utf8Path) -> bool {
    match id {
        GameId::Morrowind => true,
        GameId::Oblivion => oblivion_ini_opts_out(game_path),
        _ => false,
    }
}

/// One setting lookup hardly justifies a full ini parser: find
/// `bUseMyGamesDirectory=` in `Oblivion.ini` and test the character
/// after the `=`.
fn oblivion_ini_opts_out(game_path: &Utf8Path) -> bool {
    const SETTING: &str = "bUseMyGamesDirectory=";

    let Ok(bytes) = fs::read(game_path.join("Oblivion.ini")) else {
        return false;
    };
    let content = encoding_rs::WINDOWS_1252.decode(&bytes).0;
    match content.find(SETTING) {
        Some(pos) => content[pos + SETTING.len()..].starts_with('0'),
        None => false,
    }
}

fn default_local_dir(id: GameId) -> Option<Utf8PathBuf> {
    let base = directories::BaseDirs::new()?;
    let local = Utf8PathBuf::from_path_buf(base.data_local_dir().to_path_buf()).ok()?;
    Some(local.join(id.appdata_folder_name()))
}

//! The active-plugin set and its on-disk manifest.
//!
//! Activation is persisted separately from the order: as a bare name
//! list for most variants, as `GameFileN=` entries in `Morrowind.ini`
//! for Morrowind, and in load-order order (main master omitted) for
//! textfile-ordered games. The manifest is written in the system
//! encoding, not UTF-8.

use crate::error::{Error, Warning};
use crate::game::{GameId, GameProfile, LoadOrderMethod};
use crate::load_order::{file_mtime, LoadOrder, UPDATE_ESM};
use crate::plugin::Plugin;
use filetime::FileTime;
use indexmap::IndexSet;
use regex::Regex;
use std::fs;

/// The insertion-ordered set of active plugins, mirroring the
/// active-plugins manifest.
#[derive(Debug, Default)]
pub struct ActivePlugins {
    plugins: IndexSet<Plugin>,
    mtime: Option<FileTime>,
}

impl ActivePlugins {
    pub(crate) fn from_set(plugins: IndexSet<Plugin>) -> ActivePlugins {
        ActivePlugins {
            plugins,
            mtime: None,
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains(&Plugin::new(name))
    }

    /// Active plugin names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plugin> {
        self.plugins.iter()
    }

    pub(crate) fn insert(&mut self, plugin: Plugin) -> bool {
        self.plugins.insert(plugin)
    }

    pub(crate) fn remove(&mut self, name: &str) -> bool {
        self.plugins.shift_remove(&Plugin::new(name))
    }

    /// Drop the cached set, forcing the next operation to reload.
    pub fn clear(&mut self) {
        self.plugins.clear();
    }

    /// Whether the manifest's mtime differs from the cached value. An
    /// empty cache is always stale; a missing manifest never is.
    pub fn has_changed(&self, profile: &GameProfile) -> Result<bool, Error> {
        if self.plugins.is_empty() {
            return Ok(true);
        }
        let file = profile.active_plugins_file();
        if !file.is_file() {
            return Ok(false);
        }
        Ok(Some(file_mtime(file)?) != self.mtime)
    }

    /// Re-read the manifest. For textfile profiles the main master (and
    /// Skyrim's `Update.esm`, when installed) is forced into the set.
    pub fn load(&mut self, profile: &GameProfile) -> Result<(), Error> {
        self.plugins.clear();
        let file = profile.active_plugins_file();

        if file.is_file() {
            let bytes = fs::read(file).map_err(|source| Error::FileReadFailed {
                path: file.to_string(),
                source,
            })?;
            let text = encoding_rs::WINDOWS_1252.decode(&bytes).0;

            if profile.id() == GameId::Morrowind {
                let game_file_line =
                    Regex::new(r"(?i)^GameFile[0-9]{1,3}=.+\.es(m|p)$").expect("valid pattern");
                for line in text.split('\n') {
                    let line = line.trim_end_matches('\r');
                    if !game_file_line.is_match(line) {
                        continue;
                    }
                    let name = &line[line.find('=').map(|i| i + 1).unwrap_or(0)..];
                    self.plugins.insert(Plugin::new(name));
                }
            } else {
                for line in text.split('\n') {
                    if line.is_empty() || line.starts_with('#') || line.starts_with('\r') {
                        continue;
                    }
                    self.plugins.insert(Plugin::new(line));
                }
            }
        }

        if profile.method() == LoadOrderMethod::Textfile {
            let master = Plugin::new(profile.master_file());
            if !self.plugins.contains(&master) {
                self.plugins.shift_insert(0, master);
            }
            if profile.id() == GameId::Skyrim {
                let update = Plugin::new(UPDATE_ESM);
                if update.is_valid(profile) && !self.plugins.contains(&update) {
                    let index = self
                        .plugins
                        .iter()
                        .position(|p| !p.is_master_no_throw(profile))
                        .unwrap_or(self.plugins.len());
                    self.plugins.shift_insert(index, update);
                }
            }
        }

        self.mtime = if file.is_file() {
            Some(file_mtime(file)?)
        } else {
            None
        };

        tracing::info!("loaded {} active plugins", self.plugins.len());
        Ok(())
    }

    /// Rewrite the manifest.
    ///
    /// Timestamp profiles write the set in iteration order (with
    /// Morrowind's `GameFileN=` prefix and preserved ini prefix);
    /// textfile profiles write actives in load-order order, omitting the
    /// main master, which the engine implies. Names that cannot be
    /// encoded in the system encoding are left out and reported as a
    /// [`Warning::BadFilename`].
    pub fn save(
        &mut self,
        profile: &GameProfile,
        load_order: &LoadOrder,
    ) -> Result<Option<Warning>, Error> {
        let file = profile.active_plugins_file();

        // Morrowind.ini holds plenty of other settings: keep every byte
        // up to and including the section header.
        let mut out: Vec<u8> = Vec::new();
        if profile.id() == GameId::Morrowind && file.is_file() {
            let contents = fs::read(file).map_err(|source| Error::FileReadFailed {
                path: file.to_string(),
                source,
            })?;
            if let Some(pos) = find_subslice(&contents, b"[Game Files]") {
                out.extend_from_slice(&contents[..pos + b"[Game Files]".len()]);
                out.push(b'\n');
            }
        }

        if let Some(parent) = file.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| Error::FileWriteFailed {
                    path: parent.to_string(),
                    source,
                })?;
            }
        }

        let mut bad_filename = None;
        match profile.method() {
            LoadOrderMethod::Timestamp => {
                for (index, plugin) in self.plugins.iter().enumerate() {
                    let Some(encoded) = encode_system(plugin.name()) else {
                        bad_filename = Some(plugin.name().to_string());
                        continue;
                    };
                    if profile.id() == GameId::Morrowind {
                        out.extend_from_slice(format!("GameFile{}=", index).as_bytes());
                    }
                    out.extend_from_slice(&encoded);
                    out.push(b'\n');
                }
            }
            LoadOrderMethod::Textfile => {
                for plugin in load_order.plugins() {
                    if !self.plugins.contains(plugin) || plugin.names_match(profile.master_file())
                    {
                        continue;
                    }
                    let Some(encoded) = encode_system(plugin.name()) else {
                        bad_filename = Some(plugin.name().to_string());
                        continue;
                    };
                    out.extend_from_slice(&encoded);
                    out.push(b'\n');
                }
            }
        }

        fs::write(file, out).map_err(|source| Error::FileWriteFailed {
            path: file.to_string(),
            source,
        })?;
        self.mtime = Some(file_mtime(file)?);
        tracing::info!("wrote {} active plugins to {}", self.plugins.len(), file);

        Ok(bad_filename.map(Warning::BadFilename))
    }

    /// Force the always-active plugins into the set: the main master for
    /// textfile profiles, `Update.esm` for Skyrim when installed.
    pub(crate) fn ensure_required(&mut self, profile: &GameProfile) {
        if profile.method() != LoadOrderMethod::Textfile {
            return;
        }
        let master = Plugin::new(profile.master_file());
        if !self.plugins.contains(&master) {
            self.plugins.shift_insert(0, master);
        }
        if profile.id() == GameId::Skyrim {
            let update = Plugin::new(UPDATE_ESM);
            if update.exists(profile) && !self.plugins.contains(&update) {
                let index = self
                    .plugins
                    .iter()
                    .position(|p| !p.is_master_no_throw(profile))
                    .unwrap_or(self.plugins.len());
                self.plugins.shift_insert(index, update);
            }
        }
    }

    /// Drop entries whose files are absent or unparseable.
    pub(crate) fn retain_valid(&mut self, profile: &GameProfile) {
        self.plugins.retain(|plugin| {
            let keep = plugin.exists(profile) && plugin.is_valid(profile);
            if !keep {
                tracing::warn!(
                    "dropping \"{}\" from the active plugins: absent or invalid",
                    plugin.name()
                );
            }
            keep
        });
    }

    /// Trim the set to 255 entries, dropping actives from the end of the
    /// load order first.
    pub(crate) fn enforce_cap(&mut self, load_order: &LoadOrder) {
        const CAP: usize = 255;

        if self.plugins.len() <= CAP {
            return;
        }
        for plugin in load_order.plugins().iter().rev() {
            if self.plugins.len() <= CAP {
                break;
            }
            self.plugins.shift_remove(plugin);
        }
        // Actives the load order does not know about get trimmed from
        // the tail of the insertion order.
        while self.plugins.len() > CAP {
            self.plugins.pop();
        }
    }

    /// Report every rule violation in the cached set as one warning.
    pub fn check_validity(&self, profile: &GameProfile) -> Option<Warning> {
        let mut message = String::new();

        for plugin in &self.plugins {
            if !plugin.exists(profile) {
                message.push_str(&format!("\"{}\" is not installed.\n", plugin.name()));
            } else if !plugin.is_valid(profile) {
                message.push_str(&format!(
                    "\"{}\" is not a valid plugin file.\n",
                    plugin.name()
                ));
            }
        }

        if self.plugins.len() > 255 {
            message.push_str("more than 255 plugins are active.\n");
        } else if profile.method() == LoadOrderMethod::Textfile {
            if !self.contains(profile.master_file()) {
                message.push_str(&format!("{} isn't active.\n", profile.master_file()));
            } else if profile.id() == GameId::Skyrim
                && Plugin::new(UPDATE_ESM).exists(profile)
                && !self.contains(UPDATE_ESM)
            {
                message.push_str("Update.esm is installed but isn't active.\n");
            }
        }

        if message.is_empty() {
            None
        } else {
            Some(Warning::InvalidList(message))
        }
    }
}

/// Encode a name in the system encoding; `None` when a character has no
/// mapping.
fn encode_system(name: &str) -> Option<Vec<u8>> {
    let (encoded, _, had_errors) = encoding_rs::WINDOWS_1252.encode(name);
    if had_errors {
        None
    } else {
        Some(encoded.into_owned())
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

//! The ordered plugin sequence and its invariants.
//!
//! A [`LoadOrder`] is the canonical in-memory order with per-entry
//! activation flags. It loads from and saves to disk according to the
//! profile's method, repairs itself on request, and detects when the
//! on-disk state has moved under it.

use crate::active::ActivePlugins;
use crate::error::{Error, Warning};
use crate::game::{GameId, GameProfile, LoadOrderMethod};
use crate::plugin::Plugin;
use camino::Utf8Path;
use filetime::FileTime;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;

/// Skyrim's always-active patch master.
pub(crate) const UPDATE_ESM: &str = "Update.esm";

/// The ordered plugin sequence with activation flags.
#[derive(Debug, Default)]
pub struct LoadOrder {
    plugins: Vec<Plugin>,
    mtime: Option<FileTime>,
    mtime_data_dir: Option<FileTime>,
}

impl LoadOrder {
    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Position of the named plugin, compared case-insensitively.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.plugins.iter().position(|p| p.names_match(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn count_active(&self) -> usize {
        self.plugins.iter().filter(|p| p.is_active()).count()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.position(name)
            .is_some_and(|index| self.plugins[index].is_active())
    }

    /// Drop the cached sequence, forcing the next operation to reload.
    pub fn clear(&mut self) {
        self.plugins.clear();
    }

    /// Whether the on-disk state has moved since the cache was filled.
    ///
    /// Timestamp-ordered caches are always considered stale: the plugin
    /// mtimes are the order, and polling every file costs as much as
    /// re-reading.
    pub fn has_changed(&self, profile: &GameProfile) -> Result<bool, Error> {
        if self.plugins.is_empty() {
            return Ok(true);
        }
        if profile.method() == LoadOrderMethod::Textfile && profile.load_order_file().is_file() {
            let manifest = file_mtime(profile.load_order_file())?;
            let data_dir = file_mtime(&profile.plugins_folder())?;
            Ok(Some(manifest) != self.mtime || Some(data_dir) != self.mtime_data_dir)
        } else {
            Ok(true)
        }
    }

    /// Rebuild the sequence from the manifests and the data directory.
    ///
    /// Textfile profiles read `loadorder.txt` when present, fall back to
    /// the active-plugins manifest, and otherwise seed the order with
    /// the main master. Plugins found on disk but missing from the
    /// order are slotted in (masters at the partition boundary, the rest
    /// at the end), and the manifest is rewritten if that changed it.
    pub fn load(&mut self, profile: &GameProfile) -> Result<(), Error> {
        self.plugins.clear();
        let mut create_manifest = profile.method() == LoadOrderMethod::Textfile;

        if profile.method() == LoadOrderMethod::Textfile {
            if profile.load_order_file().is_file() {
                self.load_from_file(profile, profile.load_order_file())?;
                create_manifest = false;
            } else if profile.active_plugins_file().is_file() {
                self.load_from_file(profile, profile.active_plugins_file())?;
            } else {
                let mut master = Plugin::new(profile.master_file());
                master.activate();
                self.plugins.push(master);
                if profile.id() == GameId::Skyrim {
                    let mut update = Plugin::new(UPDATE_ESM);
                    if update.is_valid(profile) && !self.contains(UPDATE_ESM) {
                        update.activate();
                        self.plugins.push(update);
                    }
                }
            }
        }

        let added = self.scan_plugins_folder(profile)?;

        if create_manifest || (added > 0 && profile.method() == LoadOrderMethod::Textfile) {
            // The active manifest is deliberately left alone here; only
            // the order itself is persisted.
            self.save(profile)?;
        }

        if profile.method() == LoadOrderMethod::Timestamp {
            self.sort_by_timestamps(profile);
        } else {
            self.record_mtimes(profile)?;
        }

        tracing::info!(
            "loaded {} plugins for {}",
            self.plugins.len(),
            profile.id().display_name()
        );
        Ok(())
    }

    /// Persist the order: stamp plugin mtimes for timestamp profiles,
    /// rewrite `loadorder.txt` for textfile profiles.
    pub fn save(&mut self, profile: &GameProfile) -> Result<(), Error> {
        match profile.method() {
            LoadOrderMethod::Timestamp => self.stamp_timestamps(profile),
            LoadOrderMethod::Textfile => self.write_manifest(profile),
        }
    }

    /// Read one manifest into the sequence. Lines are plugin names;
    /// blank lines and `#` comments are skipped. The load-order manifest
    /// must be UTF-8; the active-plugins manifest is transcoded from the
    /// system encoding.
    pub(crate) fn load_from_file(
        &mut self,
        profile: &GameProfile,
        file: &Utf8Path,
    ) -> Result<(), Error> {
        if !file.is_file() {
            return Err(Error::FileNotFound(file.to_string()));
        }
        let bytes = fs::read(file).map_err(|source| Error::FileReadFailed {
            path: file.to_string(),
            source,
        })?;

        let text = if file == profile.active_plugins_file() {
            encoding_rs::WINDOWS_1252.decode(&bytes).0.into_owned()
        } else {
            String::from_utf8(bytes).map_err(|_| Error::FileNotUtf8(file.to_string()))?
        };

        for line in text.split('\n') {
            if line.is_empty() || line.starts_with('#') || line.starts_with('\r') {
                continue;
            }
            self.plugins.push(Plugin::new(line));
        }

        if profile.method() == LoadOrderMethod::Textfile {
            // The engine hard-codes the main master first and active.
            self.move_to_front(profile.master_file());
            self.plugins[0].activate();

            if profile.id() == GameId::Skyrim {
                let mut update = Plugin::new(UPDATE_ESM);
                if update.is_valid(profile) && !self.contains(UPDATE_ESM) {
                    let index = self.first_non_master_index(profile);
                    update.activate();
                    self.plugins.insert(index, update);
                }
            }
        }
        Ok(())
    }

    /// Replace the whole sequence after validating the input.
    ///
    /// Activation flags of plugins already present carry over; for
    /// textfile profiles the first entry is forced active.
    pub fn set_order(&mut self, names: &[&str], profile: &GameProfile) -> Result<(), Error> {
        if names.is_empty() {
            return Err(Error::InvalidArgs("zero-length plugin list passed".to_string()));
        }
        if profile.method() == LoadOrderMethod::Textfile
            && !names[0].eq_ignore_ascii_case(profile.master_file())
        {
            return Err(Error::InvalidArgs(format!(
                "\"{}\" must load first",
                profile.master_file()
            )));
        }

        let mut seen = HashSet::new();
        let mut next = Vec::with_capacity(names.len());
        for &name in names {
            let plugin = Plugin::new(name);
            if !seen.insert(plugin.key()) {
                return Err(Error::InvalidArgs(format!(
                    "\"{}\" is a duplicate entry",
                    plugin.name()
                )));
            }
            match self.position(plugin.name()) {
                // Reuse the existing entry so its activation flag survives.
                Some(index) => next.push(self.plugins[index].clone()),
                None => {
                    if !plugin.exists(profile) {
                        return Err(Error::FileNotFound(plugin.name().to_string()));
                    }
                    if !plugin.is_valid(profile) {
                        return Err(Error::InvalidArgs(format!(
                            "\"{}\" is not a valid plugin file",
                            plugin.name()
                        )));
                    }
                    next.push(plugin);
                }
            }
        }

        // Masters must form a prefix of the order.
        let mut seen_non_master = false;
        for plugin in &next {
            if plugin.is_master(profile)? {
                if seen_non_master {
                    return Err(Error::InvalidArgs(
                        "master plugins must load before all non-master plugins".to_string(),
                    ));
                }
            } else {
                seen_non_master = true;
            }
        }

        self.plugins = next;
        if profile.method() == LoadOrderMethod::Textfile {
            self.plugins[0].activate();
        }
        Ok(())
    }

    /// Move a plugin to `index`, clamped to the current length.
    pub fn set_position(
        &mut self,
        name: &str,
        index: usize,
        profile: &GameProfile,
    ) -> Result<(), Error> {
        if profile.method() == LoadOrderMethod::Textfile {
            if index == 0 && !profile.master_file().eq_ignore_ascii_case(name) {
                return Err(Error::InvalidArgs(format!(
                    "cannot load \"{}\" first: \"{}\" must load first",
                    name,
                    profile.master_file()
                )));
            }
            if index != 0
                && !self.plugins.is_empty()
                && profile.master_file().eq_ignore_ascii_case(name)
            {
                return Err(Error::InvalidArgs(format!(
                    "\"{}\" must load first",
                    profile.master_file()
                )));
            }
        }

        let plugin = match self.position(name) {
            Some(existing) => self.plugins[existing].clone(),
            None => {
                let plugin = Plugin::new(name);
                if !plugin.is_valid(profile) {
                    return Err(Error::InvalidArgs(format!(
                        "\"{}\" is not a valid plugin file",
                        plugin.name()
                    )));
                }
                plugin
            }
        };

        let partition = self.first_non_master_index(profile);
        let current = self.position(name).unwrap_or(self.plugins.len());
        if !plugin.is_master(profile)? {
            if index < partition {
                return Err(Error::InvalidArgs(
                    "cannot move a non-master plugin before master files".to_string(),
                ));
            }
        } else if (index > partition && partition != self.plugins.len())
            || (current < partition && index == partition)
        {
            return Err(Error::InvalidArgs(
                "cannot move a master file after non-master plugins".to_string(),
            ));
        }

        self.plugins.retain(|p| !p.names_match(name));
        let index = index.min(self.plugins.len());
        self.plugins.insert(index, plugin);
        Ok(())
    }

    /// Flag a plugin active, inserting it at its proper position if it
    /// is not yet in the order.
    pub fn activate(&mut self, name: &str, profile: &GameProfile) -> Result<(), Error> {
        if self.count_active() > 254 {
            return Err(Error::InvalidArgs(format!(
                "cannot activate \"{}\": more than 255 plugins would be active",
                name
            )));
        }
        let plugin = Plugin::new(name);
        if !plugin.is_valid(profile) {
            return Err(Error::InvalidArgs(format!(
                "\"{}\" is not a valid plugin file",
                plugin.name()
            )));
        }

        let index = match self.position(plugin.name()) {
            Some(index) => index,
            None => {
                if profile.method() == LoadOrderMethod::Textfile
                    && plugin.names_match(profile.master_file())
                {
                    self.plugins.insert(0, plugin);
                    0
                } else if plugin.is_master(profile)? {
                    let index = self.first_non_master_index(profile);
                    self.plugins.insert(index, plugin);
                    index
                } else {
                    self.plugins.push(plugin);
                    self.plugins.len() - 1
                }
            }
        };
        self.plugins[index].activate();
        Ok(())
    }

    /// Clear a plugin's active flag. The main master (textfile) and
    /// Skyrim's `Update.esm` cannot be deactivated.
    pub fn deactivate(&mut self, name: &str, profile: &GameProfile) -> Result<(), Error> {
        if profile.method() == LoadOrderMethod::Textfile
            && profile.master_file().eq_ignore_ascii_case(name)
        {
            return Err(Error::InvalidArgs(format!(
                "cannot deactivate {}",
                profile.master_file()
            )));
        }
        if profile.id() == GameId::Skyrim && UPDATE_ESM.eq_ignore_ascii_case(name) {
            return Err(Error::InvalidArgs("cannot deactivate Update.esm".to_string()));
        }
        if let Some(index) = self.position(name) {
            self.plugins[index].deactivate();
        }
        Ok(())
    }

    /// Remove duplicate entries, keeping the last occurrence of each
    /// name.
    pub fn unique(&mut self) {
        let mut seen = HashSet::new();
        let mut kept: Vec<Plugin> = Vec::with_capacity(self.plugins.len());
        for plugin in self.plugins.drain(..).rev() {
            if seen.insert(plugin.key()) {
                kept.push(plugin);
            }
        }
        kept.reverse();
        self.plugins = kept;
    }

    /// Stable partition: masters first, otherwise preserving order.
    pub fn partition_masters(&mut self, profile: &GameProfile) {
        let (masters, rest): (Vec<Plugin>, Vec<Plugin>) = self
            .plugins
            .drain(..)
            .partition(|plugin| plugin.is_master_no_throw(profile));
        self.plugins = masters;
        self.plugins.extend(rest);
    }

    /// Drop entries whose files are no longer installed.
    pub(crate) fn retain_installed(&mut self, profile: &GameProfile) {
        self.plugins.retain(|plugin| {
            let installed = plugin.exists(profile);
            if !installed {
                tracing::warn!("dropping \"{}\": not installed", plugin.name());
            }
            installed
        });
    }

    /// Move a plugin to position 0, removing any other occurrence. No
    /// validation; repairs use this to restore the master-first rule.
    pub(crate) fn move_to_front(&mut self, name: &str) {
        let plugin = match self.position(name) {
            Some(index) => self.plugins[index].clone(),
            None => Plugin::new(name),
        };
        self.plugins.retain(|p| !p.names_match(name));
        self.plugins.insert(0, plugin);
    }

    /// Index of the first entry that is not a master, i.e. the master
    /// partition point.
    pub(crate) fn first_non_master_index(&self, profile: &GameProfile) -> usize {
        self.plugins
            .iter()
            .position(|plugin| !plugin.is_master_no_throw(profile))
            .unwrap_or(self.plugins.len())
    }

    /// Mirror the manifest-backed active set into the entry flags.
    pub(crate) fn sync_active_flags(&mut self, active: &ActivePlugins) {
        for plugin in &mut self.plugins {
            let state = active.contains(plugin.name());
            plugin.set_active(state);
        }
    }

    /// Report every rule violation in the cached order as one warning.
    pub fn check_validity(&self, profile: &GameProfile) -> Option<Warning> {
        if self.plugins.is_empty() {
            return None;
        }
        let mut message = String::new();

        if !self.plugins[0].names_match(profile.master_file()) {
            message.push_str(&format!(
                "\"{}\" is not the first plugin in the load order; \"{}\" is first.\n",
                profile.master_file(),
                self.plugins[0].name()
            ));
        }

        let mut seen = HashSet::new();
        let mut was_master = false;
        let mut any_checked = false;
        for plugin in &self.plugins {
            if !seen.insert(plugin.key()) {
                message.push_str(&format!(
                    "\"{}\" is in the load order twice.\n",
                    plugin.name()
                ));
                continue;
            }
            if !plugin.exists(profile) {
                message.push_str(&format!("\"{}\" is not installed.\n", plugin.name()));
                continue;
            }
            match plugin.is_master(profile) {
                Ok(is_master) => {
                    if any_checked && is_master && !was_master {
                        message.push_str(&format!(
                            "master plugin \"{}\" loaded after a non-master plugin.\n",
                            plugin.name()
                        ));
                    }
                    was_master = is_master;
                    any_checked = true;
                }
                Err(error) => {
                    message.push_str(&format!(
                        "plugin \"{}\" is invalid: {}\n",
                        plugin.name(),
                        error
                    ));
                }
            }
        }

        if message.is_empty() {
            None
        } else {
            Some(Warning::InvalidList(message))
        }
    }

    /// Enumerate the data directory and slot in plugins missing from the
    /// order. Names are sorted so that ghost files follow their plain
    /// namesakes; plugins whose headers fail to parse are skipped.
    fn scan_plugins_folder(&mut self, profile: &GameProfile) -> Result<usize, Error> {
        let folder = profile.plugins_folder();
        if !folder.is_dir() {
            return Ok(0);
        }

        let entries = fs::read_dir(&folder).map_err(|source| Error::FileReadFailed {
            path: folder.to_string(),
            source,
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::FileReadFailed {
                path: folder.to_string(),
                source,
            })?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let is_plugin_file = [".esm", ".esp", ".ghost"]
                .iter()
                .any(|suffix| ends_with_ignore_case(&name, suffix));
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_plugin_file && is_file {
                names.push(name);
            }
        }
        names.sort();

        let mut first_non_master = self.first_non_master_index(profile);
        let mut added = 0;
        for name in names {
            let plugin = Plugin::new(&name);
            if self.contains(plugin.name()) {
                continue;
            }
            match plugin.is_master(profile) {
                Ok(true) => {
                    self.plugins.insert(first_non_master, plugin);
                    first_non_master += 1;
                    added += 1;
                }
                Ok(false) => {
                    self.plugins.push(plugin);
                    added += 1;
                }
                Err(error) => {
                    tracing::debug!("skipping \"{}\" during scan: {}", plugin.name(), error);
                }
            }
        }
        Ok(added)
    }

    /// Masters before non-masters; within a partition, earlier mtimes
    /// first. Master bits and timestamps are cached per name, and
    /// timestamp reads are deferred until a comparison needs them.
    fn sort_by_timestamps(&mut self, profile: &GameProfile) {
        #[derive(Default)]
        struct SortInfo {
            is_master: bool,
            mod_time: Option<FileTime>,
        }

        let cache: RefCell<HashMap<String, SortInfo>> = RefCell::new(HashMap::new());

        let is_master_of = |plugin: &Plugin| -> bool {
            let mut cache = cache.borrow_mut();
            cache
                .entry(plugin.key())
                .or_insert_with(|| SortInfo {
                    is_master: plugin.is_master_no_throw(profile),
                    mod_time: None,
                })
                .is_master
        };
        let mod_time_of = |plugin: &Plugin| -> FileTime {
            let mut cache = cache.borrow_mut();
            let info = cache.entry(plugin.key()).or_default();
            if info.mod_time.is_none() {
                info.mod_time = Some(plugin.mod_time(profile).unwrap_or_else(|error| {
                    tracing::debug!("no timestamp for \"{}\": {}", plugin.name(), error);
                    FileTime::zero()
                }));
            }
            info.mod_time.unwrap_or_else(FileTime::zero)
        };

        self.plugins.sort_by(|a, b| {
            match (is_master_of(a), is_master_of(b)) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => mod_time_of(a).cmp(&mod_time_of(b)),
            }
        });
    }

    /// Reassign the existing set of distinct mtimes to the plugins in
    /// their new positions, padding with sixty-second steps past the
    /// greatest when plugins currently share a stamp.
    fn stamp_timestamps(&mut self, profile: &GameProfile) -> Result<(), Error> {
        let mut timestamps = BTreeSet::new();
        for plugin in &self.plugins {
            timestamps.insert(plugin.mod_time(profile)?);
        }
        while timestamps.len() < self.plugins.len() {
            let Some(&greatest) = timestamps.iter().next_back() else {
                break;
            };
            timestamps.insert(FileTime::from_unix_time(greatest.unix_seconds() + 60, 0));
        }
        for (plugin, &timestamp) in self.plugins.iter().zip(timestamps.iter()) {
            plugin.set_mod_time(profile, timestamp)?;
        }
        tracing::info!("stamped {} plugin timestamps", self.plugins.len());
        Ok(())
    }

    /// Truncate and rewrite `loadorder.txt`, one name per line, UTF-8
    /// without a byte-order mark, then record the fresh mtimes.
    fn write_manifest(&mut self, profile: &GameProfile) -> Result<(), Error> {
        let file = profile.load_order_file();
        if let Some(parent) = file.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| Error::FileWriteFailed {
                    path: parent.to_string(),
                    source,
                })?;
            }
        }

        let mut contents = String::new();
        for plugin in &self.plugins {
            contents.push_str(plugin.name());
            contents.push('\n');
        }
        fs::write(file, contents).map_err(|source| Error::FileWriteFailed {
            path: file.to_string(),
            source,
        })?;

        self.record_mtimes(profile)?;
        tracing::info!("wrote {} plugins to {}", self.plugins.len(), file);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn push_for_test(&mut self, plugin: Plugin) {
        self.plugins.push(plugin);
    }

    fn record_mtimes(&mut self, profile: &GameProfile) -> Result<(), Error> {
        let file = profile.load_order_file();
        self.mtime = if file.is_file() {
            Some(file_mtime(file)?)
        } else {
            None
        };
        let folder = profile.plugins_folder();
        self.mtime_data_dir = if folder.is_dir() {
            Some(file_mtime(&folder)?)
        } else {
            None
        };
        Ok(())
    }
}

pub(crate) fn file_mtime(path: &Utf8Path) -> Result<FileTime, Error> {
    let metadata = fs::metadata(path).map_err(|source| Error::TimestampReadFailed {
        path: path.to_string(),
        source,
    })?;
    Ok(FileTime::from_last_modification_time(&metadata))
}

fn ends_with_ignore_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name.is_char_boundary(name.len() - suffix.len())
        && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

//! The per-installation handle: owns the profile and the cached
//! load-order and active-plugin state, and scripts every operation.
//!
//! Each operation first consults the change detector; a stale cache is
//! re-read from disk before the operation proceeds. Mutations are
//! validated, applied in memory, and flushed back before returning.
//! When a flush fails, the affected cache is cleared so the next call
//! reloads from disk.

use crate::active::ActivePlugins;
use crate::error::{Error, Outcome, Warning};
use crate::game::{GameId, GameProfile, LoadOrderMethod};
use crate::load_order::LoadOrder;
use crate::plugin::Plugin;
use camino::Utf8Path;
use indexmap::IndexSet;

/// One opened game installation.
///
/// Not safe for concurrent use; the library assumes a single writer per
/// installation. Another process touching the manifests between calls
/// is picked up by the change detector on the next call.
#[derive(Debug)]
pub struct Handle {
    profile: GameProfile,
    load_order: LoadOrder,
    active: ActivePlugins,
}

impl Handle {
    /// Open a handle on the installation at `game_path`.
    ///
    /// `local_path` overrides the per-user application-data directory;
    /// when `None` it is discovered from platform conventions. For
    /// textfile profiles whose two manifests both exist, the manifests
    /// are cross-checked and a [`Warning::LoadOrderMismatch`] is
    /// reported when they disagree; the handle stays usable.
    pub fn open(
        id: GameId,
        game_path: impl AsRef<Utf8Path>,
        local_path: Option<&Utf8Path>,
    ) -> Result<Outcome<Handle>, Error> {
        let game_path = game_path.as_ref();
        if !game_path.is_dir() {
            return Err(Error::InvalidArgs(format!(
                "given game path \"{}\" is not a valid directory",
                game_path
            )));
        }
        if let Some(local) = local_path {
            if !local.is_dir() {
                return Err(Error::InvalidArgs(format!(
                    "given local data path \"{}\" is not a valid directory",
                    local
                )));
            }
        }

        let profile = GameProfile::new(id, game_path, local_path)?;
        Self::with_profile(profile)
    }

    /// Open a handle over an explicitly built profile, e.g. one with a
    /// load-order method override.
    pub fn with_profile(profile: GameProfile) -> Result<Outcome<Handle>, Error> {
        if !profile.game_path().is_dir() {
            return Err(Error::InvalidArgs(format!(
                "given game path \"{}\" is not a valid directory",
                profile.game_path()
            )));
        }
        let handle = Handle {
            profile,
            load_order: LoadOrder::default(),
            active: ActivePlugins::default(),
        };
        let warning = handle.detect_desync()?;
        tracing::info!(
            "opened {} at {}",
            handle.profile.id().display_name(),
            handle.profile.game_path()
        );
        Ok(Outcome::new(handle, warning))
    }

    pub fn game_id(&self) -> GameId {
        self.profile.id()
    }

    pub fn load_order_method(&self) -> LoadOrderMethod {
        self.profile.method()
    }

    pub fn game_master(&self) -> &str {
        self.profile.master_file()
    }

    /// Reassign the main master file, e.g. for total conversions.
    /// Forbidden for textfile profiles, whose engine hard-codes it.
    pub fn set_game_master(&mut self, master: &str) -> Result<(), Error> {
        if self.profile.method() == LoadOrderMethod::Textfile {
            return Err(Error::InvalidArgs(format!(
                "cannot change the main master file of {}",
                self.profile.id().display_name()
            )));
        }
        let plugin = Plugin::new(master);
        if !plugin.exists(&self.profile) {
            return Err(Error::FileNotFound(plugin.name().to_string()));
        }
        if !plugin.is_valid(&self.profile) {
            return Err(Error::InvalidArgs(format!(
                "\"{}\" is not a valid plugin file",
                plugin.name()
            )));
        }
        self.profile.set_master_file(plugin.name());
        Ok(())
    }

    /// The current load order, reloaded from disk if stale.
    pub fn load_order(&mut self) -> Result<Outcome<Vec<String>>, Error> {
        self.refresh_load_order()?;
        let warning = self.load_order.check_validity(&self.profile);
        Ok(Outcome::new(self.load_order.names(), warning))
    }

    /// Replace the load order and persist it.
    ///
    /// For timestamp profiles a first entry other than the main master
    /// is accepted but reported as a [`Warning::InvalidList`]; textfile
    /// profiles reject it outright.
    pub fn set_load_order<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Outcome<()>, Error> {
        let names: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
        self.load_order.set_order(&names, &self.profile)?;
        match self.flush_load_order() {
            Ok(flush_warning) => {
                let warning =
                    flush_warning.or_else(|| self.load_order.check_validity(&self.profile));
                Ok(Outcome::new((), warning))
            }
            Err(error) => {
                self.load_order.clear();
                Err(error)
            }
        }
    }

    /// Position of a plugin in the load order, if present.
    pub fn plugin_position(&mut self, name: &str) -> Result<Option<usize>, Error> {
        self.refresh_load_order()?;
        Ok(self.load_order.position(name))
    }

    /// Name of the plugin at `index`.
    pub fn plugin_at(&mut self, index: usize) -> Result<String, Error> {
        self.refresh_load_order()?;
        self.load_order
            .plugins()
            .get(index)
            .map(|plugin| plugin.name().to_string())
            .ok_or_else(|| {
                Error::InvalidArgs(format!("index {} is beyond the end of the load order", index))
            })
    }

    /// Move a plugin to `index` (clamped to the end) and persist.
    pub fn set_plugin_position(
        &mut self,
        name: &str,
        index: usize,
    ) -> Result<Outcome<()>, Error> {
        self.refresh_load_order()?;
        self.load_order.set_position(name, index, &self.profile)?;
        match self.flush_load_order() {
            Ok(warning) => Ok(Outcome::new((), warning)),
            Err(error) => {
                self.load_order.clear();
                Err(error)
            }
        }
    }

    /// The active plugins in insertion order, reloaded if stale.
    pub fn active_plugins(&mut self) -> Result<Outcome<Vec<String>>, Error> {
        self.refresh_active()?;
        let warning = self.active.check_validity(&self.profile);
        Ok(Outcome::new(self.active.names(), warning))
    }

    /// Replace the active set and persist it. Every named plugin is
    /// unghosted; plugins missing from the load order get positions
    /// assigned.
    pub fn set_active_plugins<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Outcome<()>, Error> {
        let mut staged = IndexSet::new();
        for name in names {
            let plugin = Plugin::new(name.as_ref());
            if staged.contains(&plugin) {
                return Err(Error::InvalidArgs(
                    "the supplied active plugins list contains duplicates".to_string(),
                ));
            }
            plugin.unghost(&self.profile)?;
            staged.insert(plugin);
        }

        let staged = ActivePlugins::from_set(staged);
        if let Some(Warning::InvalidList(details)) = staged.check_validity(&self.profile) {
            return Err(Error::InvalidArgs(format!(
                "invalid active plugins list supplied: {}",
                details
            )));
        }
        self.active = staged;

        // Plugins activated before ever appearing in the order need a
        // position; a reload scans them in, and the save persists it.
        let missing_position = self
            .active
            .iter()
            .any(|plugin| !self.load_order.contains(plugin.name()));
        if missing_position {
            if let Err(error) = self.reload_and_persist_order() {
                self.active.clear();
                return Err(error);
            }
        }

        self.load_order.sync_active_flags(&self.active);
        match self.active.save(&self.profile, &self.load_order) {
            Ok(warning) => Ok(Outcome::new((), warning)),
            Err(error) => {
                self.active.clear();
                Err(error)
            }
        }
    }

    /// Whether the named plugin is active.
    pub fn is_plugin_active(&mut self, name: &str) -> Result<Outcome<bool>, Error> {
        self.refresh_active()?;
        let warning = self.active.check_validity(&self.profile);
        Ok(Outcome::new(self.active.contains(name), warning))
    }

    /// Activate or deactivate one plugin and persist the result.
    pub fn set_plugin_active(&mut self, name: &str, active: bool) -> Result<Outcome<()>, Error> {
        let plugin = Plugin::new(name);
        if active && !plugin.exists(&self.profile) {
            return Err(Error::FileNotFound(plugin.name().to_string()));
        }
        if !plugin.is_valid(&self.profile) {
            return Err(Error::InvalidArgs(format!(
                "\"{}\" is not a valid plugin file",
                plugin.name()
            )));
        }

        self.refresh_active()?;

        if active {
            plugin.unghost(&self.profile)?;
            if !self.load_order.contains(plugin.name()) {
                self.reload_and_persist_order()?;
            }
            self.load_order.sync_active_flags(&self.active);
            self.load_order.activate(plugin.name(), &self.profile)?;
            self.active.insert(plugin);
        } else {
            self.load_order.sync_active_flags(&self.active);
            self.load_order.deactivate(plugin.name(), &self.profile)?;
            self.active.remove(plugin.name());
        }

        match self.active.save(&self.profile, &self.load_order) {
            Ok(warning) => Ok(Outcome::new((), warning)),
            Err(error) => {
                self.active.clear();
                Err(error)
            }
        }
    }

    /// Repair both lists: restore the master-first rule, drop duplicates
    /// and uninstalled entries, re-partition masters, force the
    /// always-active plugins on, and trim the active set to 255. The
    /// repaired state is written back.
    pub fn fix_plugin_lists(&mut self) -> Result<Outcome<()>, Error> {
        self.refresh_load_order()?;

        if self.profile.method() == LoadOrderMethod::Textfile {
            self.load_order.move_to_front(self.profile.master_file());
            self.load_order.unique();
            self.load_order.retain_installed(&self.profile);
            self.load_order.partition_masters(&self.profile);
            self.load_order.save(&self.profile)?;
        }

        self.refresh_active()?;
        self.active.ensure_required(&self.profile);
        self.active.retain_valid(&self.profile);
        self.active.enforce_cap(&self.load_order);
        self.load_order.sync_active_flags(&self.active);

        match self.active.save(&self.profile, &self.load_order) {
            Ok(warning) => Ok(Outcome::new((), warning)),
            Err(error) => {
                self.active.clear();
                Err(error)
            }
        }
    }

    fn refresh_load_order(&mut self) -> Result<(), Error> {
        if self.load_order.has_changed(&self.profile)? {
            tracing::debug!("load-order cache is stale, reloading");
            self.load_order.load(&self.profile)?;
        }
        Ok(())
    }

    fn refresh_active(&mut self) -> Result<(), Error> {
        if self.active.has_changed(&self.profile)? {
            tracing::debug!("active-plugins cache is stale, reloading");
            self.active.load(&self.profile)?;
        }
        Ok(())
    }

    /// Save the order, then flush the active manifest for textfile
    /// profiles (reloading its cache first if stale).
    fn flush_load_order(&mut self) -> Result<Option<Warning>, Error> {
        self.load_order.save(&self.profile)?;
        if self.profile.method() == LoadOrderMethod::Textfile {
            if self.active.has_changed(&self.profile)? {
                self.active.load(&self.profile)?;
            }
            return self.active.save(&self.profile, &self.load_order);
        }
        Ok(None)
    }

    fn reload_and_persist_order(&mut self) -> Result<(), Error> {
        self.load_order.load(&self.profile)?;
        self.load_order.save(&self.profile)
    }

    /// Compare the two manifests at handle-creation time. Entries only
    /// present in the load-order manifest are ignored; the remainder
    /// must agree element-wise with the active-plugins manifest.
    fn detect_desync(&self) -> Result<Option<Warning>, Error> {
        if self.profile.method() != LoadOrderMethod::Textfile {
            return Ok(None);
        }
        let order_file = self.profile.load_order_file();
        let active_file = self.profile.active_plugins_file();
        if !order_file.is_file() || !active_file.is_file() {
            return Ok(None);
        }

        let mut from_order = LoadOrder::default();
        from_order.load_from_file(&self.profile, order_file)?;
        let mut from_active = LoadOrder::default();
        from_active.load_from_file(&self.profile, active_file)?;

        let filtered: Vec<&Plugin> = from_order
            .plugins()
            .iter()
            .filter(|plugin| from_active.contains(plugin.name()))
            .collect();
        let in_sync = filtered.len() == from_active.len()
            && filtered
                .iter()
                .zip(from_active.plugins())
                .all(|(a, b)| a.names_match(b.name()));

        if in_sync {
            Ok(None)
        } else {
            tracing::warn!("the load-order and active-plugins manifests disagree");
            Ok(Some(Warning::LoadOrderMismatch(
                "the order of plugins present in both manifests differs between the two files"
                    .to_string(),
            )))
        }
    }
}

//! A single plugin file, identified by its canonical name.

use crate::error::Error;
use crate::game::GameProfile;
use crate::header::PluginHeader;
use camino::Utf8PathBuf;
use filetime::FileTime;
use std::fs;
use std::hash::{Hash, Hasher};

/// One plugin data file.
///
/// The canonical name is the filename with any trailing `.ghost` suffix
/// and stray carriage return stripped; display case is retained, but
/// identity is case-insensitive. A `Plugin` does not own the file — it
/// is a handle used to query the filesystem through a [`GameProfile`].
#[derive(Debug, Clone)]
pub struct Plugin {
    name: String,
    active: bool,
}

impl Plugin {
    pub fn new(name: &str) -> Plugin {
        let mut name = name.to_string();
        if name.ends_with('\r') {
            name.pop();
        }
        if has_suffix_ignore_case(&name, ".ghost") {
            name.truncate(name.len() - ".ghost".len());
        }
        Plugin {
            name,
            active: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonical lowercase form used as the key of sets and maps.
    pub(crate) fn key(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn activate(&mut self) {
        self.active = true;
    }

    pub(crate) fn deactivate(&mut self) {
        self.active = false;
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Whether the name carries a recognised plugin extension.
    pub fn has_plugin_extension(&self) -> bool {
        has_suffix_ignore_case(&self.name, ".esm") || has_suffix_ignore_case(&self.name, ".esp")
    }

    fn plain_path(&self, profile: &GameProfile) -> Utf8PathBuf {
        profile.plugins_folder().join(&self.name)
    }

    fn ghost_path(&self, profile: &GameProfile) -> Utf8PathBuf {
        profile.plugins_folder().join(format!("{}.ghost", self.name))
    }

    /// The on-disk path, respecting any ghost suffix.
    pub fn resolved_path(&self, profile: &GameProfile) -> Utf8PathBuf {
        if self.is_ghosted(profile) {
            self.ghost_path(profile)
        } else {
            self.plain_path(profile)
        }
    }

    pub fn exists(&self, profile: &GameProfile) -> bool {
        self.plain_path(profile).is_file() || self.ghost_path(profile).is_file()
    }

    pub fn is_ghosted(&self, profile: &GameProfile) -> bool {
        !self.plain_path(profile).is_file() && self.ghost_path(profile).is_file()
    }

    /// Rename the `.ghost` file back to its plain name, if ghosted.
    pub fn unghost(&self, profile: &GameProfile) -> Result<(), Error> {
        if !self.is_ghosted(profile) {
            return Ok(());
        }
        let from = self.ghost_path(profile);
        let to = self.plain_path(profile);
        tracing::debug!("unghosting {}", from);
        fs::rename(&from, &to).map_err(|source| Error::FileRenameFailed {
            path: from.into_string(),
            source,
        })
    }

    /// Parse the plugin's header record, ghosted or not.
    pub fn read_header(&self, profile: &GameProfile) -> Result<PluginHeader, Error> {
        let path = self.resolved_path(profile);
        PluginHeader::read(&path, profile.dialect()).map_err(|source| {
            if !self.exists(profile) {
                Error::FileNotFound(self.name.clone())
            } else {
                Error::FileReadFailed {
                    path: path.into_string(),
                    source,
                }
            }
        })
    }

    /// A valid plugin has a recognised extension and a parseable header.
    pub fn is_valid(&self, profile: &GameProfile) -> bool {
        self.has_plugin_extension() && self.read_header(profile).is_ok()
    }

    /// Whether the header's master bit is set. The extension does not
    /// decide this: an `.esp` file can carry the bit.
    pub fn is_master(&self, profile: &GameProfile) -> Result<bool, Error> {
        if !self.has_plugin_extension() {
            return Err(Error::InvalidArgs(format!(
                "\"{}\" is not a valid plugin file",
                self.name
            )));
        }
        Ok(self.read_header(profile)?.is_master())
    }

    /// No-throw variant of [`is_master`](Self::is_master), for sort
    /// comparators and partition scans where a parse failure must not
    /// abort the operation.
    pub fn is_master_no_throw(&self, profile: &GameProfile) -> bool {
        self.is_master(profile).unwrap_or(false)
    }

    pub fn mod_time(&self, profile: &GameProfile) -> Result<FileTime, Error> {
        let path = self.resolved_path(profile);
        let metadata = fs::metadata(&path).map_err(|source| Error::TimestampReadFailed {
            path: path.into_string(),
            source,
        })?;
        Ok(FileTime::from_last_modification_time(&metadata))
    }

    pub fn set_mod_time(&self, profile: &GameProfile, time: FileTime) -> Result<(), Error> {
        let path = self.resolved_path(profile);
        filetime::set_file_mtime(&path, time).map_err(|source| Error::TimestampWriteFailed {
            path: path.into_string(),
            source,
        })
    }

    /// The plugins this one declares as masters.
    pub fn masters(&self, profile: &GameProfile) -> Result<Vec<Plugin>, Error> {
        let header = self.read_header(profile)?;
        Ok(header.masters().iter().map(|name| Plugin::new(name)).collect())
    }

    pub(crate) fn names_match(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl PartialEq for Plugin {
    fn eq(&self, other: &Plugin) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for Plugin {}

impl Hash for Plugin {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.name.as_bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
    }
}

fn has_suffix_ignore_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name.is_char_boundary(name.len() - suffix.len())
        && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameId;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn tes5_plugin_bytes(is_master: bool) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"HEDR");
        data.extend_from_slice(&12u16.to_le_bytes());
        data.extend_from_slice(&[0u8; 12]);

        let mut out = Vec::new();
        out.extend_from_slice(b"TES4");
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&u32::from(is_master).to_le_bytes());
        out.extend_from_slice(&[0u8; 12]);
        out.extend_from_slice(&data);
        out
    }

    fn fixture() -> (TempDir, GameProfile) {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let local = root.join("local");
        fs::create_dir_all(root.join("Data")).unwrap();
        fs::create_dir_all(&local).unwrap();
        let profile = GameProfile::new(GameId::Skyrim, &root, Some(local.as_path())).unwrap();
        (tmp, profile)
    }

    fn write_plugin(profile: &GameProfile, name: &str, is_master: bool) {
        fs::write(profile.plugins_folder().join(name), tes5_plugin_bytes(is_master)).unwrap();
    }

    #[test]
    fn test_name_canonicalization() {
        assert_eq!(Plugin::new("Blank.esp").name(), "Blank.esp");
        assert_eq!(Plugin::new("Blank.esp.ghost").name(), "Blank.esp");
        assert_eq!(Plugin::new("Blank.esp.GHOST").name(), "Blank.esp");
        assert_eq!(Plugin::new("Blank.esp\r").name(), "Blank.esp");
        assert_eq!(Plugin::new("Blank.esp.ghost\r").name(), "Blank.esp");
    }

    #[test]
    fn test_case_insensitive_identity() {
        assert_eq!(Plugin::new("Blank.esp"), Plugin::new("blank.ESP"));
        let mut set = std::collections::HashSet::new();
        set.insert(Plugin::new("Blank.esp"));
        assert!(set.contains(&Plugin::new("BLANK.esp")));
    }

    #[test]
    fn test_extension_check() {
        assert!(Plugin::new("Blank.esm").has_plugin_extension());
        assert!(Plugin::new("Blank.ESP").has_plugin_extension());
        assert!(!Plugin::new("Blank.bsa").has_plugin_extension());
        // The ghost suffix is stripped before the check.
        assert!(Plugin::new("Blank.esp.ghost").has_plugin_extension());
    }

    #[test]
    fn test_ghost_queries_and_unghost() {
        let (_tmp, profile) = fixture();
        write_plugin(&profile, "Blank.esp.ghost", false);

        let plugin = Plugin::new("Blank.esp.ghost");
        assert_eq!(plugin.name(), "Blank.esp");
        assert!(plugin.exists(&profile));
        assert!(plugin.is_ghosted(&profile));

        plugin.unghost(&profile).unwrap();
        assert!(!plugin.is_ghosted(&profile));
        assert!(profile.plugins_folder().join("Blank.esp").is_file());
        // A second unghost is a no-op.
        plugin.unghost(&profile).unwrap();
    }

    #[test]
    fn test_master_bit_not_extension() {
        let (_tmp, profile) = fixture();
        write_plugin(&profile, "Blank.esp", true);
        write_plugin(&profile, "Blank.esm", false);

        assert!(Plugin::new("Blank.esp").is_master(&profile).unwrap());
        assert!(!Plugin::new("Blank.esm").is_master(&profile).unwrap());
    }

    #[test]
    fn test_missing_plugin_errors() {
        let (_tmp, profile) = fixture();
        let plugin = Plugin::new("Gone.esp");

        assert!(!plugin.exists(&profile));
        assert!(matches!(
            plugin.read_header(&profile),
            Err(Error::FileNotFound(_))
        ));
        assert!(!plugin.is_valid(&profile));
        assert!(!plugin.is_master_no_throw(&profile));
    }

    #[test]
    fn test_invalid_extension_is_master_errors() {
        let (_tmp, profile) = fixture();
        let plugin = Plugin::new("NotAPlugin.bsa");
        assert!(matches!(
            plugin.is_master(&profile),
            Err(Error::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_mod_time_round_trip() {
        let (_tmp, profile) = fixture();
        write_plugin(&profile, "Blank.esm", true);

        let plugin = Plugin::new("Blank.esm");
        let stamp = FileTime::from_unix_time(1_400_000_000, 0);
        plugin.set_mod_time(&profile, stamp).unwrap();
        assert_eq!(plugin.mod_time(&profile).unwrap(), stamp);
    }
}

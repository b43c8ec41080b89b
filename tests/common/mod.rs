//! Shared fixture: a synthetic game installation under a temp
//! directory, with byte-accurate plugin files the header parser
//! accepts.

#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use filetime::FileTime;
use loadorder::{GameId, Handle, HeaderDialect, Outcome};
use std::fs;
use tempfile::TempDir;

pub struct GameFixture {
    _tmp: TempDir,
    pub id: GameId,
    pub game_path: Utf8PathBuf,
    pub local_path: Utf8PathBuf,
}

impl GameFixture {
    pub fn new(id: GameId) -> GameFixture {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let game_path = root.join("game");
        let local_path = root.join("local");
        fs::create_dir_all(game_path.join(data_dir_name(id))).unwrap();
        fs::create_dir_all(&local_path).unwrap();
        GameFixture {
            _tmp: tmp,
            id,
            game_path,
            local_path,
        }
    }

    /// The usual Blank plugin family, with staggered timestamps so
    /// timestamp-ordered games have a defined order.
    pub fn populated(id: GameId) -> GameFixture {
        let fixture = GameFixture::new(id);
        fixture.write_master("Blank.esm");
        fixture.write_master("Blank - Different.esm");
        fixture.write_plugin_full("Blank - Master Dependent.esm", true, &["Blank.esm"]);
        fixture.write_plugin("Blank.esp");
        fixture.write_plugin("Blank - Different.esp");

        fixture.set_mtime("Blank.esm", 1_000_000);
        fixture.set_mtime("Blank - Different.esm", 1_000_060);
        fixture.set_mtime("Blank - Master Dependent.esm", 1_000_120);
        fixture.set_mtime("Blank.esp", 1_000_180);
        fixture.set_mtime("Blank - Different.esp", 1_000_240);
        fixture
    }

    pub fn data_path(&self) -> Utf8PathBuf {
        self.game_path.join(data_dir_name(self.id))
    }

    pub fn active_file(&self) -> Utf8PathBuf {
        match self.id {
            GameId::Morrowind => self.game_path.join("Morrowind.ini"),
            _ => self.local_path.join("plugins.txt"),
        }
    }

    pub fn load_order_file(&self) -> Utf8PathBuf {
        match self.id {
            GameId::Morrowind => self.game_path.join("loadorder.txt"),
            _ => self.local_path.join("loadorder.txt"),
        }
    }

    pub fn write_master(&self, name: &str) {
        self.write_plugin_full(name, true, &[]);
    }

    pub fn write_plugin(&self, name: &str) {
        self.write_plugin_full(name, false, &[]);
    }

    pub fn write_plugin_full(&self, name: &str, is_master: bool, masters: &[&str]) {
        let bytes = plugin_bytes(self.id.dialect(), is_master, masters);
        fs::write(self.data_path().join(name), bytes).unwrap();
    }

    /// A file with a plugin extension but garbage contents.
    pub fn write_invalid(&self, name: &str) {
        fs::write(self.data_path().join(name), b"not a plugin").unwrap();
    }

    pub fn ghost(&self, name: &str) {
        let data = self.data_path();
        fs::rename(data.join(name), data.join(format!("{}.ghost", name))).unwrap();
    }

    pub fn delete_plugin(&self, name: &str) {
        fs::remove_file(self.data_path().join(name)).unwrap();
    }

    pub fn set_mtime(&self, name: &str, unix_seconds: i64) {
        let path = self.resolve(name);
        filetime::set_file_mtime(path, FileTime::from_unix_time(unix_seconds, 0)).unwrap();
    }

    pub fn mtime(&self, name: &str) -> i64 {
        let metadata = fs::metadata(self.resolve(name)).unwrap();
        FileTime::from_last_modification_time(&metadata).unix_seconds()
    }

    pub fn open(&self) -> Handle {
        self.open_outcome().value
    }

    pub fn open_outcome(&self) -> Outcome<Handle> {
        Handle::open(self.id, &self.game_path, Some(self.local_path.as_path())).unwrap()
    }

    fn resolve(&self, name: &str) -> Utf8PathBuf {
        let plain = self.data_path().join(name);
        if plain.is_file() {
            plain
        } else {
            self.data_path().join(format!("{}.ghost", name))
        }
    }
}

pub fn write_lines(path: &Utf8Path, lines: &[&str]) {
    let mut contents = String::new();
    for line in lines {
        contents.push_str(line);
        contents.push('\n');
    }
    fs::write(path, contents).unwrap();
}

pub fn read_lines(path: &Utf8Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn data_dir_name(id: GameId) -> &'static str {
    match id {
        GameId::Morrowind => "Data Files",
        _ => "Data",
    }
}

/// Build a minimal plugin file: the header record with a HEDR subrecord
/// and one MAST/DATA pair per master.
pub fn plugin_bytes(dialect: HeaderDialect, is_master: bool, masters: &[&str]) -> Vec<u8> {
    let mut data = Vec::new();
    match dialect {
        HeaderDialect::Tes3 => {
            sub32(&mut data, b"HEDR", &[0u8; 12]);
            for master in masters {
                sub32(&mut data, b"MAST", &zstring(master));
                sub32(&mut data, b"DATA", &[0u8; 8]);
            }
        }
        HeaderDialect::Tes4 | HeaderDialect::Tes5 => {
            sub16(&mut data, b"HEDR", &[0u8; 12]);
            for master in masters {
                sub16(&mut data, b"MAST", &zstring(master));
                sub16(&mut data, b"DATA", &[0u8; 8]);
            }
        }
    }

    let flags = u32::from(is_master);
    let mut out = Vec::new();
    match dialect {
        HeaderDialect::Tes3 => {
            out.extend_from_slice(b"TES3");
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&flags.to_le_bytes());
        }
        HeaderDialect::Tes4 => {
            out.extend_from_slice(b"TES4");
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&flags.to_le_bytes());
            out.extend_from_slice(&[0u8; 8]);
        }
        HeaderDialect::Tes5 => {
            out.extend_from_slice(b"TES4");
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&flags.to_le_bytes());
            out.extend_from_slice(&[0u8; 12]);
        }
    }
    out.extend_from_slice(&data);
    out
}

fn zstring(text: &str) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

fn sub16(out: &mut Vec<u8>, kind: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(kind);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
}

fn sub32(out: &mut Vec<u8>, kind: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(kind);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

//! Integration tests for reading, replacing and repositioning the load
//! order through a [`Handle`].

mod common;

use common::{read_lines, write_lines, GameFixture};
use loadorder::{Error, GameId, LoadOrderMethod, Warning};

#[test]
fn test_load_order_method_per_variant() {
    let oblivion = GameFixture::populated(GameId::Oblivion);
    assert_eq!(
        oblivion.open().load_order_method(),
        LoadOrderMethod::Timestamp
    );

    let skyrim = GameFixture::populated(GameId::Skyrim);
    skyrim.write_master("Skyrim.esm");
    assert_eq!(skyrim.open().load_order_method(), LoadOrderMethod::Textfile);
}

#[test]
fn test_set_load_order_single_master() {
    let fixture = GameFixture::populated(GameId::Oblivion);
    let mut handle = fixture.open();
    handle.set_game_master("Blank.esm").unwrap();

    let outcome = handle.set_load_order(&["Blank.esm"]).unwrap();
    assert!(outcome.warning.is_none());
    assert_eq!(handle.plugin_position("Blank.esm").unwrap(), Some(0));
}

#[test]
fn test_set_load_order_missing_plugin_is_rejected() {
    let fixture = GameFixture::populated(GameId::Oblivion);
    let mut handle = fixture.open();
    handle.set_game_master("Blank.esm").unwrap();

    let before = handle.load_order().unwrap().value;
    let result = handle.set_load_order(&["Blank.esm", "Blank.missing.esp"]);
    assert!(matches!(result, Err(Error::FileNotFound(_))));
    assert_eq!(handle.load_order().unwrap().value, before);
}

#[test]
fn test_set_load_order_duplicate_is_rejected() {
    let fixture = GameFixture::populated(GameId::Oblivion);
    let mut handle = fixture.open();
    handle.set_game_master("Blank.esm").unwrap();

    let before = handle.load_order().unwrap().value;
    let result = handle.set_load_order(&["Blank.esm", "Blank.esp", "Blank.esp"]);
    assert!(matches!(result, Err(Error::InvalidArgs(_))));
    assert_eq!(handle.load_order().unwrap().value, before);
}

#[test]
fn test_set_load_order_master_after_non_master_is_rejected() {
    let fixture = GameFixture::populated(GameId::Oblivion);
    let mut handle = fixture.open();
    handle.set_game_master("Blank.esm").unwrap();

    let before = handle.load_order().unwrap().value;
    let result = handle.set_load_order(&["Blank.esm", "Blank.esp", "Blank - Different.esm"]);
    assert!(matches!(result, Err(Error::InvalidArgs(_))));
    assert_eq!(handle.load_order().unwrap().value, before);
}

#[test]
fn test_set_load_order_non_plugin_file_is_rejected() {
    let fixture = GameFixture::populated(GameId::Oblivion);
    fixture.write_invalid("NotAPlugin.esm");
    let mut handle = fixture.open();
    handle.set_game_master("Blank.esm").unwrap();

    let result = handle.set_load_order(&["Blank.esm", "NotAPlugin.esm"]);
    assert!(matches!(result, Err(Error::InvalidArgs(_))));
}

#[test]
fn test_set_load_order_without_game_master_warns_on_timestamp() {
    let fixture = GameFixture::populated(GameId::Oblivion);
    let mut handle = fixture.open();

    // The main master is still Oblivion.esm, which is not installed and
    // not first; for timestamp games that is a warning, not an error.
    let outcome = handle.set_load_order(&["Blank.esm", "Blank.esp"]).unwrap();
    assert!(matches!(outcome.warning, Some(Warning::InvalidList(_))));
}

#[test]
fn test_set_load_order_textfile_requires_master_first() {
    let fixture = GameFixture::populated(GameId::Skyrim);
    fixture.write_master("Skyrim.esm");
    let mut handle = fixture.open();

    let result = handle.set_load_order(&["Blank.esm", "Blank - Different.esm"]);
    assert!(matches!(result, Err(Error::InvalidArgs(_))));
}

#[test]
fn test_set_load_order_textfile_round_trip() {
    let fixture = GameFixture::populated(GameId::Skyrim);
    fixture.write_master("Skyrim.esm");
    let mut handle = fixture.open();

    let names = ["Skyrim.esm", "Blank.esm", "Blank - Different.esm"];
    handle.set_load_order(&names).unwrap();

    assert_eq!(handle.plugin_position("Blank.esm").unwrap(), Some(1));
    assert_eq!(
        handle.plugin_position("Blank - Different.esm").unwrap(),
        Some(2)
    );
    assert_eq!(read_lines(&fixture.load_order_file()), names);
}

#[test]
fn test_set_load_order_timestamp_round_trip() {
    let fixture = GameFixture::populated(GameId::Oblivion);
    let mut handle = fixture.open();
    handle.set_game_master("Blank.esm").unwrap();

    let names = [
        "Blank.esm",
        "Blank - Master Dependent.esm",
        "Blank - Different.esm",
        "Blank - Different.esp",
        "Blank.esp",
    ];
    handle.set_load_order(&names).unwrap();
    // Reading back re-derives the order from the stamped mtimes.
    assert_eq!(handle.load_order().unwrap().value, names);
}

#[test]
fn test_ghosted_plugins_persist_under_canonical_names() {
    let fixture = GameFixture::populated(GameId::Skyrim);
    fixture.write_master("Skyrim.esm");
    fixture.ghost("Blank - Different.esm");
    write_lines(&fixture.load_order_file(), &["Skyrim.esm", "Blank.esm"]);

    let mut handle = fixture.open();
    let order = handle.load_order().unwrap().value;

    // The ghosted master was scanned in at the master partition
    // boundary, under its non-ghost name.
    assert_eq!(order[2], "Blank - Different.esm");
    assert_eq!(read_lines(&fixture.load_order_file())[2], "Blank - Different.esm");
}

#[test]
fn test_timestamp_collisions_pad_by_sixty_seconds() {
    let fixture = GameFixture::new(GameId::Oblivion);
    fixture.write_master("Blank.esm");
    fixture.write_plugin("Blank.esp");
    fixture.write_plugin("Blank - Different.esp");
    for name in ["Blank.esm", "Blank.esp", "Blank - Different.esp"] {
        fixture.set_mtime(name, 5_000_000);
    }

    let mut handle = fixture.open();
    handle.set_game_master("Blank.esm").unwrap();
    handle
        .set_load_order(&["Blank.esm", "Blank.esp", "Blank - Different.esp"])
        .unwrap();

    assert_eq!(fixture.mtime("Blank.esm"), 5_000_000);
    assert_eq!(fixture.mtime("Blank.esp"), 5_000_060);
    assert_eq!(fixture.mtime("Blank - Different.esp"), 5_000_120);
}

#[test]
fn test_set_plugin_position_clamps_to_end() {
    let fixture = GameFixture::populated(GameId::Oblivion);
    let mut handle = fixture.open();
    handle.set_game_master("Blank.esm").unwrap();

    handle.set_plugin_position("Blank.esp", 100).unwrap();
    let order = handle.load_order().unwrap().value;
    assert_eq!(order.last().map(String::as_str), Some("Blank.esp"));
}

#[test]
fn test_set_plugin_position_protects_textfile_master() {
    let fixture = GameFixture::populated(GameId::Skyrim);
    fixture.write_master("Skyrim.esm");
    let mut handle = fixture.open();
    handle.load_order().unwrap();

    assert!(matches!(
        handle.set_plugin_position("Skyrim.esm", 2),
        Err(Error::InvalidArgs(_))
    ));
    assert!(matches!(
        handle.set_plugin_position("Blank.esm", 0),
        Err(Error::InvalidArgs(_))
    ));
}

#[test]
fn test_load_order_manifest_must_be_utf8() {
    let fixture = GameFixture::populated(GameId::Skyrim);
    fixture.write_master("Skyrim.esm");
    std::fs::write(fixture.load_order_file(), b"Skyrim.esm\n\xff\xfe\n").unwrap();

    let mut handle = fixture.open();
    assert!(matches!(handle.load_order(), Err(Error::FileNotUtf8(_))));
}

#[test]
fn test_unparseable_plugins_are_dropped_from_scan() {
    let fixture = GameFixture::populated(GameId::Oblivion);
    fixture.write_invalid("Corrupt.esp");
    let mut handle = fixture.open();
    handle.set_game_master("Blank.esm").unwrap();

    let order = handle.load_order().unwrap().value;
    assert!(!order.iter().any(|name| name == "Corrupt.esp"));
}

//! Seed and seed-structure behavior against file:// collections.

mod common;

use std::fs;

use common::Harness;
use germinate::seeds::{Seed, SeedCache};

#[test]
fn seed_opens_from_collection() {
    let h = Harness::new();
    h.add_seed("collection.dist", "test", &[]);
    h.add_seed_package("collection.dist", "test", "foo");

    let cache = SeedCache::new();
    let seed = Seed::open(
        &cache,
        &[h.seed_base()],
        &["collection.dist".to_string()],
        "test",
        None,
    )
    .unwrap();
    assert_eq!(seed.name(), "test");
    assert_eq!(seed.base(), Some(h.seed_base().as_str()));
    assert_eq!(seed.branch(), Some("collection.dist"));
    assert_eq!(seed.text(), " * foo\n");
}

#[test]
fn seed_opens_without_scheme() {
    let h = Harness::new();
    h.add_seed("collection.dist", "test", &[]);
    h.add_seed_package("collection.dist", "test", "foo");

    let cache = SeedCache::new();
    let seed = Seed::open(
        &cache,
        &[h.seeds_dir.display().to_string()],
        &["collection.dist".to_string()],
        "test",
        None,
    )
    .unwrap();
    assert_eq!(seed.lines().collect::<Vec<_>>(), vec![" * foo"]);
}

#[test]
fn seed_open_fails_cleanly() {
    let h = Harness::new();
    let cache = SeedCache::new();
    let result = Seed::open(
        &cache,
        &[h.seed_base()],
        &["collection.dist".to_string()],
        "nonexistent",
        None,
    );
    assert!(result.is_err());
}

#[test]
fn structure_basic_properties() {
    let h = Harness::new();
    h.add_seed("collection.dist", "base", &[]);
    h.add_seed_package("collection.dist", "base", "base-package");
    h.add_seed("collection.dist", "desktop", &["base"]);
    h.add_seed_package("collection.dist", "desktop", "desktop-package");

    let cache = SeedCache::new();
    let structure = h.open_structure(&cache, "collection.dist");
    assert_eq!(structure.branch(), "collection.dist");
    assert!(structure.features().is_empty());
    assert_eq!(structure.supported(), "desktop");
    assert_eq!(structure.names(), ["base", "desktop"]);
    assert_eq!(structure.inner_seeds("desktop"), ["base", "desktop"]);
    assert_eq!(structure.inner_seeds("base"), ["base"]);
    assert_eq!(structure.outer_seeds("base"), ["base", "desktop"]);
    assert_eq!(structure.seed("base").unwrap().text(), " * base-package\n");
}

#[test]
fn structure_follows_includes() {
    let h = Harness::new();
    h.add_seed("one.dist", "base", &[]);
    h.add_seed_package("one.dist", "base", "base-package");
    h.add_structure_line("two.dist", "include one.dist");
    h.add_seed("two.dist", "desktop", &[]);
    h.add_seed_package("two.dist", "desktop", "desktop-package");

    let cache = SeedCache::new();
    let structure = h.open_structure(&cache, "two.dist");
    assert_eq!(structure.branch(), "two.dist");
    assert_eq!(structure.seed("base").unwrap().branch(), Some("one.dist"));
    assert_eq!(structure.seed("base").unwrap().text(), " * base-package\n");
    assert_eq!(structure.seed("desktop").unwrap().branch(), Some("two.dist"));
    assert_eq!(
        structure.seed("desktop").unwrap().text(),
        " * desktop-package\n"
    );
}

#[test]
fn later_branches_override_earlier_branches() {
    let h = Harness::new();
    h.add_seed("one.dist", "base", &[]);
    h.add_seed_package("one.dist", "base", "base-package");
    h.add_seed("one.dist", "desktop", &[]);
    h.add_seed_package("one.dist", "desktop", "desktop-package-one");
    h.add_structure_line("two.dist", "include one.dist");
    h.add_seed("two.dist", "desktop", &[]);
    h.add_seed_package("two.dist", "desktop", "desktop-package-two");

    let cache = SeedCache::new();
    let structure = h.open_structure(&cache, "two.dist");
    let mut names = structure.names().to_vec();
    names.sort();
    assert_eq!(names, ["base", "desktop"]);
    assert_eq!(
        structure.seed("desktop").unwrap().text(),
        " * desktop-package-two\n"
    );
}

#[test]
fn features_union_across_branches() {
    let h = Harness::new();
    h.add_structure_line("one.dist", "feature follow-recommends");
    h.add_seed("one.dist", "base", &[]);
    h.add_seed_package("one.dist", "base", "base-package");
    h.add_structure_line("two.dist", "include one.dist");
    h.add_structure_line("two.dist", "feature build-depends");
    h.add_seed("two.dist", "desktop", &[]);
    h.add_seed_package("two.dist", "desktop", "desktop-package");

    let cache = SeedCache::new();
    let structure = h.open_structure(&cache, "two.dist");
    assert!(structure.has_feature("follow-recommends"));
    assert!(structure.has_feature("build-depends"));
}

#[test]
fn inheritance_expands_transitively() {
    let h = Harness::new();
    h.add_seed("collection.dist", "core", &[]);
    h.add_seed_package("collection.dist", "core", "core-package");
    h.add_seed("collection.dist", "base", &["core"]);
    h.add_seed_package("collection.dist", "base", "base-package");
    h.add_seed("collection.dist", "desktop", &["base"]);
    h.add_seed_package("collection.dist", "desktop", "desktop-package");

    let cache = SeedCache::new();
    let structure = h.open_structure(&cache, "collection.dist");
    assert_eq!(structure.inner_seeds("desktop"), ["core", "base", "desktop"]);
    assert_eq!(structure.outer_seeds("core"), ["core", "base", "desktop"]);
    assert_eq!(structure.strictly_outer_seeds("base"), ["desktop"]);
}

#[test]
fn limit_restricts_names() {
    let h = Harness::new();
    for (name, parents) in [
        ("one", vec![]),
        ("two", vec!["one"]),
        ("three", vec![]),
        ("four", vec![]),
    ] {
        h.add_seed("collection.dist", name, &parents);
        h.add_seed_package("collection.dist", name, name);
    }

    let cache = SeedCache::new();
    let mut structure = h.open_structure(&cache, "collection.dist");
    let mut names = structure.names().to_vec();
    names.sort();
    assert_eq!(names, ["four", "one", "three", "two"]);

    structure
        .limit(&["two".to_string(), "three".to_string()])
        .unwrap();
    let mut names = structure.names().to_vec();
    names.sort();
    assert_eq!(names, ["one", "three", "two"]);
}

#[test]
fn add_grafts_a_custom_seed() {
    let h = Harness::new();
    h.add_seed("collection.dist", "base", &[]);
    h.add_seed_package("collection.dist", "base", "base");

    let cache = SeedCache::new();
    let mut structure = h.open_structure(&cache, "collection.dist");
    structure.add(
        "custom",
        &[" * custom-one".to_string(), " * custom-two".to_string()],
        Some("base"),
    );
    assert!(structure.contains("custom"));
    assert!(structure.names().contains(&"custom".to_string()));
    assert_eq!(structure.inner_seeds("custom"), ["base", "custom"]);
    let custom = structure.seed("custom").unwrap();
    assert!(custom.base().is_none());
    assert!(custom.branch().is_none());
    assert_eq!(custom.text(), " * custom-one\n * custom-two\n");
}

#[test]
fn write_structure_file() {
    let h = Harness::new();
    h.add_seed("collection.dist", "one", &[]);
    h.add_seed_package("collection.dist", "one", "one");
    h.add_seed("collection.dist", "two", &["one"]);
    h.add_seed_package("collection.dist", "two", "two");

    let cache = SeedCache::new();
    let structure = h.open_structure(&cache, "collection.dist");
    let out = h.path().join("structure");
    structure.write(&out).unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap(), "one:\ntwo: one\n");
}

#[test]
fn write_dot_file() {
    let h = Harness::new();
    h.add_seed("collection.dist", "one", &[]);
    h.add_seed_package("collection.dist", "one", "one");
    h.add_seed("collection.dist", "two", &["one"]);
    h.add_seed_package("collection.dist", "two", "two");

    let cache = SeedCache::new();
    let structure = h.open_structure(&cache, "collection.dist");
    let out = h.path().join("structure.dot");
    structure.write_dot(&out).unwrap();
    assert_eq!(
        fs::read_to_string(&out).unwrap(),
        "digraph structure {\n    node [color=lightblue2, style=filled];\n    \"one\" -> \"two\";\n}\n"
    );
}

#[test]
fn write_seed_text() {
    let h = Harness::new();
    h.add_seed("collection.dist", "one", &[]);
    h.add_seed_package("collection.dist", "one", "one-package");

    let cache = SeedCache::new();
    let structure = h.open_structure(&cache, "collection.dist");
    let out = h.path().join("one.seedtext");
    structure.write_seed_text(&out, "one").unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap(), " * one-package\n");
}

#[test]
fn write_seed_text_utf8() {
    let h = Harness::new();
    h.add_seed("collection.dist", "base", &[]);
    h.add_seed_package("collection.dist", "base", "base # äöü");

    let cache = SeedCache::new();
    let structure = h.open_structure(&cache, "collection.dist");
    let out = h.path().join("base.seedtext");
    structure.write_seed_text(&out, "base").unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap(), " * base # äöü\n");
}

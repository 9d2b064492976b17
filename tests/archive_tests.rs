//! Archive adapter behavior against file:// mirrors.

mod common;

use std::fs::{self, File};
use std::io::Write;

use common::Harness;
use germinate::archive::{IndexKind, TagFile};

fn tagfile(h: &Harness, installer: bool) -> TagFile {
    TagFile::new(
        &["unstable".to_string()],
        &["main".to_string()],
        "i386",
        &[h.mirror()],
        None,
        installer,
        true,
    )
}

fn write_gz(path: &std::path::Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = File::create(path).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

fn write_bz2(path: &std::path::Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = File::create(path).unwrap();
    let mut encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

fn write_xz(path: &std::path::Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = File::create(path).unwrap();
    let mut encoder = xz2::write::XzEncoder::new(file, 6);
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

#[test]
fn sections_from_gzip_archive() {
    let h = Harness::new();
    let main_dir = h.archive_dir.join("dists/unstable/main");
    write_gz(
        &main_dir.join("binary-i386/Packages.gz"),
        "Package: test\nVersion: 1.0\nArchitecture: i386\nMaintainer: úḃúñŧů đəvẽłõṗèŗṡ\n\n",
    );
    write_gz(
        &main_dir.join("source/Sources.gz"),
        "Package: test\nVersion: 1.0\n\n",
    );

    let sections: Vec<_> = tagfile(&h, false)
        .sections()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].0, IndexKind::Packages);
    assert_eq!(sections[0].1.get("Package"), Some("test"));
    assert_eq!(
        sections[0].1.get("Maintainer"),
        Some("úḃúñŧů đəvẽłõṗèŗṡ")
    );
    assert_eq!(sections[1].0, IndexKind::Sources);
}

#[test]
fn compression_fallback_prefers_xz() {
    let h = Harness::new();
    let main_dir = h.archive_dir.join("dists/unstable/main");
    write_xz(
        &main_dir.join("binary-i386/Packages.xz"),
        "Package: from-xz\nVersion: 1.0\n\n",
    );
    // A decoy in a lower-priority compression format.
    write_gz(
        &main_dir.join("binary-i386/Packages.gz"),
        "Package: from-gz\nVersion: 1.0\n\n",
    );
    write_bz2(
        &main_dir.join("source/Sources.bz2"),
        "Package: src\nVersion: 1.0\n\n",
    );

    let sections: Vec<_> = tagfile(&h, false)
        .sections()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(sections[0].1.get("Package"), Some("from-xz"));
    assert_eq!(sections[1].1.get("Package"), Some("src"));
}

#[test]
fn uncompressed_indices_work() {
    let h = Harness::new();
    h.add_package("unstable", "main", "i386", "plain", "1.0", false, &[]);
    h.add_source("unstable", "main", "plain", "1.0", &["plain"], &[]);

    let sections: Vec<_> = tagfile(&h, false)
        .sections()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].1.get("Package"), Some("plain"));
}

#[test]
fn installer_packages_are_streamed_last() {
    let h = Harness::new();
    h.add_package("unstable", "main", "i386", "normal", "1.0", false, &[]);
    h.add_source("unstable", "main", "normal", "1.0", &["normal"], &[]);
    h.add_package("unstable", "main", "i386", "some-udeb", "1.0", true, &[]);

    let sections: Vec<_> = tagfile(&h, true)
        .sections()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let kinds: Vec<IndexKind> = sections.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(
        kinds,
        [
            IndexKind::Packages,
            IndexKind::Sources,
            IndexKind::InstallerPackages
        ]
    );
}

#[test]
fn missing_installer_packages_is_not_fatal() {
    let h = Harness::new();
    h.add_package("unstable", "main", "i386", "normal", "1.0", false, &[]);
    h.add_source("unstable", "main", "normal", "1.0", &["normal"], &[]);

    let sections: Vec<_> = tagfile(&h, true)
        .sections()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(sections.len(), 2);
}

#[test]
fn missing_sources_is_fatal() {
    let h = Harness::new();
    h.add_package("unstable", "main", "i386", "normal", "1.0", false, &[]);

    let result: Result<Vec<_>, _> = tagfile(&h, false).sections().unwrap().collect();
    assert!(result.is_err());
}

#[test]
fn multiple_dists_stream_in_order() {
    let h = Harness::new();
    h.add_package("warty", "main", "i386", "old", "1.0", false, &[]);
    h.add_source("warty", "main", "old", "1.0", &["old"], &[]);
    h.add_package("warty-updates", "main", "i386", "new", "1.1", false, &[]);
    h.add_source("warty-updates", "main", "new", "1.1", &["new"], &[]);

    let archive = TagFile::new(
        &["warty".to_string(), "warty-updates".to_string()],
        &["main".to_string()],
        "i386",
        &[h.mirror()],
        None,
        false,
        true,
    );
    let sections: Vec<_> = archive
        .sections()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let packages: Vec<&str> = sections
        .iter()
        .filter(|(kind, _)| *kind == IndexKind::Packages)
        .map(|(_, stanza)| stanza.get("Package").unwrap())
        .collect();
    assert_eq!(packages, ["old", "new"]);
}

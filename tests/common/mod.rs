//! Shared fixture builders: a temporary archive tree and seed collection,
//! written the way a real mirror lays them out.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use germinate::archive::TagFile;
use germinate::seeds::SeedCache;
use germinate::{Germinator, SeedStructure};

pub struct Harness {
    temp: TempDir,
    pub archive_dir: PathBuf,
    pub seeds_dir: PathBuf,
}

impl Harness {
    pub fn new() -> Harness {
        let temp = tempfile::tempdir().unwrap();
        let archive_dir = temp.path().join("archive");
        let seeds_dir = temp.path().join("seeds");
        fs::create_dir_all(&archive_dir).unwrap();
        fs::create_dir_all(&seeds_dir).unwrap();
        Harness {
            temp,
            archive_dir,
            seeds_dir,
        }
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    fn append(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    pub fn add_source(
        &self,
        dist: &str,
        component: &str,
        src: &str,
        ver: &str,
        bins: &[&str],
        fields: &[(&str, &str)],
    ) {
        let path = self
            .archive_dir
            .join("dists")
            .join(dist)
            .join(component)
            .join("source")
            .join("Sources");
        let mut stanza = format!(
            "Package: {}\nVersion: {}\nBinary: {}\n",
            src,
            ver,
            bins.join(", ")
        );
        for (key, value) in fields {
            stanza.push_str(&format!("{}: {}\n", key, value));
        }
        stanza.push('\n');
        Self::append(&path, &stanza);
    }

    pub fn add_package(
        &self,
        dist: &str,
        component: &str,
        arch: &str,
        pkg: &str,
        ver: &str,
        udeb: bool,
        fields: &[(&str, &str)],
    ) {
        let subdir = if udeb {
            format!("debian-installer/binary-{}", arch)
        } else {
            format!("binary-{}", arch)
        };
        let path = self
            .archive_dir
            .join("dists")
            .join(dist)
            .join(component)
            .join(subdir)
            .join("Packages");
        let mut stanza = format!("Package: {}\nVersion: {}\n", pkg, ver);
        for (key, value) in fields {
            stanza.push_str(&format!("{}: {}\n", key, value));
        }
        stanza.push('\n');
        Self::append(&path, &stanza);
    }

    pub fn add_structure_line(&self, seed_dist: &str, line: &str) {
        let path = self.seeds_dir.join(seed_dist).join("STRUCTURE");
        Self::append(&path, &format!("{}\n", line));
    }

    pub fn add_seed(&self, seed_dist: &str, name: &str, parents: &[&str]) {
        self.add_structure_line(seed_dist, &format!("{}: {}", name, parents.join(" ")));
    }

    pub fn add_seed_package(&self, seed_dist: &str, seed_name: &str, pkg: &str) {
        self.add_seed_line(seed_dist, seed_name, &format!(" * {}", pkg));
    }

    pub fn add_seed_line(&self, seed_dist: &str, seed_name: &str, line: &str) {
        let path = self.seeds_dir.join(seed_dist).join(seed_name);
        Self::append(&path, &format!("{}\n", line));
    }

    pub fn add_blacklist_package(&self, seed_dist: &str, pkg: &str) {
        self.add_seed_line(seed_dist, "blacklist", &format!(" * {}", pkg));
    }

    pub fn seed_base(&self) -> String {
        format!("file://{}", self.seeds_dir.display())
    }

    pub fn mirror(&self) -> String {
        format!("file://{}", self.archive_dir.display())
    }

    pub fn open_structure(&self, cache: &SeedCache, branch: &str) -> SeedStructure {
        SeedStructure::new(cache, branch, &[self.seed_base()], None).unwrap()
    }

    pub fn tagfile(&self, dists: &[&str], components: &[&str], arch: &str) -> TagFile {
        TagFile::new(
            &to_strings(dists),
            &to_strings(components),
            arch,
            &[self.mirror()],
            None,
            true,
            true,
        )
    }

    /// Run the standard pipeline: parse, plant, grow, extras, rdepends.
    pub fn germinate(&self, branch: &str, dist: &str, arch: &str) -> (Germinator, SeedStructure) {
        let cache = SeedCache::new();
        let structure = self.open_structure(&cache, branch);
        let mut g = Germinator::new(arch);
        let archive = self.tagfile(&[dist], &["main"], arch);
        g.parse_archive(&archive).unwrap();
        g.plant_seeds(&structure).unwrap();
        g.grow(&structure);
        g.add_extras(&structure);
        g.reverse_depends(&structure);
        (g, structure)
    }
}

pub fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Parse a columnar output file into package -> remaining columns.
pub fn parse_columnar(path: &Path) -> BTreeMap<String, Vec<String>> {
    let content = fs::read_to_string(path).unwrap();
    let mut map = BTreeMap::new();
    for line in content.lines().skip(2) {
        if line.starts_with('-') {
            break;
        }
        let fields: Vec<String> = line.split('|').map(|f| f.trim().to_string()).collect();
        map.insert(fields[0].clone(), fields[1..].to_vec());
    }
    map
}

/// Every package must sit in exactly one attributed set of exactly one
/// seed.
pub fn assert_single_ownership(g: &Germinator) {
    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    for seedname in g.seed_names() {
        let mut sets: Vec<(&str, Vec<String>)> = vec![
            ("seed", g.seed_entries(seedname)),
            ("seed-recommends", g.seed_recommends(seedname)),
            ("depends", g.seed_depends(seedname)),
            ("build-depends", g.seed_build_depends(seedname)),
        ];
        for (setname, members) in sets.drain(..) {
            for pkg in members {
                let place = format!("{}/{}", seedname, setname);
                if let Some(previous) = seen.insert(pkg.clone(), place.clone()) {
                    panic!("{} owned by both {} and {}", pkg, previous, place);
                }
            }
        }
    }
}

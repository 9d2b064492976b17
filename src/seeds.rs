//! Fetch seeds from a URL collection or from a VCS.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use tempfile::TempDir;

use crate::errors::{Result, SeedError};
use crate::tsort::topo_sort;

/// Version control system to use for seeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeedVcs {
    /// Detect from URL.
    Auto,
    Bzr,
    Git,
}

/// Facilitate atomic writing of files: output goes to `PATH.new` and is
/// renamed over PATH on commit.  An uncommitted file is cleaned up on drop.
pub struct AtomicFile {
    path: PathBuf,
    tmp: PathBuf,
    file: Option<BufWriter<File>>,
}

impl AtomicFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<AtomicFile> {
        let path = path.as_ref().to_path_buf();
        let tmp = PathBuf::from(format!("{}.new", path.display()));
        let file = Some(BufWriter::new(File::create(&tmp)?));
        Ok(AtomicFile { path, tmp, file })
    }

    pub fn commit(mut self) -> Result<()> {
        let mut file = self.file.take().expect("AtomicFile committed twice");
        file.flush()?;
        drop(file);
        fs::rename(&self.tmp, &self.path)?;
        Ok(())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .as_mut()
            .expect("AtomicFile written after commit")
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .as_mut()
            .expect("AtomicFile flushed after commit")
            .flush()
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Cache of VCS checkouts, one subdirectory per branch.  The backing
/// temporary directory is created on first use and removed when the cache
/// is dropped, whatever the exit path.
#[derive(Default)]
pub struct SeedCache {
    dir: RefCell<Option<TempDir>>,
}

impl SeedCache {
    pub fn new() -> SeedCache {
        SeedCache::default()
    }

    fn checkout(&self, branch: &str) -> Result<PathBuf> {
        let mut dir = self.dir.borrow_mut();
        if dir.is_none() {
            *dir = Some(tempfile::Builder::new().prefix("germinate-").tempdir()?);
        }
        Ok(dir.as_ref().unwrap().path().join(branch))
    }
}

fn seed_err(msg: String) -> anyhow::Error {
    SeedError(msg).into()
}

fn join_slash(base: &str, tail: &str) -> String {
    let mut path = if base.ends_with('/') {
        format!("{}{}", base, tail)
    } else {
        format!("{}/{}", base, tail)
    };
    if !path.ends_with('/') {
        path.push('/');
    }
    path
}

fn has_scheme(s: &str) -> bool {
    s.contains("://")
}

/// A single seed from a collection.
#[derive(Clone, Debug)]
pub struct Seed {
    name: String,
    base: Option<String>,
    branch: Option<String>,
    text: String,
}

impl Seed {
    fn open_seed_bzr(cache: &SeedCache, base: &str, branch: &str, name: &str) -> Result<String> {
        let checkout = cache.checkout(branch)?;
        if !checkout.is_dir() {
            let path = join_slash(base, branch);
            let mut command = Command::new("bzr");
            // https://bugs.launchpad.net/bzr/+bug/39542
            if path.starts_with("http:") {
                command.arg("branch");
                log::info!("Fetching branch of {}", path);
            } else {
                command.args(["checkout", "--lightweight"]);
                log::info!("Checking out {}", path);
            }
            command.arg(&path).arg(&checkout);
            let status = command
                .status()
                .map_err(|e| seed_err(format!("Failed to run bzr: {}", e)))?;
            if !status.success() {
                return Err(seed_err(format!(
                    "Command failed with exit status {:?}:\n  'bzr ... {} {}'",
                    status.code(),
                    path,
                    checkout.display()
                )));
            }
        }
        fs::read_to_string(checkout.join(name))
            .map_err(|e| seed_err(format!("Could not read {} from checkout: {}", name, e)))
    }

    fn open_seed_git(cache: &SeedCache, base: &str, branch: &str, name: &str) -> Result<String> {
        let checkout = cache.checkout(branch)?;
        if !checkout.is_dir() {
            // A branch specifier "REPOSITORY.GITBRANCH" selects a branch of
            // the named repository; this keeps "include" lines and
            // command-line arguments backward-compatible.
            let (repository, git_branch) = match branch.rsplit_once('.') {
                Some((repository, git_branch)) => (repository, Some(git_branch)),
                None => (branch, None),
            };
            let path = join_slash(base, repository);
            let mut builder = git2::build::RepoBuilder::new();
            if let Some(git_branch) = git_branch {
                log::info!("Cloning branch {} of {}", git_branch, path);
                builder.branch(git_branch);
            } else {
                log::info!("Cloning {}", path);
            }
            builder
                .clone(&path, &checkout)
                .map_err(|e| seed_err(format!("Could not clone {}: {}", path, e)))?;
        }
        fs::read_to_string(checkout.join(name))
            .map_err(|e| seed_err(format!("Could not read {} from checkout: {}", name, e)))
    }

    fn open_seed_url(base: &str, branch: &str, name: &str) -> Result<String> {
        let path = join_slash(base, branch);
        let url = format!("{}{}", path, name);
        if !has_scheme(&url) {
            let fullpath = Path::new(&path).join(name);
            log::info!("Using {}", fullpath.display());
            return Ok(fs::read_to_string(fullpath)?);
        }
        if let Some(local) = url.strip_prefix("file://") {
            log::info!("Using {}", local);
            return Ok(fs::read_to_string(local)?);
        }
        log::info!("Downloading {}", url);
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(&url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::PRAGMA, "no-cache")
            .send()?
            .error_for_status()?;
        Ok(response.text()?)
    }

    fn open_seed(
        cache: &SeedCache,
        base: &str,
        branch: &str,
        name: &str,
        vcs: Option<SeedVcs>,
    ) -> Result<String> {
        match vcs {
            None => Self::open_seed_url(base, branch, name),
            Some(SeedVcs::Git) => Self::open_seed_git(cache, base, branch, name),
            Some(SeedVcs::Bzr) => Self::open_seed_bzr(cache, base, branch, name),
            Some(SeedVcs::Auto) => {
                // Slightly dodgy auto-sensing, but if we can't tell then
                // we'll try both.
                if base.starts_with("git") {
                    Self::open_seed_git(cache, base, branch, name)
                } else if base.starts_with("bzr") {
                    Self::open_seed_bzr(cache, base, branch, name)
                } else {
                    Self::open_seed_git(cache, base, branch, name)
                        .or_else(|_| Self::open_seed_bzr(cache, base, branch, name))
                }
            }
        }
    }

    /// Read a seed from a collection, trying each base and branch in turn.
    pub fn open(
        cache: &SeedCache,
        bases: &[String],
        branches: &[String],
        name: &str,
        vcs: Option<SeedVcs>,
    ) -> Result<Seed> {
        let ssh_re = Regex::new(r"(?:bzr|git)\+ssh://(?:[^/]*?@)?(.*?)(?:/|$)").unwrap();
        let mut ssh_host = None;
        for base in bases {
            for branch in branches {
                match Self::open_seed(cache, base, branch, name, vcs) {
                    Ok(text) => {
                        return Ok(Seed {
                            name: name.to_string(),
                            base: Some(base.clone()),
                            branch: Some(branch.clone()),
                            text,
                        })
                    }
                    Err(_) => {
                        if let Some(m) = ssh_re.captures(base) {
                            ssh_host = Some(m.get(1).unwrap().as_str().to_string());
                        }
                    }
                }
            }
        }

        if vcs.is_some() {
            log::warn!("Could not open {} from checkout of (any of):", name);
            for base in bases {
                for branch in branches {
                    log::warn!("  {}", join_slash(base, branch));
                }
            }
            if let Some(host) = ssh_host {
                log::error!("Do you need to set your user name on {}?", host);
                log::error!("Try a section such as this in ~/.ssh/config:");
                log::error!("");
                log::error!("Host {}", host);
                log::error!("        User YOUR_USER_NAME");
            }
        } else {
            log::warn!("Could not open (any of):");
            for base in bases {
                for branch in branches {
                    log::warn!("  {}{}", join_slash(base, branch), name);
                }
            }
        }
        Err(seed_err(format!("Could not open {}", name)))
    }

    /// A seed created from custom input data.
    pub fn custom(name: &str, entries: &[String]) -> Seed {
        let mut text = entries.join("\n");
        text.push('\n');
        Seed {
            name: name.to_string(),
            base: None,
            branch: None,
            text,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The base URL where this seed was found; custom seeds have none.
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn lines(&self) -> std::str::Lines<'_> {
        self.text.lines()
    }
}

/// A single seed collection structure file.
///
/// The input is an ordered sequence of `SEED:[ INHERITED]` lines, where
/// INHERITED is a space-separated list of seeds SEED inherits from, plus
/// `include BRANCH...` and `feature FLAG...` directives.  This is internal;
/// applications use [`SeedStructure`].
#[derive(Debug, Default)]
pub struct SingleSeedStructure {
    pub seed_order: Vec<String>,
    pub inherit: Vec<(String, Vec<String>)>,
    pub branches: Vec<String>,
    pub lines: Vec<String>,
    pub features: BTreeSet<String>,
}

impl SingleSeedStructure {
    pub fn parse(branch: &str, text: &str) -> Result<SingleSeedStructure> {
        let mut structure = SingleSeedStructure {
            branches: vec![branch.to_string()],
            ..SingleSeedStructure::default()
        };
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let words: Vec<&str> = line.split_whitespace().collect();
            if let Some(seed) = words[0].strip_suffix(':') {
                if seed.contains('/') {
                    return Err(seed_err(format!(
                        "seed name '{}' may not contain '/'",
                        seed
                    )));
                }
                structure.seed_order.push(seed.to_string());
                structure
                    .inherit
                    .push((seed.to_string(), words[1..].iter().map(|w| w.to_string()).collect()));
                structure.lines.push(line.to_string());
            } else if words[0] == "include" {
                structure
                    .branches
                    .extend(words[1..].iter().map(|w| w.to_string()));
            } else if words[0] == "feature" {
                structure
                    .features
                    .extend(words[1..].iter().map(|w| w.to_string()));
            } else {
                log::error!("Unparseable seed structure entry: {}", line);
            }
        }
        Ok(structure)
    }
}

fn upsert(map: &mut Vec<(String, Vec<String>)>, key: &str, value: Vec<String>) {
    match map.iter_mut().find(|(k, _)| k == key) {
        Some((_, v)) => *v = value,
        None => map.push((key.to_string(), value)),
    }
}

/// The full structure of a seed collection: the seed structure files of a
/// branch and, recursively, of every branch it includes.
pub struct SeedStructure {
    branch: String,
    features: BTreeSet<String>,
    seed_order: Vec<String>,
    inherit: HashMap<String, Vec<String>>,
    original_inherit: Vec<(String, Vec<String>)>,
    names: Vec<String>,
    lines: Vec<String>,
    seeds: HashMap<String, Seed>,
}

impl SeedStructure {
    /// Open a seed collection and read all the seeds it contains.
    pub fn new(
        cache: &SeedCache,
        branch: &str,
        seed_bases: &[String],
        vcs: Option<SeedVcs>,
    ) -> Result<SeedStructure> {
        let mut features = BTreeSet::new();
        let mut got_branches = HashSet::new();
        let (seed_order, inherit, branches, lines) = Self::parse(
            cache,
            branch,
            seed_bases,
            vcs,
            &mut got_branches,
            &mut features,
        )?;

        let mut seeds = HashMap::new();
        for seed in &seed_order {
            if !seeds.contains_key(seed) {
                seeds.insert(
                    seed.clone(),
                    Seed::open(cache, seed_bases, &branches, seed, vcs)?,
                );
            }
        }

        let mut structure = SeedStructure {
            branch: branch.to_string(),
            features,
            seed_order,
            inherit: HashMap::new(),
            original_inherit: inherit,
            names: Vec::new(),
            lines,
            seeds,
        };
        structure.expand_inheritance();
        Ok(structure)
    }

    #[allow(clippy::type_complexity)]
    fn parse(
        cache: &SeedCache,
        branch: &str,
        seed_bases: &[String],
        vcs: Option<SeedVcs>,
        got_branches: &mut HashSet<String>,
        features: &mut BTreeSet<String>,
    ) -> Result<(
        Vec<String>,
        Vec<(String, Vec<String>)>,
        Vec<String>,
        Vec<String>,
    )> {
        let mut all_seed_order = Vec::new();
        let mut all_inherit: Vec<(String, Vec<String>)> = Vec::new();
        let mut all_branches: Vec<String> = Vec::new();
        let mut all_structure: Vec<String> = Vec::new();

        // Fetch this one.
        let branches = [branch.to_string()];
        let seed = Seed::open(cache, seed_bases, &branches, "STRUCTURE", vcs)?;
        let structure = SingleSeedStructure::parse(branch, seed.text())?;
        got_branches.insert(branch.to_string());

        // Recursively expand included branches.
        for child_branch in &structure.branches {
            if got_branches.contains(child_branch) {
                continue;
            }
            let (child_seed_order, child_inherit, child_branches, child_structure) = Self::parse(
                cache,
                child_branch,
                seed_bases,
                vcs,
                got_branches,
                features,
            )?;
            all_seed_order.extend(child_seed_order);
            for (name, parents) in child_inherit {
                upsert(&mut all_inherit, &name, parents);
            }
            for grandchild_branch in child_branches {
                if !all_branches.contains(&grandchild_branch) {
                    all_branches.push(grandchild_branch);
                }
            }
            for child_line in child_structure {
                let child_name = child_line.split_whitespace().next().unwrap_or("");
                all_structure
                    .retain(|l| l.split_whitespace().next().unwrap_or("") != child_name);
                all_structure.push(child_line);
            }
        }

        // Attach the main branch's data to the end.
        all_seed_order.extend(structure.seed_order);
        for (name, parents) in structure.inherit {
            upsert(&mut all_inherit, &name, parents);
        }
        for child_branch in structure.branches {
            if !all_branches.contains(&child_branch) {
                all_branches.push(child_branch);
            }
        }
        for line in structure.lines {
            let name = line.split_whitespace().next().unwrap_or("");
            all_structure.retain(|l| l.split_whitespace().next().unwrap_or("") != name);
            all_structure.push(line);
        }
        features.extend(structure.features);

        // We generally want to process branches in reverse order, so that
        // later branches can override seeds from earlier branches.
        all_branches.reverse();

        Ok((all_seed_order, all_inherit, all_branches, all_structure))
    }

    /// Expand out incomplete inheritance lists.
    fn expand_inheritance(&mut self) {
        let (names, cycles) = topo_sort(&self.original_inherit);
        for (name, parent) in &cycles {
            log::warn!(
                "Seed inheritance cycle between {} and {}; linearizing in structure order",
                name,
                parent
            );
        }
        self.names = names;

        let declared: HashMap<&str, &Vec<String>> = self
            .original_inherit
            .iter()
            .map(|(n, ps)| (n.as_str(), ps))
            .collect();
        for name in &self.names {
            let mut seen = HashSet::new();
            let mut new_inherit = Vec::new();
            for inheritee in declared.get(name.as_str()).copied().into_iter().flatten() {
                for expanded in self.inherit.get(inheritee).into_iter().flatten() {
                    if seen.insert(expanded.clone()) {
                        new_inherit.push(expanded.clone());
                    }
                }
                if seen.insert(inheritee.clone()) {
                    new_inherit.push(inheritee.clone());
                }
            }
            self.inherit.insert(name.clone(), new_inherit);
        }
    }

    /// Restrict the seeds we care about to this list.
    pub fn limit(&mut self, seeds: &[String]) -> Result<()> {
        let mut names = Vec::new();
        for name in seeds {
            let inherit = self
                .inherit
                .get(name)
                .ok_or_else(|| seed_err(format!("unknown seed '{}'", name)))?;
            for inheritee in inherit {
                if !names.contains(inheritee) {
                    names.push(inheritee.clone());
                }
            }
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        self.names = names;
        Ok(())
    }

    /// Add a custom seed, inheriting from `parent` if given.
    pub fn add(&mut self, name: &str, entries: &[String], parent: Option<&str>) {
        self.names.push(name.to_string());
        let inherit = match parent {
            Some(parent) => {
                let mut inherit = self.inherit.get(parent).cloned().unwrap_or_default();
                inherit.push(parent.to_string());
                inherit
            }
            None => Vec::new(),
        };
        self.inherit.insert(name.to_string(), inherit);
        self.seeds.insert(name.to_string(), Seed::custom(name, entries));
    }

    /// This seed and the seeds from which it inherits, innermost first.
    pub fn inner_seeds(&self, seedname: &str) -> Vec<String> {
        let mut inner = self.inherit.get(seedname).cloned().unwrap_or_default();
        inner.push(seedname.to_string());
        inner
    }

    /// The seeds that inherit from this seed.
    pub fn strictly_outer_seeds(&self, seedname: &str) -> Vec<String> {
        self.names
            .iter()
            .filter(|name| {
                self.inherit
                    .get(name.as_str())
                    .map_or(false, |inherit| inherit.iter().any(|i| i == seedname))
            })
            .cloned()
            .collect()
    }

    /// This seed and the seeds that inherit from it.
    pub fn outer_seeds(&self, seedname: &str) -> Vec<String> {
        let mut outer = vec![seedname.to_string()];
        outer.extend(self.strictly_outer_seeds(seedname));
        outer
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// The feature flags set for this seed collection.
    pub fn features(&self) -> &BTreeSet<String> {
        &self.features
    }

    pub fn has_feature(&self, flag: &str) -> bool {
        self.features.contains(flag)
    }

    /// The name of the "supported" seed (the last one in the structure).
    pub fn supported(&self) -> &str {
        self.seed_order
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// All the seed names in this collection, in structure order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, seedname: &str) -> bool {
        self.seeds.contains_key(seedname)
    }

    pub fn seed(&self, seedname: &str) -> Option<&Seed> {
        self.seeds.get(seedname)
    }

    /// Write the text of the seed STRUCTURE file.
    pub fn write<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        let mut f = AtomicFile::new(filename)?;
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        f.commit()
    }

    /// Write a dot file representing this structure.
    pub fn write_dot<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        let mut dotfile = AtomicFile::new(filename)?;
        writeln!(dotfile, "digraph structure {{")?;
        writeln!(dotfile, "    node [color=lightblue2, style=filled];")?;
        for seed in &self.seed_order {
            if let Some((_, parents)) = self.original_inherit.iter().find(|(n, _)| n == seed) {
                for inherit in parents {
                    writeln!(dotfile, "    \"{}\" -> \"{}\";", inherit, seed)?;
                }
            }
        }
        writeln!(dotfile, "}}")?;
        dotfile.commit()
    }

    /// Write the text of a seed in this collection.
    pub fn write_seed_text<P: AsRef<Path>>(&self, filename: P, seedname: &str) -> Result<()> {
        let seed = self
            .seeds
            .get(seedname)
            .ok_or_else(|| seed_err(format!("unknown seed '{}'", seedname)))?;
        let mut f = AtomicFile::new(filename)?;
        for line in seed.lines() {
            writeln!(f, "{}", line.trim_end())?;
        }
        f.commit()
    }
}

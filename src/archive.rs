//! Fetch package lists from a Debian-format archive as apt tag files.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::errors::{ArchiveError, Result};

/// Types of archive index files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Packages,
    Sources,
    InstallerPackages,
}

/// One RFC 822 style index section: an ordered list of fields with
/// case-insensitive lookup.  Unknown fields are preserved as-is.
#[derive(Clone, Debug, Default)]
pub struct Stanza {
    fields: Vec<(String, String)>,
}

impl Stanza {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn from_fields(fields: &[(&str, &str)]) -> Stanza {
        Stanza {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Streaming stanza parser.  Continuation lines (leading whitespace) are
/// folded into the previous field, newline-separated.
pub struct StanzaReader<R> {
    lines: io::Lines<R>,
}

impl<R: BufRead> StanzaReader<R> {
    pub fn new(reader: R) -> StanzaReader<R> {
        StanzaReader {
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> Iterator for StanzaReader<R> {
    type Item = Result<Stanza>;

    fn next(&mut self) -> Option<Result<Stanza>> {
        let mut stanza = Stanza::default();
        for line in &mut self.lines {
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                if stanza.is_empty() {
                    continue;
                }
                return Some(Ok(stanza));
            }
            if line.starts_with('#') {
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                match stanza.fields.last_mut() {
                    Some((_, value)) => {
                        value.push('\n');
                        value.push_str(line.trim());
                    }
                    None => log::debug!("Ignoring stray continuation line: {}", line),
                }
                continue;
            }
            match line.find(':') {
                Some(i) => {
                    stanza
                        .fields
                        .push((line[..i].to_string(), line[i + 1..].trim().to_string()));
                }
                None => log::debug!("Ignoring unparseable index line: {}", line),
            }
        }
        if stanza.is_empty() {
            None
        } else {
            Some(Ok(stanza))
        }
    }
}

/// Percent-encode a string for use as a cache file name component.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// A `file://` URL or a bare filesystem path; anything else is remote.
fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        Some(PathBuf::from(path))
    } else if !url.contains("://") {
        Some(PathBuf::from(url))
    } else {
        None
    }
}

fn fetch_into(url: &str, dest: &Path) -> Result<()> {
    match local_path(url) {
        Some(path) => {
            fs::copy(&path, dest)?;
            Ok(())
        }
        None => {
            let mut out = File::create(dest)?;
            let mut response = reqwest::blocking::get(url)?.error_for_status()?;
            response.copy_to(&mut out)?;
            Ok(())
        }
    }
}

fn decompress_into(suffix: &str, compressed: &Path, dest: &Path) -> Result<()> {
    let src = File::open(compressed)?;
    let mut out = File::create(dest)?;
    match suffix {
        ".gz" => {
            io::copy(&mut flate2::read::GzDecoder::new(src), &mut out)?;
        }
        ".bz2" => {
            io::copy(&mut bzip2::read::BzDecoder::new(src), &mut out)?;
        }
        ".xz" => {
            io::copy(&mut xz2::read::XzDecoder::new(src), &mut out)?;
        }
        _ => germinate_bail!("unknown compression suffix '{}'", suffix),
    }
    Ok(())
}

enum CacheDir {
    Persistent(PathBuf),
    Scoped(TempDir),
}

impl CacheDir {
    fn path(&self) -> &Path {
        match self {
            CacheDir::Persistent(p) => p,
            CacheDir::Scoped(t) => t.path(),
        }
    }
}

struct PlannedIndex {
    kind: IndexKind,
    tagfile_type: &'static str,
    mirrors: Vec<String>,
    dist: String,
    component: String,
    ftppath: String,
    optional: bool,
}

/// Fetch package lists from a Debian-format archive as apt tag files.
pub struct TagFile {
    dists: Vec<String>,
    components: Vec<String>,
    arch: String,
    mirrors: Vec<String>,
    source_mirrors: Vec<String>,
    installer_packages: bool,
    cleanup: bool,
}

impl TagFile {
    pub fn new(
        dists: &[String],
        components: &[String],
        arch: &str,
        mirrors: &[String],
        source_mirrors: Option<&[String]>,
        installer_packages: bool,
        cleanup: bool,
    ) -> TagFile {
        let source_mirrors = match source_mirrors {
            Some(m) if !m.is_empty() => m.to_vec(),
            _ => mirrors.to_vec(),
        };
        TagFile {
            dists: dists.to_vec(),
            components: components.to_vec(),
            arch: arch.to_string(),
            mirrors: mirrors.to_vec(),
            source_mirrors,
            installer_packages,
            cleanup,
        }
    }

    /// Download one index from one mirror, trying each compression suffix,
    /// and return the path of the decompressed tag file.
    fn open_tag_file(
        mirror: &str,
        dirname: &Path,
        tagfile_type: &str,
        dist: &str,
        component: &str,
        ftppath: &str,
    ) -> Result<PathBuf> {
        let mut mirror = mirror.to_string();
        if !mirror.ends_with('/') {
            mirror.push('/');
        }
        let url = format!("{}dists/{}/{}/{}", mirror, dist, component, ftppath);

        let filename = match local_path(&url) {
            // A more or less dummy filename for local URLs.
            Some(path) => path
                .parent()
                .unwrap_or(Path::new(""))
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "_"),
            None => format!(
                "{}_{}_{}_{}",
                quote(&mirror),
                quote(dist),
                component,
                tagfile_type
            ),
        };
        let fullname = dirname.join(&filename);
        if local_path(&url).is_some() {
            // Always refresh local archives.
            let _ = fs::remove_file(&fullname);
        }
        if fullname.exists() {
            return Ok(fullname);
        }

        let mut last_err = None;
        for suffix in [".xz", ".bz2", ".gz", ""] {
            let suffixed_url = format!("{}{}", url, suffix);
            germinate_progress!("Downloading {} file ...", suffixed_url);
            let result = if suffix.is_empty() {
                fetch_into(&suffixed_url, &fullname)
            } else {
                let compressed = dirname.join(format!("{}{}", filename, suffix));
                let fetched = fetch_into(&suffixed_url, &compressed).and_then(|_| {
                    germinate_progress!("Decompressing {} file ...", suffixed_url);
                    decompress_into(suffix, &compressed, &fullname)
                });
                let _ = fs::remove_file(&compressed);
                fetched
            };
            match result {
                Ok(()) => return Ok(fullname),
                Err(e) => {
                    let _ = fs::remove_file(&fullname);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ArchiveError::MissingIndex(tagfile_type.to_string()).into()
        }))
    }

    fn open_tag_files(planned: &PlannedIndex, dirname: &Path) -> Result<Vec<PathBuf>> {
        let mut tag_files = Vec::new();
        for mirror in &planned.mirrors {
            match Self::open_tag_file(
                mirror,
                dirname,
                planned.tagfile_type,
                &planned.dist,
                &planned.component,
                &planned.ftppath,
            ) {
                Ok(path) => tag_files.push(path),
                Err(e) => log::debug!(
                    "No {} file on {}: {}",
                    planned.tagfile_type,
                    mirror,
                    e
                ),
            }
        }
        if tag_files.is_empty() {
            return Err(ArchiveError::MissingIndex(planned.tagfile_type.to_string()).into());
        }
        Ok(tag_files)
    }

    /// Yield the index sections found in this archive, lazily, as
    /// `(IndexKind, Stanza)` pairs.  For each dist and component the order
    /// is Packages, Sources, InstallerPackages.
    pub fn sections(&self) -> Result<Sections> {
        let cache = if self.cleanup {
            CacheDir::Scoped(
                tempfile::Builder::new()
                    .prefix("germinate-")
                    .tempdir()?,
            )
        } else {
            CacheDir::Persistent(PathBuf::from("."))
        };

        let mut plan = VecDeque::new();
        for dist in &self.dists {
            for component in &self.components {
                plan.push_back(PlannedIndex {
                    kind: IndexKind::Packages,
                    tagfile_type: "Packages",
                    mirrors: self.mirrors.clone(),
                    dist: dist.clone(),
                    component: component.clone(),
                    ftppath: format!("binary-{}/Packages", self.arch),
                    optional: false,
                });
                plan.push_back(PlannedIndex {
                    kind: IndexKind::Sources,
                    tagfile_type: "Sources",
                    mirrors: self.source_mirrors.clone(),
                    dist: dist.clone(),
                    component: component.clone(),
                    ftppath: "source/Sources".to_string(),
                    optional: false,
                });
                if self.installer_packages {
                    plan.push_back(PlannedIndex {
                        kind: IndexKind::InstallerPackages,
                        tagfile_type: "InstallerPackages",
                        mirrors: self.mirrors.clone(),
                        dist: dist.clone(),
                        component: component.clone(),
                        ftppath: format!("debian-installer/binary-{}/Packages", self.arch),
                        optional: true,
                    });
                }
            }
        }

        Ok(Sections {
            plan,
            current: VecDeque::new(),
            cache,
        })
    }
}

/// Lazy stream over all index sections of a [`TagFile`].
pub struct Sections {
    plan: VecDeque<PlannedIndex>,
    current: VecDeque<(IndexKind, StanzaReader<BufReader<File>>)>,
    cache: CacheDir,
}

impl Iterator for Sections {
    type Item = Result<(IndexKind, Stanza)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((kind, reader)) = self.current.front_mut() {
                let kind = *kind;
                match reader.next() {
                    Some(Ok(stanza)) => return Some(Ok((kind, stanza))),
                    Some(Err(e)) => {
                        self.current.clear();
                        return Some(Err(e));
                    }
                    None => {
                        self.current.pop_front();
                        continue;
                    }
                }
            }
            let planned = self.plan.pop_front()?;
            match TagFile::open_tag_files(&planned, self.cache.path()) {
                Ok(paths) => {
                    for path in paths {
                        match File::open(&path) {
                            Ok(file) => self
                                .current
                                .push_back((planned.kind, StanzaReader::new(BufReader::new(file)))),
                            Err(e) => return Some(Err(e.into())),
                        }
                    }
                }
                Err(e) => {
                    if planned.optional {
                        // We can live without installer packages.
                        germinate_progress!(
                            "Missing installer Packages file for {} (ignoring)",
                            planned.component
                        );
                        continue;
                    }
                    return Some(Err(e));
                }
            }
        }
    }
}

//! In-memory index of binary, installer and source packages, plus the
//! Debian relationship machinery the resolver drives.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::archive::{IndexKind, Stanza};

/// Comparison operator in a versioned relationship.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl VerOp {
    fn parse(s: &str) -> Option<VerOp> {
        // "<" and ">" are the deprecated spellings of "<=" and ">=".
        match s {
            "<<" => Some(VerOp::Lt),
            "<=" | "<" => Some(VerOp::Le),
            "=" => Some(VerOp::Eq),
            ">=" | ">" => Some(VerOp::Ge),
            ">>" => Some(VerOp::Gt),
            _ => None,
        }
    }

    pub fn allows(&self, candidate: &str, bound: &str) -> bool {
        let ord = compare_versions(candidate, bound);
        match self {
            VerOp::Lt => ord == Ordering::Less,
            VerOp::Le => ord != Ordering::Greater,
            VerOp::Eq => ord == Ordering::Equal,
            VerOp::Ge => ord != Ordering::Less,
            VerOp::Gt => ord == Ordering::Greater,
        }
    }
}

impl fmt::Display for VerOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            VerOp::Lt => "<<",
            VerOp::Le => "<=",
            VerOp::Eq => "=",
            VerOp::Ge => ">=",
            VerOp::Gt => ">>",
        };
        write!(f, "{}", s)
    }
}

fn order(c: u8) -> i32 {
    match c {
        b'~' => -1,
        b'0'..=b'9' => 0,
        b'A'..=b'Z' | b'a'..=b'z' => c as i32,
        _ => c as i32 + 256,
    }
}

fn verrevcmp(a: &[u8], b: &[u8]) -> Ordering {
    let mut ai = 0;
    let mut bi = 0;
    while ai < a.len() || bi < b.len() {
        let mut first_diff = Ordering::Equal;
        while (ai < a.len() && !a[ai].is_ascii_digit())
            || (bi < b.len() && !b[bi].is_ascii_digit())
        {
            let ac = if ai < a.len() { order(a[ai]) } else { 0 };
            let bc = if bi < b.len() { order(b[bi]) } else { 0 };
            if ac != bc {
                return ac.cmp(&bc);
            }
            ai += 1;
            bi += 1;
        }
        while ai < a.len() && a[ai] == b'0' {
            ai += 1;
        }
        while bi < b.len() && b[bi] == b'0' {
            bi += 1;
        }
        while ai < a.len() && bi < b.len() && a[ai].is_ascii_digit() && b[bi].is_ascii_digit() {
            if first_diff == Ordering::Equal {
                first_diff = a[ai].cmp(&b[bi]);
            }
            ai += 1;
            bi += 1;
        }
        if ai < a.len() && a[ai].is_ascii_digit() {
            return Ordering::Greater;
        }
        if bi < b.len() && b[bi].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }
    Ordering::Equal
}

fn split_version(v: &str) -> (u64, &str, &str) {
    let (epoch, rest) = match v.find(':') {
        Some(i) if v[..i].bytes().all(|c| c.is_ascii_digit()) => {
            (v[..i].parse().unwrap_or(0), &v[i + 1..])
        }
        _ => (0, v),
    };
    match rest.rfind('-') {
        Some(i) => (epoch, &rest[..i], &rest[i + 1..]),
        None => (epoch, rest, ""),
    }
}

/// Compare two Debian version strings with the dpkg algorithm.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (ae, au, ar) = split_version(a.trim());
    let (be, bu, br) = split_version(b.trim());
    ae.cmp(&be)
        .then_with(|| verrevcmp(au.as_bytes(), bu.as_bytes()))
        .then_with(|| verrevcmp(ar.as_bytes(), br.as_bytes()))
}

/// Relation kinds tracked by the resolver, in processing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelationKind {
    Depends,
    PreDepends,
    Recommends,
    BuildDepends,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RelationKind::Depends => "Depends",
            RelationKind::PreDepends => "Pre-Depends",
            RelationKind::Recommends => "Recommends",
            RelationKind::BuildDepends => "Build-Depends",
        };
        write!(f, "{}", s)
    }
}

/// One alternative in a relationship expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelAtom {
    pub name: String,
    pub constraint: Option<(VerOp, String)>,
    /// `(negated, arch)` qualifiers from a trailing `[...]` list.
    pub arches: Vec<(bool, String)>,
}

impl RelAtom {
    pub fn applies_to(&self, arch: &str) -> bool {
        if self.arches.is_empty() {
            return true;
        }
        let mut positive = false;
        let mut matched = false;
        for (negated, qualifier) in &self.arches {
            if *negated {
                if qualifier == arch {
                    return false;
                }
            } else {
                positive = true;
                if qualifier == arch {
                    matched = true;
                }
            }
        }
        !positive || matched
    }

    pub fn allows_version(&self, version: &str) -> bool {
        match &self.constraint {
            Some((op, bound)) => op.allows(version, bound),
            None => true,
        }
    }
}

impl fmt::Display for RelAtom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some((op, bound)) = &self.constraint {
            write!(f, " ({} {})", op, bound)?;
        }
        Ok(())
    }
}

/// A disjunction of alternatives, left to right.
pub type RelExpr = Vec<RelAtom>;

pub fn show_expr(expr: &[RelAtom]) -> String {
    expr.iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(" | ")
}

fn parse_atom(s: &str) -> Option<RelAtom> {
    let mut rest = s.trim();
    if rest.is_empty() {
        return None;
    }
    let name_end = rest
        .find(|c: char| c.is_whitespace() || c == '(' || c == '[' || c == '<')
        .unwrap_or(rest.len());
    let mut name = &rest[..name_end];
    // Strip a multiarch qualifier such as ":any".
    if let Some(i) = name.find(':') {
        name = &name[..i];
    }
    rest = rest[name_end..].trim_start();

    let mut constraint = None;
    if let Some(stripped) = rest.strip_prefix('(') {
        let close = stripped.find(')')?;
        let inner = stripped[..close].trim();
        let op_end = inner
            .find(|c: char| c != '<' && c != '>' && c != '=')
            .unwrap_or(inner.len());
        let op = VerOp::parse(&inner[..op_end])?;
        constraint = Some((op, inner[op_end..].trim().to_string()));
        rest = stripped[close + 1..].trim_start();
    }

    let mut arches = Vec::new();
    if let Some(stripped) = rest.strip_prefix('[') {
        let close = stripped.find(']')?;
        for word in stripped[..close].split_whitespace() {
            match word.strip_prefix('!') {
                Some(a) => arches.push((true, a.to_string())),
                None => arches.push((false, word.to_string())),
            }
        }
    }
    // Anything further (build profiles in <...>) is ignored.

    Some(RelAtom {
        name: name.to_string(),
        constraint,
        arches,
    })
}

/// Parse a relationship field into a list of disjunctions.
pub fn parse_relations(field: &str) -> Vec<RelExpr> {
    let mut exprs = Vec::new();
    for clause in field.split(',') {
        let expr: RelExpr = clause.split('|').filter_map(parse_atom).collect();
        if !expr.is_empty() {
            exprs.push(expr);
        }
    }
    exprs
}

/// A binary (or installer) package as found in a Packages index.
#[derive(Clone, Debug)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub architecture: String,
    pub source: String,
    pub source_version: String,
    pub maintainer: String,
    pub section: String,
    pub priority: String,
    pub essential: bool,
    pub task: Option<String>,
    pub kernel_version: Option<String>,
    pub size: u64,
    pub installed_size: u64,
    pub depends: Vec<RelExpr>,
    pub pre_depends: Vec<RelExpr>,
    pub recommends: Vec<RelExpr>,
    pub suggests: Vec<RelExpr>,
    pub conflicts: Vec<RelExpr>,
    pub replaces: Vec<RelExpr>,
    pub provides: Vec<String>,
    pub installer: bool,
}

impl Package {
    pub fn from_stanza(stanza: &Stanza, installer: bool) -> Option<Package> {
        let name = stanza.get("Package")?.to_string();
        let version = stanza.get("Version")?.to_string();
        let (source, source_version) = match stanza.get("Source") {
            Some(field) => {
                let field = field.trim();
                match field.find('(') {
                    Some(i) => (
                        field[..i].trim().to_string(),
                        field[i + 1..].trim_end_matches(')').trim().to_string(),
                    ),
                    None => (field.to_string(), version.clone()),
                }
            }
            None => (name.clone(), version.clone()),
        };
        let relations = |key: &str| {
            stanza
                .get(key)
                .map(parse_relations)
                .unwrap_or_default()
        };
        let provides = stanza
            .get("Provides")
            .map(parse_relations)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .map(|a| a.name)
            .collect();
        Some(Package {
            source,
            source_version,
            architecture: stanza.get("Architecture").unwrap_or("").to_string(),
            maintainer: stanza.get("Maintainer").unwrap_or("").to_string(),
            section: stanza.get("Section").unwrap_or("").to_string(),
            priority: stanza.get("Priority").unwrap_or("").to_string(),
            essential: stanza
                .get("Essential")
                .map_or(false, |v| v.trim() == "yes"),
            task: stanza.get("Task").map(str::to_string),
            kernel_version: stanza.get("Kernel-Version").map(str::to_string),
            size: stanza
                .get("Size")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            installed_size: stanza
                .get("Installed-Size")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            depends: relations("Depends"),
            pre_depends: relations("Pre-Depends"),
            recommends: relations("Recommends"),
            suggests: relations("Suggests"),
            conflicts: relations("Conflicts"),
            replaces: relations("Replaces"),
            provides,
            installer,
            name,
            version,
        })
    }

    pub fn relations(&self, kind: RelationKind) -> &[RelExpr] {
        match kind {
            RelationKind::Depends => &self.depends,
            RelationKind::PreDepends => &self.pre_depends,
            RelationKind::Recommends => &self.recommends,
            RelationKind::BuildDepends => &[],
        }
    }
}

/// A source package as found in a Sources index.
#[derive(Clone, Debug)]
pub struct SourcePackage {
    pub name: String,
    pub version: String,
    pub maintainer: String,
    pub binaries: Vec<String>,
    pub build_depends: Vec<RelExpr>,
    pub build_depends_indep: Vec<RelExpr>,
}

impl SourcePackage {
    pub fn from_stanza(stanza: &Stanza) -> Option<SourcePackage> {
        let name = stanza.get("Package")?.to_string();
        let version = stanza.get("Version")?.to_string();
        let binaries = stanza
            .get("Binary")
            .map(|v| {
                v.split(',')
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Some(SourcePackage {
            maintainer: stanza.get("Maintainer").unwrap_or("").to_string(),
            build_depends: stanza
                .get("Build-Depends")
                .map(parse_relations)
                .unwrap_or_default(),
            build_depends_indep: stanza
                .get("Build-Depends-Indep")
                .map(parse_relations)
                .unwrap_or_default(),
            binaries,
            name,
            version,
        })
    }
}

/// How an atom resolves against the universe, before seed-aware policy.
pub enum AtomResolution<'a> {
    /// Arch qualifiers exclude the target architecture.
    Excluded,
    /// A concrete package whose indexed version passes the constraint.
    Concrete(&'a Package),
    /// A concrete package exists but its version fails the constraint.
    VersionMismatch(&'a Package),
    /// A virtual with exactly one provider.
    Provider(&'a Package),
    /// A virtual with several providers; no single package is selected.
    Ambiguous(&'a [String]),
    /// Nothing in the universe answers to this name.
    Unknown,
}

/// The parsed archive: package, installer and source namespaces plus the
/// provides maps.
pub struct PackageUniverse {
    arch: String,
    packages: HashMap<String, Package>,
    installer_packages: HashMap<String, Package>,
    sources: HashMap<String, SourcePackage>,
    provides: BTreeMap<String, Vec<String>>,
}

impl PackageUniverse {
    pub fn new(arch: &str) -> PackageUniverse {
        PackageUniverse {
            arch: arch.to_string(),
            packages: HashMap::new(),
            installer_packages: HashMap::new(),
            sources: HashMap::new(),
            provides: BTreeMap::new(),
        }
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Index one stanza from the archive stream.  Later stanzas override
    /// earlier ones, matching the configured dist/component order.
    pub fn add_section(&mut self, kind: IndexKind, stanza: &Stanza) {
        match kind {
            IndexKind::Packages | IndexKind::InstallerPackages => {
                let installer = kind == IndexKind::InstallerPackages;
                match Package::from_stanza(stanza, installer) {
                    Some(pkg) => {
                        let table = if installer {
                            &mut self.installer_packages
                        } else {
                            &mut self.packages
                        };
                        table.insert(pkg.name.clone(), pkg);
                    }
                    None => log::warn!("Ignoring package stanza without Package/Version"),
                }
            }
            IndexKind::Sources => match SourcePackage::from_stanza(stanza) {
                Some(src) => {
                    self.sources.insert(src.name.clone(), src);
                }
                None => log::warn!("Ignoring source stanza without Package/Version"),
            },
        }
    }

    /// Rebuild the virtual-name index.  Called once after ingest; iterates
    /// in sorted order so provider lists are deterministic.
    pub fn index_provides(&mut self) {
        self.provides.clear();
        let mut names: Vec<&String> = self.packages.keys().collect();
        names.sort();
        for name in names {
            let pkg = &self.packages[name.as_str()];
            for virt in &pkg.provides {
                let providers = self.provides.entry(virt.clone()).or_default();
                if !providers.contains(&pkg.name) {
                    providers.push(pkg.name.clone());
                }
            }
        }
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn installer_package(&self, name: &str) -> Option<&Package> {
        self.installer_packages.get(name)
    }

    /// Look a name up across namespaces.  Installer packages shadow binary
    /// ones only when the lookup originates from an installer package.
    pub fn lookup(&self, name: &str, prefer_installer: bool) -> Option<&Package> {
        if prefer_installer {
            self.installer_packages
                .get(name)
                .or_else(|| self.packages.get(name))
        } else {
            self.packages
                .get(name)
                .or_else(|| self.installer_packages.get(name))
        }
    }

    pub fn source(&self, name: &str) -> Option<&SourcePackage> {
        self.sources.get(name)
    }

    pub fn providers(&self, virt: &str) -> &[String] {
        self.provides.get(virt).map_or(&[], Vec::as_slice)
    }

    pub fn provides_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.provides
    }

    pub fn package_names(&self) -> impl Iterator<Item = &String> {
        self.packages.keys()
    }

    /// Resolve a single atom per the lookup rules: arch gating, then the
    /// concrete namespace, then Provides.
    pub fn resolve_atom<'a>(
        &'a self,
        atom: &RelAtom,
        prefer_installer: bool,
    ) -> AtomResolution<'a> {
        if !atom.applies_to(&self.arch) {
            return AtomResolution::Excluded;
        }
        if let Some(pkg) = self.lookup(&atom.name, prefer_installer) {
            return if atom.allows_version(&pkg.version) {
                AtomResolution::Concrete(pkg)
            } else {
                AtomResolution::VersionMismatch(pkg)
            };
        }
        // Provides are unversioned: a constrained atom cannot be satisfied
        // by a virtual.
        if atom.constraint.is_none() {
            let providers = self.providers(&atom.name);
            match providers.len() {
                0 => AtomResolution::Unknown,
                1 => match self.packages.get(&providers[0]) {
                    Some(pkg) => AtomResolution::Provider(pkg),
                    None => AtomResolution::Unknown,
                },
                _ => AtomResolution::Ambiguous(providers),
            }
        } else {
            AtomResolution::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        let less = [
            ("1.0", "1.1"),
            ("1.0", "1.0-1"),
            ("1.0-1", "1.0-2"),
            ("1.0~rc1", "1.0"),
            ("1.0~rc1-1", "1.0-1"),
            ("1:0.5", "2:0.1"),
            ("1.9", "1.10"),
            ("2.4a", "2.4.dfsg"),
            ("1.0-1", "1:0.1"),
        ];
        for (a, b) in less {
            assert_eq!(compare_versions(a, b), Ordering::Less, "{} < {}", a, b);
            assert_eq!(compare_versions(b, a), Ordering::Greater, "{} > {}", b, a);
        }
        assert_eq!(compare_versions("1.0", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("0:1.0", "1.0"), Ordering::Equal);
    }

    #[test]
    fn op_allows() {
        assert!(VerOp::Ge.allows("1.2", "1.0"));
        assert!(!VerOp::Lt.allows("1.2", "1.0"));
        assert!(VerOp::Eq.allows("1.0-1", "1.0-1"));
        // Deprecated single-character spellings are inclusive.
        assert_eq!(VerOp::parse("<"), Some(VerOp::Le));
        assert_eq!(VerOp::parse(">"), Some(VerOp::Ge));
    }

    #[test]
    fn relation_parsing() {
        let exprs = parse_relations("libc6 (>= 2.17), perl:any | perl-base, gcc [amd64 !i386]");
        assert_eq!(exprs.len(), 3);
        assert_eq!(exprs[0][0].name, "libc6");
        assert_eq!(
            exprs[0][0].constraint,
            Some((VerOp::Ge, "2.17".to_string()))
        );
        assert_eq!(exprs[1].len(), 2);
        assert_eq!(exprs[1][0].name, "perl");
        assert_eq!(exprs[1][1].name, "perl-base");
        assert_eq!(
            exprs[2][0].arches,
            vec![(false, "amd64".to_string()), (true, "i386".to_string())]
        );
    }

    #[test]
    fn arch_qualifiers() {
        let expr = &parse_relations("foo [!i386]")[0];
        assert!(expr[0].applies_to("amd64"));
        assert!(!expr[0].applies_to("i386"));
        let expr = &parse_relations("foo [amd64 arm64]")[0];
        assert!(expr[0].applies_to("arm64"));
        assert!(!expr[0].applies_to("i386"));
    }

    #[test]
    fn package_from_stanza() {
        let stanza = Stanza::from_fields(&[
            ("Package", "hello"),
            ("Version", "2.10-3"),
            ("Architecture", "amd64"),
            ("Source", "hello-src (2.10-2)"),
            ("Essential", "yes"),
            ("Size", "28123"),
            ("Installed-Size", "280"),
            ("Depends", "libc6 (>= 2.17)"),
            ("Provides", "hello-world"),
        ]);
        let pkg = Package::from_stanza(&stanza, false).unwrap();
        assert_eq!(pkg.name, "hello");
        assert_eq!(pkg.source, "hello-src");
        assert_eq!(pkg.source_version, "2.10-2");
        assert!(pkg.essential);
        assert_eq!(pkg.size, 28123);
        assert_eq!(pkg.installed_size, 280);
        assert_eq!(pkg.depends.len(), 1);
        assert_eq!(pkg.provides, vec!["hello-world"]);
    }

    #[test]
    fn source_defaults_to_self() {
        let stanza = Stanza::from_fields(&[("Package", "hello"), ("Version", "1.0-1")]);
        let pkg = Package::from_stanza(&stanza, false).unwrap();
        assert_eq!(pkg.source, "hello");
        assert_eq!(pkg.source_version, "1.0-1");
    }
}

//! Grow dependency closures from seeds, with per-seed attribution.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::archive::TagFile;
use crate::errors::Result;
use crate::seeds::{Seed, SeedStructure};
use crate::universe::{
    show_expr, AtomResolution, PackageUniverse, RelAtom, RelationKind,
};

pub mod output;

/// The pseudo-seed that collects archive leftovers after growth.
pub const EXTRA_SEED: &str = "extra";

/// Why a package ended up in a seed's closure.  The first seed to claim a
/// package owns it; the reason is only rewritten when ownership moves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reason {
    /// Listed in the seed itself.
    Seeded,
    /// Pulled in to satisfy Depends/Pre-Depends of a package.
    DependsOn(String),
    /// Pulled in to satisfy Recommends of a package.
    RecommendedBy(String),
    /// Pulled in to satisfy Build-Depends of a source package.
    BuildDependsOf(String),
    /// Built by a source package that is already in the closure.
    Generated(String),
    /// Marked Essential in the archive.
    Essential,
}

impl Reason {
    fn describe(&self, seedname: &str) -> String {
        match self {
            Reason::Seeded => format!("{} seed", seedname),
            Reason::DependsOn(pkg) => pkg.clone(),
            Reason::RecommendedBy(pkg) => format!("{} (Recommends)", pkg),
            Reason::BuildDependsOf(src) => format!("{} (Build-Depend)", src),
            Reason::Generated(src) => format!("GENERATED ({})", src),
            Reason::Essential => "Essential".to_string(),
        }
    }
}

/// Which attributed set of its owning seed a package lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Category {
    Entry,
    Recommend,
    Depend,
    BuildDepend,
}

#[derive(Default)]
struct GerminatedSeed {
    /// Explicit entries, in seed order.
    entries: Vec<String>,
    /// `%` entries, deferred until after growth.
    snap_entries: Vec<String>,
    /// `?` entries, deferred until after growth.
    soft_entries: Vec<String>,
    recommends: BTreeSet<String>,
    depends: BTreeSet<String>,
    build_depends: BTreeSet<String>,
    sources: BTreeSet<String>,
    build_sources: BTreeSet<String>,
    blacklisted: BTreeSet<String>,
    /// Packages this seed listed or needed that an inner seed owns.
    inherited: Vec<String>,
    features: BTreeSet<String>,
    /// `=`/`==` annotations per entry; carried but never interpreted.
    tags: BTreeMap<String, Vec<String>>,
}

impl GerminatedSeed {
    fn insert(&mut self, pkg: &str, category: Category) {
        match category {
            Category::Entry => {
                if !self.entries.iter().any(|e| e == pkg) {
                    self.entries.push(pkg.to_string());
                }
            }
            Category::Recommend => {
                self.recommends.insert(pkg.to_string());
            }
            Category::Depend => {
                self.depends.insert(pkg.to_string());
            }
            Category::BuildDepend => {
                self.build_depends.insert(pkg.to_string());
            }
        }
    }

    fn remove(&mut self, pkg: &str, category: Category) {
        match category {
            Category::Entry => self.entries.retain(|e| e != pkg),
            Category::Recommend => {
                self.recommends.remove(pkg);
            }
            Category::Depend => {
                self.depends.remove(pkg);
            }
            Category::BuildDepend => {
                self.build_depends.remove(pkg);
            }
        }
    }

    fn note_inherited(&mut self, pkg: &str) {
        if !self.inherited.iter().any(|e| e == pkg) {
            self.inherited.push(pkg.to_string());
        }
    }
}

enum Claim {
    /// Newly owned by the claiming seed; needs growing.
    Fresh,
    /// Already visible to the claiming seed.
    Satisfied,
    /// Globally excluded; treat the package as unavailable.
    Blacklisted,
}

/// A parsed seed entry line.
struct SeedLine {
    marker: char,
    name: String,
    arches: Vec<(bool, String)>,
    tags: Vec<String>,
}

fn parse_seed_line(line: &str) -> Option<SeedLine> {
    let (content, annotation) = match line.split_once('#') {
        Some((content, annotation)) => (content, annotation.trim()),
        None => (line, ""),
    };
    let content = content.trim();
    let mut words = content.split_whitespace();
    let first = words.next()?;
    let (marker, name) = match first {
        "*" | "%" | "?" => (first.chars().next().unwrap(), words.next()?.to_string()),
        _ => {
            let mut chars = first.chars();
            let marker = chars.next()?;
            if !matches!(marker, '*' | '%' | '?') {
                return None;
            }
            let rest: String = chars.collect();
            if rest.is_empty() {
                return None;
            }
            (marker, rest)
        }
    };

    let mut arches = Vec::new();
    let remainder: Vec<&str> = words.collect();
    let remainder = remainder.join(" ");
    if let Some(open) = remainder.find('[') {
        if let Some(close) = remainder[open..].find(']') {
            for word in remainder[open + 1..open + close].split_whitespace() {
                match word.strip_prefix('!') {
                    Some(a) => arches.push((true, a.to_string())),
                    None => arches.push((false, word.to_string())),
                }
            }
        }
    }

    let tags = annotation
        .split_whitespace()
        .filter(|w| w.contains('='))
        .map(|w| w.to_string())
        .collect();

    Some(SeedLine {
        marker,
        name,
        arches,
        tags,
    })
}

fn arch_applies(arches: &[(bool, String)], arch: &str) -> bool {
    if arches.is_empty() {
        return true;
    }
    let mut positive = false;
    let mut matched = false;
    for (negated, qualifier) in arches {
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

/// Expands seeds into full dependency closures against a parsed archive.
///
/// The expected call sequence mirrors the command-line tool:
/// `parse_archive`, `plant_seeds`, optionally `parse_blacklist`, `grow`,
/// `add_extras`, `reverse_depends`, then the output writers.
pub struct Germinator {
    arch: String,
    universe: PackageUniverse,
    seeds: HashMap<String, GerminatedSeed>,
    seed_order: Vec<String>,
    why: HashMap<String, (String, Reason)>,
    category: HashMap<String, Category>,
    dep_satisfiers: HashMap<String, BTreeSet<String>>,
    rdepends: BTreeMap<String, BTreeSet<(String, RelationKind)>>,
    blacklist: BTreeSet<String>,
    always_follow_build_depends: bool,
}

impl Germinator {
    pub fn new(arch: &str) -> Germinator {
        Germinator {
            arch: arch.to_string(),
            universe: PackageUniverse::new(arch),
            seeds: HashMap::new(),
            seed_order: Vec::new(),
            why: HashMap::new(),
            category: HashMap::new(),
            dep_satisfiers: HashMap::new(),
            rdepends: BTreeMap::new(),
            blacklist: BTreeSet::new(),
            always_follow_build_depends: false,
        }
    }

    pub fn set_always_follow_build_depends(&mut self, on: bool) {
        self.always_follow_build_depends = on;
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn universe(&self) -> &PackageUniverse {
        &self.universe
    }

    /// Ingest every index section of the archive into the universe.
    pub fn parse_archive(&mut self, archive: &TagFile) -> Result<()> {
        for section in archive.sections()? {
            let (kind, stanza) = section?;
            self.universe.add_section(kind, &stanza);
        }
        self.universe.index_provides();
        Ok(())
    }

    /// Record a blacklist: the named packages may never be attributed.
    /// Call between `plant_seeds` and `grow`; packages already planted are
    /// evicted again.
    pub fn parse_blacklist(&mut self, seed: &Seed) {
        for line in seed.lines() {
            let entry = match parse_seed_line(line) {
                Some(entry) => entry,
                None => continue,
            };
            if !arch_applies(&entry.arches, &self.arch) {
                continue;
            }
            self.blacklist.insert(entry.name.clone());
            if let Some((owner, _)) = self.why.remove(&entry.name) {
                log::warn!(
                    "Blacklisted package {} was seeded in {}; removing",
                    entry.name,
                    owner
                );
                let category = self.category.remove(&entry.name).unwrap_or(Category::Entry);
                if let Some(data) = self.seeds.get_mut(&owner) {
                    data.remove(&entry.name, category);
                    data.blacklisted.insert(entry.name.clone());
                }
            }
        }
    }

    fn inner_seeds_of(&self, structure: &SeedStructure, seedname: &str) -> Vec<String> {
        if seedname == EXTRA_SEED {
            // The extra seed inherits from everything.
            structure.names().to_vec()
        } else {
            structure.inner_seeds(seedname)
        }
    }

    /// The innermost seed visible from both arguments, or None when the
    /// two inheritance chains are disjoint.
    fn innermost_common(
        &self,
        structure: &SeedStructure,
        a: &str,
        b: &str,
    ) -> Option<String> {
        let inner_b: HashSet<String> = self.inner_seeds_of(structure, b).into_iter().collect();
        self.inner_seeds_of(structure, a)
            .into_iter()
            .rev()
            .find(|seed| inner_b.contains(seed))
    }

    /// Claim a package for a seed.  Ownership is single-valued: a package
    /// already owned by an inner seed is merely recorded as inherited, and
    /// one owned by an unrelated seed is promoted to the innermost common
    /// seed (when `allow_promote`) so that both closures see it.
    fn claim(
        &mut self,
        structure: &SeedStructure,
        seedname: &str,
        pkg: &str,
        reason: Reason,
        category: Category,
        allow_promote: bool,
    ) -> Claim {
        if self.blacklist.contains(pkg) {
            log::warn!("Not adding blacklisted package {} (wanted by {})", pkg, seedname);
            if let Some(data) = self.seeds.get_mut(seedname) {
                data.blacklisted.insert(pkg.to_string());
            }
            return Claim::Blacklisted;
        }
        match self.why.get(pkg).cloned() {
            None => {
                self.why
                    .insert(pkg.to_string(), (seedname.to_string(), reason));
                self.category.insert(pkg.to_string(), category);
                if let Some(data) = self.seeds.get_mut(seedname) {
                    data.insert(pkg, category);
                }
                Claim::Fresh
            }
            Some((owner, _)) if owner == seedname => Claim::Satisfied,
            Some((owner, _)) => {
                match self.innermost_common(structure, seedname, &owner) {
                    Some(common) if common == owner => {
                        // Owned by an inner seed already.
                        if let Some(data) = self.seeds.get_mut(seedname) {
                            data.note_inherited(pkg);
                        }
                        Claim::Satisfied
                    }
                    Some(common) if allow_promote => {
                        self.promote(structure, pkg, &common, reason);
                        if common != seedname {
                            if let Some(data) = self.seeds.get_mut(seedname) {
                                data.note_inherited(pkg);
                            }
                        }
                        Claim::Satisfied
                    }
                    Some(_) => {
                        // First owner wins for explicit listings.
                        log::warn!(
                            "Duplicated package {} (in {} and {})",
                            pkg,
                            owner,
                            seedname
                        );
                        Claim::Satisfied
                    }
                    None => {
                        log::info!(
                            "{} needs {} which is owned by unrelated seed {}; leaving it there",
                            seedname,
                            pkg,
                            owner
                        );
                        Claim::Satisfied
                    }
                }
            }
        }
    }

    /// Move a package (and, transitively, the satisfiers of its
    /// dependencies) into `target`'s attributed sets.
    fn promote(
        &mut self,
        structure: &SeedStructure,
        pkg: &str,
        target: &str,
        reason: Reason,
    ) {
        let mut work = vec![(pkg.to_string(), target.to_string(), reason)];
        while let Some((pkg, target, reason)) = work.pop() {
            let (owner, _) = match self.why.get(&pkg) {
                Some(entry) => entry.clone(),
                None => continue,
            };
            if owner == target {
                continue;
            }
            log::warn!("Moving {} from {} to {} seed", pkg, owner, target);
            let old_category = self.category.get(&pkg).copied().unwrap_or(Category::Depend);
            if let Some(data) = self.seeds.get_mut(&owner) {
                data.remove(&pkg, old_category);
                data.note_inherited(&pkg);
            }
            let new_category = match &reason {
                Reason::Seeded | Reason::Generated(_) | Reason::Essential => Category::Entry,
                Reason::RecommendedBy(_) => Category::Recommend,
                Reason::BuildDependsOf(_) => Category::BuildDepend,
                Reason::DependsOn(_) => match old_category {
                    Category::BuildDepend => Category::BuildDepend,
                    _ => Category::Depend,
                },
            };
            if let Some(data) = self.seeds.get_mut(&target) {
                data.insert(&pkg, new_category);
                if new_category != Category::BuildDepend {
                    if let Some(record) = self.universe.lookup(&pkg, false) {
                        if self.universe.source(&record.source).is_some() {
                            data.sources.insert(record.source.clone());
                        }
                    }
                }
            }
            self.why
                .insert(pkg.clone(), (target.clone(), reason));
            self.category.insert(pkg.clone(), new_category);

            // Keep the target's closure complete: anything this package
            // depends on must be visible from the target seed too.
            let mut scope: HashSet<String> =
                self.inner_seeds_of(structure, &target).into_iter().collect();
            scope.insert(target.clone());
            for satisfier in self
                .dep_satisfiers
                .get(&pkg)
                .cloned()
                .unwrap_or_default()
            {
                if let Some((sat_owner, _)) = self.why.get(&satisfier) {
                    if sat_owner != &target && !scope.contains(sat_owner) {
                        match self.innermost_common(structure, &target, sat_owner) {
                            Some(sat_target) => work.push((
                                satisfier.clone(),
                                sat_target,
                                Reason::DependsOn(pkg.clone()),
                            )),
                            None => log::info!(
                                "Cannot move {} (needed by {}) into scope of {}",
                                satisfier,
                                pkg,
                                target
                            ),
                        }
                    }
                }
            }
        }
    }

    /// Phase 1: parse every seed's text and claim its explicit entries.
    pub fn plant_seeds(&mut self, structure: &SeedStructure) -> Result<()> {
        for seedname in structure.names().to_vec() {
            if !self.seeds.contains_key(&seedname) {
                self.seeds.insert(seedname.clone(), GerminatedSeed::default());
                self.seed_order.push(seedname.clone());
            }
            let seed = match structure.seed(&seedname) {
                Some(seed) => seed.clone(),
                None => {
                    log::warn!("No seed text for {}; skipping", seedname);
                    continue;
                }
            };
            germinate_progress!("Planting {} seed ...", seedname);
            for line in seed.lines() {
                let trimmed = line.trim_start();
                if let Some(rest) = trimmed.strip_prefix("feature ") {
                    let data = self.seeds.get_mut(&seedname).unwrap();
                    data.features
                        .extend(rest.split_whitespace().map(|w| w.to_string()));
                    continue;
                }
                let entry = match parse_seed_line(line) {
                    Some(entry) => entry,
                    None => continue,
                };
                if !arch_applies(&entry.arches, &self.arch) {
                    continue;
                }
                if !entry.tags.is_empty() {
                    self.seeds
                        .get_mut(&seedname)
                        .unwrap()
                        .tags
                        .entry(entry.name.clone())
                        .or_default()
                        .extend(entry.tags.iter().cloned());
                }
                match entry.marker {
                    '*' => {
                        if self.universe.lookup(&entry.name, false).is_none() {
                            if !self.blacklist.contains(&entry.name) {
                                log::warn!(
                                    "Unknown package in {} seed: {}",
                                    seedname,
                                    entry.name
                                );
                                continue;
                            }
                        }
                        self.claim(
                            structure,
                            &seedname,
                            &entry.name,
                            Reason::Seeded,
                            Category::Entry,
                            false,
                        );
                    }
                    '%' => {
                        let data = self.seeds.get_mut(&seedname).unwrap();
                        if !data.snap_entries.iter().any(|e| e == &entry.name) {
                            data.snap_entries.push(entry.name.clone());
                        }
                    }
                    '?' => {
                        let data = self.seeds.get_mut(&seedname).unwrap();
                        if !data.soft_entries.iter().any(|e| e == &entry.name) {
                            data.soft_entries.push(entry.name.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn follow_recommends(&self, structure: &SeedStructure, seedname: &str) -> bool {
        if let Some(data) = self.seeds.get(seedname) {
            if data.features.contains("no-follow-recommends") {
                return false;
            }
            if data.features.contains("follow-recommends") {
                return true;
            }
        }
        structure.has_feature("follow-recommends")
    }

    fn follow_build_depends(&self, structure: &SeedStructure, seedname: &str) -> bool {
        if self.always_follow_build_depends {
            return true;
        }
        if structure.has_feature("build-depends") {
            return true;
        }
        self.seeds
            .get(seedname)
            .map_or(false, |data| data.features.contains("build-depends"))
    }

    fn record_satisfier(&mut self, depender: &str, kind: RelationKind, satisfier: &str) {
        self.rdepends
            .entry(satisfier.to_string())
            .or_default()
            .insert((depender.to_string(), kind));
        if matches!(kind, RelationKind::Depends | RelationKind::PreDepends) {
            self.dep_satisfiers
                .entry(depender.to_string())
                .or_default()
                .insert(satisfier.to_string());
        }
    }

    /// Is this atom satisfied by a package already visible to `scope`?
    fn satisfied_in_scope(
        &self,
        atom: &RelAtom,
        scope: &HashSet<String>,
        prefer_installer: bool,
    ) -> Option<String> {
        if let Some(pkg) = self.universe.lookup(&atom.name, prefer_installer) {
            if atom.allows_version(&pkg.version) {
                if let Some((owner, _)) = self.why.get(&pkg.name) {
                    if scope.contains(owner) {
                        return Some(pkg.name.clone());
                    }
                }
            }
        }
        if atom.constraint.is_none() {
            for provider in self.universe.providers(&atom.name) {
                if let Some((owner, _)) = self.why.get(provider) {
                    if scope.contains(owner) {
                        return Some(provider.clone());
                    }
                }
            }
        }
        None
    }

    /// Resolve one relationship expression for `depender` in `seedname`.
    #[allow(clippy::too_many_arguments)]
    fn resolve_expr(
        &mut self,
        structure: &SeedStructure,
        seedname: &str,
        scope: &HashSet<String>,
        depender: &str,
        kind: RelationKind,
        expr: &[RelAtom],
        category: Category,
        queue: &mut VecDeque<String>,
        enqueued: &mut HashSet<String>,
        prefer_installer: bool,
    ) {
        let atoms: Vec<&RelAtom> = expr
            .iter()
            .filter(|atom| atom.applies_to(&self.arch))
            .collect();
        if atoms.is_empty() {
            // Every alternative is gated out for this architecture.
            return;
        }

        for atom in &atoms {
            if let Some(satisfier) = self.satisfied_in_scope(atom, scope, prefer_installer) {
                self.record_satisfier(depender, kind, &satisfier);
                return;
            }
        }

        let mut ambiguous: Vec<&RelAtom> = Vec::new();
        let mut chosen: Option<String> = None;

        // Prefer concrete targets that some seed already pulled in.
        for atom in &atoms {
            if self.blacklist.contains(&atom.name) {
                continue;
            }
            if let AtomResolution::Concrete(pkg) =
                self.universe.resolve_atom(atom, prefer_installer)
            {
                if self.why.contains_key(&pkg.name) {
                    chosen = Some(pkg.name.clone());
                    break;
                }
            }
        }
        // Then any concrete target at all, leftmost first.
        if chosen.is_none() {
            for atom in &atoms {
                if self.blacklist.contains(&atom.name) {
                    log::warn!(
                        "{} {} wants blacklisted package {}; treating as unavailable",
                        depender,
                        kind,
                        atom.name
                    );
                    continue;
                }
                match self.universe.resolve_atom(atom, prefer_installer) {
                    AtomResolution::Concrete(pkg) => {
                        chosen = Some(pkg.name.clone());
                        break;
                    }
                    AtomResolution::Ambiguous(_) => ambiguous.push(atom),
                    _ => {}
                }
            }
        }
        // Virtuals: an already-claimed provider, then a sole provider.
        if chosen.is_none() {
            for atom in &ambiguous {
                if let Some(provider) = self
                    .universe
                    .providers(&atom.name)
                    .iter()
                    .find(|p| self.why.contains_key(*p))
                {
                    chosen = Some(provider.clone());
                    break;
                }
            }
        }
        if chosen.is_none() {
            for atom in &atoms {
                if self.blacklist.contains(&atom.name) {
                    continue;
                }
                if let AtomResolution::Provider(pkg) =
                    self.universe.resolve_atom(atom, prefer_installer)
                {
                    chosen = Some(pkg.name.clone());
                    break;
                }
            }
        }

        let satisfier = match chosen {
            Some(satisfier) => satisfier,
            None => {
                if !ambiguous.is_empty() {
                    for atom in ambiguous {
                        log::warn!(
                            "{} {} on virtual {} with multiple providers ({}); not choosing",
                            depender,
                            kind,
                            atom.name,
                            self.universe.providers(&atom.name).join(", ")
                        );
                    }
                } else {
                    log::warn!(
                        "Unable to satisfy {} of {} in {}: {}",
                        kind,
                        depender,
                        seedname,
                        show_expr(expr)
                    );
                }
                return;
            }
        };

        let reason = match kind {
            RelationKind::Recommends => Reason::RecommendedBy(depender.to_string()),
            RelationKind::BuildDepends => Reason::BuildDependsOf(depender.to_string()),
            _ => Reason::DependsOn(depender.to_string()),
        };
        match self.claim(structure, seedname, &satisfier, reason, category, true) {
            Claim::Fresh => {
                self.record_satisfier(depender, kind, &satisfier);
                if enqueued.insert(satisfier.clone()) {
                    queue.push_back(satisfier);
                }
            }
            Claim::Satisfied => self.record_satisfier(depender, kind, &satisfier),
            Claim::Blacklisted => {}
        }
    }

    fn grow_seed(&mut self, structure: &SeedStructure, seedname: &str) {
        let mut scope: HashSet<String> = self
            .inner_seeds_of(structure, seedname)
            .into_iter()
            .collect();
        scope.insert(seedname.to_string());

        let entries = self
            .seeds
            .get(seedname)
            .map(|data| data.entries.clone())
            .unwrap_or_default();
        let mut queue: VecDeque<String> = entries.iter().cloned().collect();
        let mut enqueued: HashSet<String> = entries.into_iter().collect();
        let follow_recommends = self.follow_recommends(structure, seedname);
        let follow_build = self.follow_build_depends(structure, seedname);

        while let Some(pkgname) = queue.pop_front() {
            let pkg = match self.universe.lookup(&pkgname, false) {
                Some(pkg) => pkg.clone(),
                None => continue,
            };
            let build_context = matches!(
                self.category.get(&pkgname),
                Some(Category::BuildDepend)
            );
            let dep_category = if build_context {
                Category::BuildDepend
            } else {
                Category::Depend
            };

            for kind in [RelationKind::Depends, RelationKind::PreDepends] {
                for expr in pkg.relations(kind) {
                    self.resolve_expr(
                        structure,
                        seedname,
                        &scope,
                        &pkgname,
                        kind,
                        expr,
                        dep_category,
                        &mut queue,
                        &mut enqueued,
                        pkg.installer,
                    );
                }
            }

            if follow_recommends && !build_context {
                for expr in &pkg.recommends {
                    self.resolve_expr(
                        structure,
                        seedname,
                        &scope,
                        &pkgname,
                        RelationKind::Recommends,
                        expr,
                        Category::Recommend,
                        &mut queue,
                        &mut enqueued,
                        pkg.installer,
                    );
                }
            }

            // Source pull, then Build-Depends of that source.
            let source = match self.universe.source(&pkg.source) {
                Some(source) => source.clone(),
                None => {
                    log::warn!("Missing source package: {} (for {})", pkg.source, pkgname);
                    continue;
                }
            };
            {
                let data = self.seeds.get_mut(seedname).unwrap();
                if build_context {
                    data.build_sources.insert(source.name.clone());
                } else {
                    data.sources.insert(source.name.clone());
                }
            }
            let expand_build_depends = if build_context {
                // One level only, unless told to chase the whole build
                // closure.
                self.always_follow_build_depends
            } else {
                follow_build
            };
            if expand_build_depends {
                let exprs: Vec<_> = source
                    .build_depends
                    .iter()
                    .chain(source.build_depends_indep.iter())
                    .cloned()
                    .collect();
                for expr in exprs {
                    self.resolve_expr(
                        structure,
                        seedname,
                        &scope,
                        &source.name,
                        RelationKind::BuildDepends,
                        &expr,
                        Category::BuildDepend,
                        &mut queue,
                        &mut enqueued,
                        false,
                    );
                }
            }
        }
    }

    /// Phases 2 and 3: grow every seed's closure in structure order, then
    /// apply the deferred snap and soft entries.
    pub fn grow(&mut self, structure: &SeedStructure) {
        for seedname in structure.names().to_vec() {
            germinate_progress!("Growing {} seed ...", seedname);
            self.grow_seed(structure, &seedname);
        }

        for seedname in structure.names().to_vec() {
            let data = match self.seeds.get(&seedname) {
                Some(data) => (data.snap_entries.clone(), data.soft_entries.clone()),
                None => continue,
            };
            let (snap_entries, soft_entries) = data;
            for pkg in snap_entries {
                if self.universe.lookup(&pkg, false).is_some() {
                    self.claim(
                        structure,
                        &seedname,
                        &pkg,
                        Reason::Seeded,
                        Category::Entry,
                        false,
                    );
                } else {
                    log::debug!("Snap entry {} not in archive; skipping", pkg);
                }
            }
            let scope: HashSet<String> = self
                .inner_seeds_of(structure, &seedname)
                .into_iter()
                .collect();
            for pkg in soft_entries {
                match self.why.get(&pkg) {
                    Some((owner, _)) if owner == &seedname => {}
                    Some((owner, _)) if scope.contains(owner) => {
                        self.seeds.get_mut(&seedname).unwrap().note_inherited(&pkg);
                    }
                    Some((owner, _)) => log::debug!(
                        "Soft entry {} of {} already owned by {}; leaving it",
                        pkg,
                        seedname,
                        owner
                    ),
                    None => log::debug!(
                        "Soft entry {} of {} not in the closure; skipping",
                        pkg,
                        seedname
                    ),
                }
            }
        }
    }

    /// Phase 4a: collect archive leftovers into the `extra` pseudo-seed:
    /// binaries generated by sources already in the closure, and Essential
    /// packages nothing pulled in.
    pub fn add_extras(&mut self, structure: &SeedStructure) {
        germinate_progress!("Identifying extras ...");
        if !self.seeds.contains_key(EXTRA_SEED) {
            self.seeds
                .insert(EXTRA_SEED.to_string(), GerminatedSeed::default());
            self.seed_order.push(EXTRA_SEED.to_string());
        }

        let mut all_sources: BTreeSet<String> = BTreeSet::new();
        for data in self.seeds.values() {
            all_sources.extend(data.sources.iter().cloned());
            all_sources.extend(data.build_sources.iter().cloned());
        }

        for srcname in &all_sources {
            let binaries = match self.universe.source(srcname) {
                Some(source) => source.binaries.clone(),
                None => continue,
            };
            for binary in binaries {
                if self.why.contains_key(&binary) {
                    continue;
                }
                if self.universe.package(&binary).is_none() {
                    continue;
                }
                self.claim(
                    structure,
                    EXTRA_SEED,
                    &binary,
                    Reason::Generated(srcname.clone()),
                    Category::Entry,
                    false,
                );
            }
        }

        let mut names: Vec<String> = self.universe.package_names().cloned().collect();
        names.sort();
        for name in names {
            if self.why.contains_key(&name) {
                continue;
            }
            let essential = self
                .universe
                .package(&name)
                .map_or(false, |pkg| pkg.essential);
            if essential {
                self.claim(
                    structure,
                    EXTRA_SEED,
                    &name,
                    Reason::Essential,
                    Category::Entry,
                    false,
                );
            }
        }

        self.grow_seed(structure, EXTRA_SEED);
    }

    /// Phase 4b: tidy the reverse-dependency index recorded during growth.
    pub fn reverse_depends(&mut self, _structure: &SeedStructure) {
        germinate_progress!("Building reverse dependency relationships ...");
        let why = &self.why;
        for dependers in self.rdepends.values_mut() {
            dependers.retain(|(depender, kind)| {
                *kind == RelationKind::BuildDepends || why.contains_key(depender)
            });
        }
        self.rdepends.retain(|pkg, dependers| {
            !dependers.is_empty() && why.contains_key(pkg)
        });
    }

    // Accessors used by the output writers and tests.

    /// All seed names known to the resolver, including `extra` once
    /// `add_extras` has run.
    pub fn seed_names(&self) -> &[String] {
        &self.seed_order
    }

    pub fn seed_entries(&self, seedname: &str) -> Vec<String> {
        self.seeds
            .get(seedname)
            .map(|data| data.entries.clone())
            .unwrap_or_default()
    }

    pub fn seed_recommends(&self, seedname: &str) -> Vec<String> {
        self.sorted_set(seedname, |data| &data.recommends)
    }

    pub fn seed_depends(&self, seedname: &str) -> Vec<String> {
        self.sorted_set(seedname, |data| &data.depends)
    }

    pub fn seed_build_depends(&self, seedname: &str) -> Vec<String> {
        self.sorted_set(seedname, |data| &data.build_depends)
    }

    pub fn seed_sources(&self, seedname: &str) -> Vec<String> {
        self.sorted_set(seedname, |data| &data.sources)
    }

    pub fn seed_build_sources(&self, seedname: &str) -> Vec<String> {
        self.sorted_set(seedname, |data| &data.build_sources)
    }

    fn sorted_set<F>(&self, seedname: &str, select: F) -> Vec<String>
    where
        F: Fn(&GerminatedSeed) -> &BTreeSet<String>,
    {
        self.seeds
            .get(seedname)
            .map(|data| select(data).iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every package attributed to this seed, sorted.
    pub fn seed_members(&self, seedname: &str) -> BTreeSet<String> {
        let mut members = BTreeSet::new();
        if let Some(data) = self.seeds.get(seedname) {
            members.extend(data.entries.iter().cloned());
            members.extend(data.recommends.iter().cloned());
            members.extend(data.depends.iter().cloned());
        }
        members
    }

    /// Every package in every real seed's closure, sorted.
    pub fn all_packages(&self, structure: &SeedStructure) -> BTreeSet<String> {
        let mut members = BTreeSet::new();
        for seedname in structure.names() {
            members.extend(self.seed_members(seedname));
        }
        members
    }

    /// Everything in any attributed set, including build-depends and the
    /// extra seed; this feeds the rdepends tree.
    pub fn get_all(&self) -> BTreeSet<String> {
        let mut members = BTreeSet::new();
        for (seedname, data) in &self.seeds {
            members.extend(self.seed_members(seedname));
            members.extend(data.build_depends.iter().cloned());
        }
        members
    }

    /// The source package a binary belongs to, as indexed.
    pub fn get_source(&self, pkg: &str) -> Option<&str> {
        self.universe
            .lookup(pkg, false)
            .map(|record| record.source.as_str())
    }

    pub fn why(&self, pkg: &str) -> Option<(&str, &Reason)> {
        self.why
            .get(pkg)
            .map(|(seed, reason)| (seed.as_str(), reason))
    }

    pub fn why_string(&self, pkg: &str) -> String {
        match self.why.get(pkg) {
            Some((seed, reason)) => reason.describe(seed),
            None => String::new(),
        }
    }

    pub fn is_blacklisted(&self, pkg: &str) -> bool {
        self.blacklist.contains(pkg)
    }

    pub fn blacklist(&self) -> &BTreeSet<String> {
        &self.blacklist
    }

    /// Seeds that had a blacklisted package requested from them.
    pub fn blacklisted_by(&self, pkg: &str) -> Vec<String> {
        let mut seeds = Vec::new();
        for seedname in &self.seed_order {
            if let Some(data) = self.seeds.get(seedname) {
                if data.blacklisted.contains(pkg) {
                    seeds.push(seedname.clone());
                }
            }
        }
        seeds
    }

    /// `(depender, relation)` pairs whose relation this package satisfies.
    pub fn package_rdepends(&self, pkg: &str) -> Vec<(String, RelationKind)> {
        self.rdepends
            .get(pkg)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Annotation tags attached to a seed entry, e.g. kernel versions.
    pub fn entry_tags(&self, seedname: &str, pkg: &str) -> Vec<String> {
        self.seeds
            .get(seedname)
            .and_then(|data| data.tags.get(pkg).cloned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_lines_parse() {
        let entry = parse_seed_line(" * hello").unwrap();
        assert_eq!(entry.marker, '*');
        assert_eq!(entry.name, "hello");
        assert!(entry.arches.is_empty());
        assert!(entry.tags.is_empty());

        let entry = parse_seed_line(" % snap-pkg").unwrap();
        assert_eq!(entry.marker, '%');
        let entry = parse_seed_line(" ? soft-pkg").unwrap();
        assert_eq!(entry.marker, '?');

        assert!(parse_seed_line("Commentary text").is_none());
        assert!(parse_seed_line("# pure comment").is_none());
        assert!(parse_seed_line("").is_none());
    }

    #[test]
    fn seed_lines_parse_arch_and_tags() {
        let entry = parse_seed_line(" * linux-generic [amd64 !i386] # kernel==generic").unwrap();
        assert_eq!(entry.name, "linux-generic");
        assert_eq!(
            entry.arches,
            vec![(false, "amd64".to_string()), (true, "i386".to_string())]
        );
        assert_eq!(entry.tags, vec!["kernel==generic"]);
        assert!(arch_applies(&entry.arches, "amd64"));
        assert!(!arch_applies(&entry.arches, "i386"));
        assert!(!arch_applies(&entry.arches, "arm64"));
    }

    #[test]
    fn seed_lines_parse_compact_marker() {
        let entry = parse_seed_line("*hello").unwrap();
        assert_eq!(entry.marker, '*');
        assert_eq!(entry.name, "hello");
    }
}

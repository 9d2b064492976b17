//! Writers for resolver state.  Pure functions of the `Germinator`; they
//! never mutate it, and all files go through `AtomicFile`.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use crate::errors::Result;
use crate::seeds::{AtomicFile, SeedStructure};
use crate::universe::RelationKind;

use super::{Germinator, EXTRA_SEED};

const COLUMNS: [&str; 7] = [
    "PACKAGE",
    "SOURCE",
    "WHY",
    "MAINTAINER",
    "VERSION",
    "SIZE",
    "INSTSIZE",
];

fn write_row(f: &mut AtomicFile, row: &[String], widths: &[usize]) -> Result<()> {
    let mut cells = Vec::with_capacity(row.len());
    for (i, cell) in row.iter().enumerate() {
        // The size columns are right-aligned; everything else is padded
        // out to the left.
        if i >= 5 {
            cells.push(format!("{:>width$}", cell, width = widths[i]));
        } else {
            cells.push(format!("{:<width$}", cell, width = widths[i]));
        }
    }
    writeln!(f, "{}", cells.join(" | ").trim_end())?;
    Ok(())
}

fn write_columnar<P: AsRef<Path>>(
    g: &Germinator,
    filename: P,
    members: &BTreeSet<String>,
) -> Result<()> {
    let mut rows: Vec<[String; 7]> = Vec::with_capacity(members.len());
    let mut total_size: u64 = 0;
    let mut total_installed: u64 = 0;
    for pkg in members {
        let (source, maintainer, version, size, installed) =
            match g.universe().lookup(pkg, false) {
                Some(record) => (
                    record.source.clone(),
                    record.maintainer.clone(),
                    record.version.clone(),
                    record.size,
                    record.installed_size,
                ),
                None => (String::new(), String::new(), String::new(), 0, 0),
            };
        total_size += size;
        total_installed += installed;
        rows.push([
            pkg.clone(),
            source,
            g.why_string(pkg),
            maintainer,
            version,
            size.to_string(),
            installed.to_string(),
        ]);
    }
    let totals = [
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        String::new(),
        total_size.to_string(),
        total_installed.to_string(),
    ];

    let mut widths: Vec<usize> = COLUMNS.iter().map(|c| c.len()).collect();
    for row in rows.iter().chain(std::iter::once(&totals)) {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }
    let line_len = widths.iter().sum::<usize>() + 3 * (widths.len() - 1);

    let mut f = AtomicFile::new(filename)?;
    let header: Vec<String> = COLUMNS.iter().map(|c| c.to_string()).collect();
    write_row(&mut f, &header, &widths)?;
    writeln!(f, "{}", "-".repeat(line_len))?;
    for row in &rows {
        write_row(&mut f, row, &widths)?;
    }
    writeln!(f, "{}", "-".repeat(line_len))?;
    write_row(&mut f, &totals, &widths)?;
    f.commit()
}

fn write_flat<P, I, S>(filename: P, items: I) -> Result<()>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut f = AtomicFile::new(filename)?;
    for item in items {
        writeln!(f, "{}", item.as_ref())?;
    }
    f.commit()
}

/// The columnar full list of everything attributed to one seed.
pub fn write_full_list<P: AsRef<Path>>(
    g: &Germinator,
    filename: P,
    seedname: &str,
) -> Result<()> {
    write_columnar(g, filename, &g.seed_members(seedname))
}

pub fn write_seed_list<P: AsRef<Path>>(g: &Germinator, filename: P, seedname: &str) -> Result<()> {
    let mut entries = g.seed_entries(seedname);
    entries.sort();
    write_flat(filename, entries)
}

pub fn write_seed_recommends_list<P: AsRef<Path>>(
    g: &Germinator,
    filename: P,
    seedname: &str,
) -> Result<()> {
    write_flat(filename, g.seed_recommends(seedname))
}

pub fn write_depends_list<P: AsRef<Path>>(
    g: &Germinator,
    filename: P,
    seedname: &str,
) -> Result<()> {
    write_flat(filename, g.seed_depends(seedname))
}

pub fn write_build_depends_list<P: AsRef<Path>>(
    g: &Germinator,
    filename: P,
    seedname: &str,
) -> Result<()> {
    write_flat(filename, g.seed_build_depends(seedname))
}

pub fn write_sources_list<P: AsRef<Path>>(
    g: &Germinator,
    filename: P,
    seedname: &str,
) -> Result<()> {
    write_flat(filename, g.seed_sources(seedname))
}

pub fn write_build_sources_list<P: AsRef<Path>>(
    g: &Germinator,
    filename: P,
    seedname: &str,
) -> Result<()> {
    write_flat(filename, g.seed_build_sources(seedname))
}

/// Everything in every real seed, as one columnar list.
pub fn write_all_list<P: AsRef<Path>>(
    g: &Germinator,
    structure: &SeedStructure,
    filename: P,
) -> Result<()> {
    write_columnar(g, filename, &g.all_packages(structure))
}

pub fn write_all_source_list<P: AsRef<Path>>(
    g: &Germinator,
    structure: &SeedStructure,
    filename: P,
) -> Result<()> {
    let mut sources = BTreeSet::new();
    for seedname in structure.names() {
        sources.extend(g.seed_sources(seedname));
    }
    write_flat(filename, sources)
}

/// The supported seed's visible closure plus every seed's build-depends.
pub fn write_supported_list<P: AsRef<Path>>(
    g: &Germinator,
    structure: &SeedStructure,
    filename: P,
) -> Result<()> {
    let mut members = BTreeSet::new();
    for seedname in structure.inner_seeds(structure.supported()) {
        members.extend(g.seed_members(&seedname));
    }
    for seedname in g.seed_names() {
        members.extend(g.seed_build_depends(seedname));
    }
    write_columnar(g, filename, &members)
}

pub fn write_supported_source_list<P: AsRef<Path>>(
    g: &Germinator,
    structure: &SeedStructure,
    filename: P,
) -> Result<()> {
    let mut sources = BTreeSet::new();
    for seedname in structure.inner_seeds(structure.supported()) {
        sources.extend(g.seed_sources(&seedname));
    }
    for seedname in g.seed_names() {
        sources.extend(g.seed_build_sources(seedname));
    }
    write_flat(filename, sources)
}

pub fn write_all_extra_list<P: AsRef<Path>>(
    g: &Germinator,
    structure: &SeedStructure,
    filename: P,
) -> Result<()> {
    let mut members = g.all_packages(structure);
    members.extend(g.seed_members(EXTRA_SEED));
    write_columnar(g, filename, &members)
}

pub fn write_all_extra_source_list<P: AsRef<Path>>(
    g: &Germinator,
    structure: &SeedStructure,
    filename: P,
) -> Result<()> {
    let mut sources = BTreeSet::new();
    for seedname in structure.names() {
        sources.extend(g.seed_sources(seedname));
    }
    sources.extend(g.seed_sources(EXTRA_SEED));
    write_flat(filename, sources)
}

/// Virtual names provided by packages in the closure, with their
/// in-closure providers.
pub fn write_provides_list<P: AsRef<Path>>(g: &Germinator, filename: P) -> Result<()> {
    let mut f = AtomicFile::new(filename)?;
    for (virt, providers) in g.universe().provides_map() {
        let owned: Vec<&str> = providers
            .iter()
            .filter(|p| g.why(p).is_some())
            .map(String::as_str)
            .collect();
        if owned.is_empty() {
            continue;
        }
        writeln!(f, "{}: {}", virt, owned.join(" "))?;
    }
    f.commit()
}

/// The blacklist, with the seeds that tried to use each entry.
pub fn write_blacklisted<P: AsRef<Path>>(g: &Germinator, filename: P) -> Result<()> {
    let mut f = AtomicFile::new(filename)?;
    for pkg in g.blacklist() {
        let seeds = g.blacklisted_by(pkg);
        if seeds.is_empty() {
            writeln!(f, "{}", pkg)?;
        } else {
            writeln!(f, "{} ({})", pkg, seeds.join(", "))?;
        }
    }
    f.commit()
}

/// The reverse dependencies of one package, one depender per line.
pub fn write_rdepend_list<P: AsRef<Path>>(g: &Germinator, filename: P, pkg: &str) -> Result<()> {
    let mut f = AtomicFile::new(filename)?;
    for (depender, kind) in g.package_rdepends(pkg) {
        match kind {
            RelationKind::Depends => writeln!(f, "{}", depender)?,
            _ => writeln!(f, "{} ({})", depender, kind)?,
        }
    }
    f.commit()
}

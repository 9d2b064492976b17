//! Expand dependencies in a list of seed packages.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process;

use clap::Parser;
use log::{Level, LevelFilter};

use germinate::archive::TagFile;
use germinate::defaults;
use germinate::errors::Result;
use germinate::resolver::{output, EXTRA_SEED};
use germinate::seeds::SeedCache;
use germinate::{germinate_info, germinate_warn, Germinator, Seed, SeedStructure, SeedVcs};

#[derive(clap::ArgEnum, Clone, Copy, Debug)]
enum VcsChoice {
    None,
    Auto,
    Bzr,
    Git,
}

#[derive(Parser, Debug)]
#[clap(
    name = "germinate",
    version,
    about = "Expand dependencies in a list of seed packages."
)]
struct Args {
    /// Be more verbose when processing seeds.
    #[clap(short, long)]
    verbose: bool,

    /// Fetch seeds from SOURCE (comma-separated list of bases).
    #[clap(short = 'S', long = "seed-source", value_name = "SOURCE")]
    seed_source: Option<String>,

    /// Fetch seeds for distribution DIST.
    #[clap(
        short = 's',
        long = "seed-dist",
        value_name = "DIST",
        default_value_t = defaults::RELEASE.to_string()
    )]
    seed_dist: String,

    /// Get package lists from MIRROR.
    #[clap(short = 'm', long = "mirror", value_name = "MIRROR")]
    mirrors: Vec<String>,

    /// Get source package lists from MIRROR (default: value of --mirror).
    #[clap(long = "source-mirror", value_name = "MIRROR")]
    source_mirrors: Vec<String>,

    /// Operate on distribution DIST (comma-separated).
    #[clap(short = 'd', long = "dist", default_value_t = defaults::DIST.to_string())]
    dist: String,

    /// Operate on architecture ARCH.
    #[clap(short = 'a', long = "arch", default_value_t = defaults::ARCH.to_string())]
    arch: String,

    /// Operate on components COMPS (comma-separated).
    #[clap(
        short = 'c',
        long = "components",
        value_name = "COMPS",
        default_value_t = defaults::COMPONENTS.to_string()
    )]
    components: String,

    /// Version control system to use for seeds.
    #[clap(long = "vcs", arg_enum, value_name = "VCS")]
    vcs: Option<VcsChoice>,

    /// Fetch seeds using bzr (deprecated; use --vcs=bzr instead).
    #[clap(long = "bzr")]
    bzr: bool,

    /// Don't cache Packages or Sources files.
    #[clap(long)]
    cleanup: bool,

    /// Disable reverse-dependency calculations.
    #[clap(long = "no-rdepends")]
    no_rdepends: bool,

    /// Do not consider debian-installer udeb packages.
    #[clap(long = "no-installer")]
    no_installer: bool,

    /// Treat each PKG as a seed by itself, inheriting from PARENT.
    #[clap(long = "seed-packages", value_name = "PARENT/PKG,PARENT/PKG,...")]
    seed_packages: Option<String>,

    /// Always follow Build-Depends, regardless of seed feature flags.
    #[clap(long = "always-follow-build-depends")]
    always_follow_build_depends: bool,
}

impl Args {
    /// `PARENT/PKG` pairs from --seed-packages.  Validated up front in
    /// `main`, so this cannot fail later.
    fn parsed_seed_packages(&self) -> Vec<(String, String)> {
        self.seed_packages
            .as_deref()
            .map(split_list)
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| {
                entry
                    .split_once('/')
                    .map(|(parent, pkg)| (parent.to_string(), pkg.to_string()))
            })
            .collect()
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            let prefix = match record.level() {
                Level::Debug | Level::Trace => "  ",
                Level::Info => "* ",
                Level::Warn => "! ",
                Level::Error => "? ",
            };
            writeln!(buf, "{}{}", prefix, record.args())
        })
        .target(env_logger::Target::Stdout)
        .init();
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn real_main(args: &Args) -> Result<()> {
    if args.bzr {
        germinate_warn!("--bzr is deprecated; use --vcs=bzr instead");
    }
    let vcs = match args.vcs {
        Some(VcsChoice::None) | None if args.bzr => Some(SeedVcs::Bzr),
        Some(VcsChoice::None) | None => None,
        Some(VcsChoice::Auto) => Some(SeedVcs::Auto),
        Some(VcsChoice::Bzr) => Some(SeedVcs::Bzr),
        Some(VcsChoice::Git) => Some(SeedVcs::Git),
    };

    let seed_bases = match &args.seed_source {
        Some(source) => split_list(source),
        None => split_list(match vcs {
            None => defaults::SEEDS,
            Some(SeedVcs::Git) => defaults::SEEDS_GIT,
            Some(_) => defaults::SEEDS_BZR,
        }),
    };
    let mirrors = if args.mirrors.is_empty() {
        vec![defaults::MIRROR.to_string()]
    } else {
        args.mirrors.clone()
    };
    let dists = split_list(&args.dist);
    let components = split_list(&args.components);

    let mut g = Germinator::new(&args.arch);
    g.set_always_follow_build_depends(args.always_follow_build_depends);

    let archive = TagFile::new(
        &dists,
        &components,
        &args.arch,
        &mirrors,
        if args.source_mirrors.is_empty() {
            None
        } else {
            Some(args.source_mirrors.as_slice())
        },
        !args.no_installer,
        args.cleanup,
    );
    g.parse_archive(&archive)?;

    let cache = SeedCache::new();
    let mut structure = SeedStructure::new(&cache, &args.seed_dist, &seed_bases, vcs)?;
    for (parent, pkg) in &args.parsed_seed_packages() {
        structure.add(pkg, &[format!(" * {}", pkg)], Some(parent.as_str()));
    }
    g.plant_seeds(&structure)?;

    let branches = [args.seed_dist.clone()];
    match Seed::open(&cache, &seed_bases, &branches, "blacklist", vcs) {
        Ok(blacklist) => g.parse_blacklist(&blacklist),
        // The blacklist is optional.
        Err(e) => log::debug!("No blacklist found: {}", e),
    }

    g.grow(&structure);
    g.add_extras(&structure);
    if !args.no_rdepends {
        g.reverse_depends(&structure);
    }

    let mut seednames = structure.names().to_vec();
    seednames.push(EXTRA_SEED.to_string());
    for seedname in &seednames {
        output::write_full_list(&g, seedname, seedname)?;
        output::write_seed_list(&g, format!("{}.seed", seedname), seedname)?;
        output::write_seed_recommends_list(
            &g,
            format!("{}.seed-recommends", seedname),
            seedname,
        )?;
        output::write_depends_list(&g, format!("{}.depends", seedname), seedname)?;
        output::write_build_depends_list(&g, format!("{}.build-depends", seedname), seedname)?;

        if seedname != EXTRA_SEED && structure.contains(seedname) {
            structure.write_seed_text(format!("{}.seedtext", seedname), seedname)?;
            output::write_sources_list(&g, format!("{}.sources", seedname), seedname)?;
        }
        output::write_build_sources_list(&g, format!("{}.build-sources", seedname), seedname)?;
    }

    output::write_all_list(&g, &structure, "all")?;
    output::write_all_source_list(&g, &structure, "all.sources")?;

    output::write_supported_list(
        &g,
        &structure,
        format!("{}+build-depends", structure.supported()),
    )?;
    output::write_supported_source_list(
        &g,
        &structure,
        format!("{}+build-depends.sources", structure.supported()),
    )?;

    output::write_all_extra_list(&g, &structure, "all+extra")?;
    output::write_all_extra_source_list(&g, &structure, "all+extra.sources")?;

    output::write_provides_list(&g, "provides")?;

    structure.write("structure")?;
    structure.write_dot("structure.dot")?;

    if Path::new("rdepends").exists() {
        fs::remove_dir_all("rdepends")?;
    }
    if !args.no_rdepends {
        fs::create_dir("rdepends")?;
        fs::create_dir("rdepends/ALL")?;
        for pkg in g.get_all() {
            let src = match g.get_source(&pkg) {
                Some(src) => src.to_string(),
                None => continue,
            };
            let dirname = Path::new("rdepends").join(&src);
            if !dirname.exists() {
                fs::create_dir(&dirname)?;
            }
            output::write_rdepend_list(&g, dirname.join(&pkg), &pkg)?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(
                Path::new("..").join(&src).join(&pkg),
                Path::new("rdepends").join("ALL").join(&pkg),
            )?;
        }
    }

    output::write_blacklisted(&g, "blacklisted")?;

    germinate_info!(
        "Wrote lists for {} seeds ({} packages)",
        seednames.len(),
        g.get_all().len()
    );
    Ok(())
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    // Configuration problems exit 2; clap handles its own usage errors
    // the same way.
    if let Some(seed_packages) = &args.seed_packages {
        for entry in split_list(seed_packages) {
            if !entry.contains('/') {
                eprintln!("germinate: --seed-packages entries must be PARENT/PKG: {}", entry);
                process::exit(2);
            }
        }
    }

    if let Err(e) = real_main(&args) {
        log::error!("{:#}", e);
        // Seed and archive failures, and anything else that stops the
        // run, exit 1.
        process::exit(1);
    }
}

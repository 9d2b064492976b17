//! Built-in defaults for the command-line tools.

pub const SEEDS: &str = "https://ubuntu-archive-team.ubuntu.com/seeds/";
pub const SEEDS_BZR: &str = "http://bazaar.launchpad.net/~ubuntu-core-dev/ubuntu-seeds/";
pub const SEEDS_GIT: &str = "git://git.launchpad.net/~ubuntu-core-dev/ubuntu-seeds/+git/";
pub const RELEASE: &str = "ubuntu.noble";
pub const MIRROR: &str = "http://archive.ubuntu.com/ubuntu/";
pub const DIST: &str = "noble";
pub const ARCH: &str = "amd64";
pub const COMPONENTS: &str = "main,restricted";

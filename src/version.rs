//! Build metadata embedded by `build.rs`

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    /// Short commit hash, or "unknown" outside a git checkout
    pub git_hash: &'static str,
    pub git_branch: &'static str,
    pub git_dirty: bool,
    pub build_timestamp: &'static str,
    pub target: &'static str,
    pub host: &'static str,
    pub profile: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            git_hash: env!("REALTIME_LINK_GIT_HASH"),
            git_branch: env!("REALTIME_LINK_GIT_BRANCH"),
            git_dirty: env!("REALTIME_LINK_GIT_DIRTY") == "true",
            build_timestamp: env!("REALTIME_LINK_BUILD_TIMESTAMP"),
            target: env!("REALTIME_LINK_TARGET"),
            host: env!("REALTIME_LINK_HOST"),
            profile: env!("REALTIME_LINK_PROFILE"),
            rustc_version: env!("REALTIME_LINK_RUSTC_VERSION"),
        }
    }

    /// `0.1.0-abc1234`, with `-dirty` appended for uncommitted builds
    pub fn full_version(&self) -> String {
        let mut version = format!("{}-{}", self.version, self.git_hash);
        if self.git_dirty {
            version.push_str("-dirty");
        }
        version
    }

    /// One-line banner logged when a client starts
    pub fn banner(&self) -> String {
        format!("{} {} ({})", self.name, self.version, self.git_hash)
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.full_version())?;
        writeln!(f)?;
        writeln!(f, "  Branch:   {}", self.git_branch)?;
        writeln!(f, "  Built:    {} ({})", self.build_timestamp, self.profile)?;
        writeln!(f, "  Target:   {}", self.target)?;
        writeln!(f, "  Host:     {}", self.host)?;
        writeln!(f, "  Compiler: {}", self.rustc_version)
    }
}

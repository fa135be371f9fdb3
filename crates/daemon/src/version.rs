use std::fmt::{self, Display};

use serde::Serialize;

/// Facts about the running binary, captured by the build script
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BuildInfo {
    pub package_version: &'static str,
    pub version: &'static str,
    pub build_profile: &'static str,
    pub build_timestamp: &'static str,
    pub rust_version: &'static str,
    pub target: &'static str,
}

pub fn build_info() -> BuildInfo {
    BuildInfo {
        package_version: env!("CARGO_PKG_VERSION"),
        version: env!("REPO_VERSION"),
        build_profile: env!("BUILD_PROFILE"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        rust_version: env!("RUST_VERSION"),
        target: env!("BUILD_TARGET"),
    }
}

impl Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "depot {} ({})\nprofile: {}\nbuilt: {}\ntarget: {}\n{}",
            self.package_version,
            self.version,
            self.build_profile,
            self.build_timestamp,
            self.target,
            self.rust_version
        )
    }
}

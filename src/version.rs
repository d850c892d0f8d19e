//! Version and build information
//!
//! Also derives the small integer protocol version that clients receive in
//! the `{"action":"ver"}` greeting.

use std::fmt;

/// Build information embedded at compile time
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Package version from Cargo.toml
    pub version: &'static str,
    /// Package name
    pub name: &'static str,
    /// Git commit hash (short)
    pub git_hash: &'static str,
    /// Build timestamp
    pub build_timestamp: &'static str,
    /// Target triple (e.g., x86_64-unknown-linux-gnu)
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
}

impl BuildInfo {
    /// Get the current build information
    pub const fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            name: env!("CARGO_PKG_NAME"),
            git_hash: env!("SIGNALHUB_GIT_HASH"),
            build_timestamp: env!("SIGNALHUB_BUILD_TIMESTAMP"),
            target: env!("SIGNALHUB_TARGET"),
            profile: env!("SIGNALHUB_PROFILE"),
        }
    }

    /// Full version string (e.g., "0.3.0-abc1234")
    pub fn full_version(&self) -> String {
        format!("{}-{}", self.version, self.git_hash)
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.full_version())?;
        writeln!(f)?;
        writeln!(f, "Build Information:")?;
        writeln!(f, "  Version:    {}", self.version)?;
        writeln!(f, "  Protocol:   {}", protocol_version())?;
        writeln!(f, "  Git Hash:   {}", self.git_hash)?;
        writeln!(f, "  Built:      {}", self.build_timestamp)?;
        writeln!(f, "  Profile:    {}", self.profile)?;
        writeln!(f, "  Target:     {}", self.target)?;
        Ok(())
    }
}

/// Get the current build info
pub fn build_info() -> BuildInfo {
    BuildInfo::current()
}

/// Print version information to stdout
pub fn print_version() {
    print!("{}", build_info());
}

/// Protocol version announced to clients: `major * 10 + minor`
pub fn protocol_version() -> u32 {
    version_number(env!("CARGO_PKG_VERSION"))
}

fn version_number(version: &str) -> u32 {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    major * 10 + minor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_info_exists() {
        let info = build_info();
        assert!(!info.version.is_empty());
        assert_eq!(info.name, "signalhub");
    }

    #[test]
    fn test_version_number() {
        assert_eq!(version_number("0.3.0"), 3);
        assert_eq!(version_number("2.11.4"), 31);
        assert_eq!(version_number("garbage"), 0);
    }

    #[test]
    fn test_display_format() {
        let display = format!("{}", build_info());
        assert!(display.contains("Version:"));
        assert!(display.contains("Protocol:"));
        assert!(display.contains("Git Hash:"));
    }
}

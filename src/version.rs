//! Version and build information
//!
//! Values are embedded by `build.rs` at compile time.

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
    /// Git branch name
    pub git_branch: &'static str,
    git_dirty_str: &'static str,
    /// Build timestamp
    pub build_timestamp: &'static str,
    /// Target triple
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
    /// Rustc version used to build
    pub rustc_version: &'static str,
    /// Host triple (build machine)
    pub host: &'static str,
}

impl BuildInfo {
    /// Get the current build information
    pub const fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            name: env!("CARGO_PKG_NAME"),
            git_hash: env!("PERSONA_CHAT_GIT_HASH"),
            git_branch: env!("PERSONA_CHAT_GIT_BRANCH"),
            git_dirty_str: env!("PERSONA_CHAT_GIT_DIRTY"),
            build_timestamp: env!("PERSONA_CHAT_BUILD_TIMESTAMP"),
            target: env!("PERSONA_CHAT_TARGET"),
            profile: env!("PERSONA_CHAT_PROFILE"),
            rustc_version: env!("PERSONA_CHAT_RUSTC_VERSION"),
            host: env!("PERSONA_CHAT_HOST"),
        }
    }

    /// Whether the working directory was dirty at build time
    pub fn git_dirty(&self) -> bool {
        self.git_dirty_str == "true"
    }

    /// Full version string, e.g. "0.1.0-abc1234"
    pub fn full_version(&self) -> String {
        let dirty = if self.git_dirty() { "-dirty" } else { "" };
        format!("{}-{}{}", self.version, self.git_hash, dirty)
    }

    /// `User-Agent` sent with completion requests
    pub fn user_agent(&self) -> String {
        format!("{}/{} ({})", self.name, self.version, self.git_hash)
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.name, self.full_version())?;
        writeln!(f)?;
        writeln!(f, "Build Information:")?;
        let rows = [
            ("Version", self.version),
            ("Git Hash", self.git_hash),
            ("Git Branch", self.git_branch),
            ("Built", self.build_timestamp),
            ("Profile", self.profile),
            ("Target", self.target),
            ("Host", self.host),
            ("Compiler", self.rustc_version),
        ];
        for (label, value) in rows {
            writeln!(f, "  {:<11} {}", format!("{}:", label), value)?;
        }
        if self.git_dirty() {
            writeln!(f, "  (built from a dirty working tree)")?;
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_info_exists() {
        let info = build_info();
        assert_eq!(info.name, "persona-chat");
        assert!(!info.version.is_empty());
    }

    #[test]
    fn test_full_version_contains_hash() {
        let info = build_info();
        let full = info.full_version();
        assert!(full.starts_with(info.version));
        assert!(full.contains(info.git_hash));
    }

    #[test]
    fn test_display_format() {
        let display = build_info().to_string();
        assert!(display.contains("Build Information:"));
        assert!(display.contains("Git Hash:"));
        assert!(display.contains("Target:"));
    }

    #[test]
    fn test_user_agent() {
        let agent = build_info().user_agent();
        assert!(agent.starts_with("persona-chat/"));
        assert!(agent.contains(build_info().git_hash));
    }
}

//! Platform detection used by the platform skip predicates.

use std::fmt;

/// Operating systems the skip predicates know how to gate on.
///
/// The names follow the conventional uname spellings (`darwin` for macOS,
/// `sunos` for Solaris, `smartos` for the illumos distribution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Windows,
    Linux,
    Darwin,
    SunOs,
    SmartOs,
    FreeBsd,
    NetBsd,
    OpenBsd,
    Aix,
}

impl Platform {
    /// Every platform the predicates can gate on.
    pub const ALL: [Platform; 9] = [
        Platform::Windows,
        Platform::Linux,
        Platform::Darwin,
        Platform::SunOs,
        Platform::SmartOs,
        Platform::FreeBsd,
        Platform::NetBsd,
        Platform::OpenBsd,
        Platform::Aix,
    ];

    /// Returns true when the current build target is this platform.
    pub fn is_current(self) -> bool {
        match self {
            Platform::Windows => cfg!(windows),
            Platform::Linux => cfg!(target_os = "linux"),
            Platform::Darwin => cfg!(target_os = "macos"),
            Platform::SunOs => cfg!(target_os = "solaris"),
            Platform::SmartOs => cfg!(target_os = "illumos"),
            Platform::FreeBsd => cfg!(target_os = "freebsd"),
            Platform::NetBsd => cfg!(target_os = "netbsd"),
            Platform::OpenBsd => cfg!(target_os = "openbsd"),
            Platform::Aix => cfg!(target_os = "aix"),
        }
    }

    /// The platform the current build target runs on, if it is one the
    /// predicates know about.
    pub fn current() -> Option<Platform> {
        Platform::ALL.into_iter().find(|platform| platform.is_current())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Darwin => "darwin",
            Platform::SunOs => "sunos",
            Platform::SmartOs => "smartos",
            Platform::FreeBsd => "freebsd",
            Platform::NetBsd => "netbsd",
            Platform::OpenBsd => "openbsd",
            Platform::Aix => "aix",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_windows() -> bool {
    Platform::Windows.is_current()
}

pub fn is_linux() -> bool {
    Platform::Linux.is_current()
}

pub fn is_darwin() -> bool {
    Platform::Darwin.is_current()
}

pub fn is_sunos() -> bool {
    Platform::SunOs.is_current()
}

pub fn is_smartos() -> bool {
    Platform::SmartOs.is_current()
}

pub fn is_freebsd() -> bool {
    Platform::FreeBsd.is_current()
}

pub fn is_netbsd() -> bool {
    Platform::NetBsd.is_current()
}

pub fn is_openbsd() -> bool {
    Platform::OpenBsd.is_current()
}

pub fn is_aix() -> bool {
    Platform::Aix.is_current()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_platform_is_current() {
        let matching: Vec<Platform> = Platform::ALL
            .into_iter()
            .filter(|platform| platform.is_current())
            .collect();
        assert!(
            matching.len() <= 1,
            "multiple platforms claim the current target: {matching:?}"
        );
    }

    #[test]
    fn current_matches_the_free_functions() {
        if is_linux() {
            assert_eq!(Platform::current(), Some(Platform::Linux));
        }
        if is_darwin() {
            assert_eq!(Platform::current(), Some(Platform::Darwin));
        }
        if is_windows() {
            assert_eq!(Platform::current(), Some(Platform::Windows));
        }
    }

    #[test]
    fn display_uses_uname_spelling() {
        assert_eq!(Platform::Darwin.to_string(), "darwin");
        assert_eq!(Platform::SunOs.to_string(), "sunos");
        assert_eq!(Platform::Windows.to_string(), "windows");
    }
}

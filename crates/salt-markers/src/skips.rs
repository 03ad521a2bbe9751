//! Platform-conditional skip predicates.

use crate::platform::Platform;

/// Skip when the current platform is `platform`. A supplied reason is used
/// verbatim, otherwise a default is generated.
pub fn skip_on(platform: Platform, reason: Option<&str>) -> Option<String> {
    if platform.is_current() {
        Some(match reason {
            Some(reason) => reason.to_owned(),
            None => format!("Skipped on {platform}"),
        })
    } else {
        None
    }
}

/// Skip unless the current platform is `platform`.
pub fn skip_unless_on(platform: Platform, reason: Option<&str>) -> Option<String> {
    if platform.is_current() {
        None
    } else {
        Some(match reason {
            Some(reason) => reason.to_owned(),
            None => format!("Platform is not {platform}"),
        })
    }
}

/// Skip when the current platform matches any entry in `platforms`.
pub fn skip_on_platforms(platforms: &[Platform], reason: Option<&str>) -> Option<String> {
    if platforms.iter().any(|platform| platform.is_current()) {
        Some(match reason {
            Some(reason) => reason.to_owned(),
            None => "Skipped on platform match".to_owned(),
        })
    } else {
        None
    }
}

/// Skip unless the current platform matches at least one entry in
/// `platforms`.
pub fn skip_unless_on_platforms(platforms: &[Platform], reason: Option<&str>) -> Option<String> {
    if platforms.iter().any(|platform| platform.is_current()) {
        None
    } else {
        Some(match reason {
            Some(reason) => reason.to_owned(),
            None => "None of the required platforms matched".to_owned(),
        })
    }
}

pub fn skip_on_windows(reason: Option<&str>) -> Option<String> {
    skip_on(Platform::Windows, reason)
}

pub fn skip_on_linux(reason: Option<&str>) -> Option<String> {
    skip_on(Platform::Linux, reason)
}

pub fn skip_on_darwin(reason: Option<&str>) -> Option<String> {
    skip_on(Platform::Darwin, reason)
}

pub fn skip_unless_on_windows(reason: Option<&str>) -> Option<String> {
    skip_unless_on(Platform::Windows, reason)
}

pub fn skip_unless_on_linux(reason: Option<&str>) -> Option<String> {
    skip_unless_on(Platform::Linux, reason)
}

pub fn skip_unless_on_darwin(reason: Option<&str>) -> Option<String> {
    skip_unless_on(Platform::Darwin, reason)
}

/// Skips the surrounding test when running on Windows.
#[macro_export]
macro_rules! skip_on_windows {
    () => {
        $crate::skip_on_platform!(skip_on_windows, None)
    };
    ($reason:expr) => {
        $crate::skip_on_platform!(skip_on_windows, Some($reason))
    };
}

/// Skips the surrounding test when running on Linux.
#[macro_export]
macro_rules! skip_on_linux {
    () => {
        $crate::skip_on_platform!(skip_on_linux, None)
    };
    ($reason:expr) => {
        $crate::skip_on_platform!(skip_on_linux, Some($reason))
    };
}

/// Skips the surrounding test when running on macOS.
#[macro_export]
macro_rules! skip_on_darwin {
    () => {
        $crate::skip_on_platform!(skip_on_darwin, None)
    };
    ($reason:expr) => {
        $crate::skip_on_platform!(skip_on_darwin, Some($reason))
    };
}

/// Skips the surrounding test unless running on Windows.
#[macro_export]
macro_rules! skip_unless_on_windows {
    () => {
        $crate::skip_on_platform!(skip_unless_on_windows, None)
    };
    ($reason:expr) => {
        $crate::skip_on_platform!(skip_unless_on_windows, Some($reason))
    };
}

/// Skips the surrounding test unless running on Linux.
#[macro_export]
macro_rules! skip_unless_on_linux {
    () => {
        $crate::skip_on_platform!(skip_unless_on_linux, None)
    };
    ($reason:expr) => {
        $crate::skip_on_platform!(skip_unless_on_linux, Some($reason))
    };
}

/// Skips the surrounding test unless running on macOS.
#[macro_export]
macro_rules! skip_unless_on_darwin {
    () => {
        $crate::skip_on_platform!(skip_unless_on_darwin, None)
    };
    ($reason:expr) => {
        $crate::skip_on_platform!(skip_unless_on_darwin, Some($reason))
    };
}

/// Shared expansion for the platform skip macros. Not meant to be called
/// directly.
#[doc(hidden)]
#[macro_export]
macro_rules! skip_on_platform {
    ($predicate:ident, $reason:expr) => {
        if let Some(reason) = $crate::$predicate($reason) {
            eprintln!("skipped: {reason}");
            return;
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::is_darwin;

    #[test]
    fn unless_on_darwin_skips_everywhere_else() {
        let reason = skip_unless_on_darwin(None);
        if is_darwin() {
            assert_eq!(reason, None);
        } else {
            assert_eq!(reason.as_deref(), Some("Platform is not darwin"));
        }
    }

    #[test]
    fn custom_reason_is_used_verbatim() {
        if !is_darwin() {
            let reason = skip_unless_on_darwin(Some("Because!"));
            assert_eq!(reason.as_deref(), Some("Because!"));
        }
        if is_darwin() {
            let reason = skip_on_darwin(Some("Because!"));
            assert_eq!(reason.as_deref(), Some("Because!"));
        }
    }

    #[test]
    fn on_and_unless_are_inverse() {
        for platform in Platform::ALL {
            let on = skip_on(platform, None);
            let unless = skip_unless_on(platform, None);
            assert_ne!(on.is_some(), unless.is_some(), "{platform}");
        }
    }

    #[test]
    fn platform_list_matching() {
        assert_eq!(skip_on_platforms(&[], None), None);
        if Platform::current().is_some() {
            let reason = skip_on_platforms(&Platform::ALL, None);
            assert_eq!(reason.as_deref(), Some("Skipped on platform match"));
            assert_eq!(skip_unless_on_platforms(&Platform::ALL, None), None);
        }
    }

    #[test]
    fn platform_list_not_matching() {
        let current = Platform::current();
        let others: Vec<Platform> = Platform::ALL
            .into_iter()
            .filter(|platform| Some(*platform) != current)
            .collect();
        assert_eq!(skip_on_platforms(&others, None), None);
        let reason = skip_unless_on_platforms(&others, None);
        assert_eq!(
            reason.as_deref(),
            Some("None of the required platforms matched")
        );
    }
}

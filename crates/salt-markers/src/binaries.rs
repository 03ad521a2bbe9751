//! Binary-presence skip predicate.

use tracing::debug;

/// Decides whether a test should be skipped because required binaries are
/// not resolvable on the current `PATH`.
///
/// With `check_all` false, every binary in `binaries` must resolve; the
/// returned reason names the first one that does not. With `check_all` true,
/// at least one binary must resolve; the returned reason lists all of them.
/// A supplied `message` is prepended verbatim to the reason, separated by a
/// single space.
///
/// # Returns
///
/// `None` when the test should run, `Some(reason)` when it should skip.
pub fn skip_if_binaries_missing<S: AsRef<str>>(
    binaries: &[S],
    check_all: bool,
    message: Option<&str>,
) -> Option<String> {
    if check_all {
        for binary in binaries {
            if which::which(binary.as_ref()).is_ok() {
                return None;
            }
        }
        let names = binaries
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(", ");
        return Some(with_message(
            message,
            format!("None of the following binaries was found: {names}"),
        ));
    }

    for binary in binaries {
        let binary = binary.as_ref();
        if which::which(binary).is_err() {
            return Some(with_message(
                message,
                format!("The '{binary}' binary was not found"),
            ));
        }
    }
    debug!(
        "All binaries found. Searched for: {}",
        binaries
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(", ")
    );
    None
}

fn with_message(message: Option<&str>, reason: String) -> String {
    match message {
        Some(message) => format!("{message} {reason}"),
        None => reason,
    }
}

/// Skips the surrounding test unless every named binary resolves on `PATH`.
///
/// Expands to an early `return` printing the skip reason, so it only works
/// in functions returning `()`.
#[macro_export]
macro_rules! skip_if_binaries_missing {
    ($($binary:expr),+ $(,)?) => {
        if let Some(reason) =
            $crate::skip_if_binaries_missing(&[$($binary),+], false, None)
        {
            eprintln!("skipped: {reason}");
            return;
        }
    };
}

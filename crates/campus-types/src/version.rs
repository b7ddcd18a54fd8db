//! LMS release arithmetic.
//!
//! Servers report both a numeric build version (`2016052300`) and a dotted
//! release name (`3.1.2+ (Build: 20160714)`). Compatibility is decided from
//! the numeric version when it parses and from the release name otherwise.
//! Anything that parses as neither is invalid.

use serde::{Deserialize, Serialize};

use crate::SiteInfo;

/// Oldest supported release.
pub const MINIMUM_RELEASE: &str = "3.1";

/// Build version of [`MINIMUM_RELEASE`].
pub const MINIMUM_VERSION: u64 = 2016052300;

/// Oldest release that still needs the legacy app.
pub const LEGACY_RELEASE: &str = "2.4";

/// Build version of [`LEGACY_RELEASE`].
pub const LEGACY_VERSION: u64 = 2012120300;

/// Known major releases and their first build version, oldest first.
pub const RELEASES: &[(&str, u64)] = &[
    ("3.1", 2016052300),
    ("3.2", 2016120500),
    ("3.3", 2017051503),
    ("3.4", 2017111300),
    ("3.5", 2018051700),
    ("3.6", 2018120300),
    ("3.7", 2019052000),
    ("3.8", 2019111800),
    ("3.9", 2020061500),
    ("3.10", 2020110900),
    ("3.11", 2021051700),
    ("4.0", 2022041900),
    ("4.1", 2022112800),
    ("4.2", 2023042400),
    ("4.3", 2023100900),
    ("4.4", 2024042200),
    ("4.5", 2024100700),
];

/// Outcome of checking a site against the supported floor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionCheck {
    Valid,
    LegacyApp,
    Invalid,
}

/// Classify a site from its info.
pub fn check_site_version(info: &SiteInfo) -> VersionCheck {
    if let Some(version) = info.version.as_deref().and_then(parse_leading_int) {
        return if version >= MINIMUM_VERSION {
            VersionCheck::Valid
        } else if version >= LEGACY_VERSION {
            VersionCheck::LegacyApp
        } else {
            VersionCheck::Invalid
        };
    }

    if let Some(release) = info.release.as_deref().and_then(release_ordinal) {
        let minimum = release_ordinal(MINIMUM_RELEASE).unwrap_or(u64::MAX);
        let legacy = release_ordinal(LEGACY_RELEASE).unwrap_or(u64::MAX);
        return if release >= minimum {
            VersionCheck::Valid
        } else if release >= legacy {
            VersionCheck::LegacyApp
        } else {
            VersionCheck::Invalid
        };
    }

    VersionCheck::Invalid
}

/// Whether `site_version` satisfies a release requirement.
///
/// With several releases (oldest first), the site matches when it is at
/// least the last one, or at least one of the others but below the next
/// major release. `["3.0.5", "3.2.3", "3.3.1"]` accepts 3.3.1+, 3.2.3 to
/// 3.2.x, and 3.0.5 to 3.0.x.
pub fn is_version_greater_equal_than(site_version: u64, releases: &[&str]) -> bool {
    let Some((last, earlier)) = releases.split_last() else {
        return false;
    };

    for release in earlier {
        if site_version >= version_number(release)
            && site_version < next_major_version_number(release)
        {
            return true;
        }
    }

    site_version >= version_number(last)
}

/// Build version for a release name, 0 when the name is invalid.
///
/// A valid release whose major is not in [`RELEASES`] maps to the newest
/// known major.
pub fn version_number(release: &str) -> u64 {
    let Some((major, minor)) = major_and_minor(release) else {
        return 0;
    };

    let base = RELEASES
        .iter()
        .find(|(name, _)| *name == major)
        .or_else(|| RELEASES.last())
        .map(|(_, version)| *version)
        .unwrap_or_default();

    // A patch this large is beyond every real build.
    base.saturating_add(minor)
}

/// First build version of the major release after `release`.
pub fn next_major_version_number(release: &str) -> u64 {
    let Some((major, _)) = major_and_minor(release) else {
        return 0;
    };

    match RELEASES.iter().position(|(name, _)| *name == major) {
        Some(pos) if pos + 1 < RELEASES.len() => RELEASES[pos + 1].1,
        _ => RELEASES.last().map(|(_, v)| *v).unwrap_or_default(),
    }
}

/// Convert an app version name (`"4.1.2-dev"`) to a comparable number.
///
/// Up to three dot-separated parts are read, each taking two decimal digits.
/// Names too large to represent give `None`.
pub fn convert_version_name(name: &str) -> Option<u64> {
    let base = name.split('-').next().unwrap_or_default();
    let parts: Vec<&str> = base.split('.').take(3).collect();

    let mut version: u64 = 0;
    for part in &parts {
        let number: u64 = part.trim().parse().ok()?;
        version = version.checked_mul(100)?.checked_add(number)?;
    }
    if parts.len() < 3 {
        version = version.checked_mul(100u64.pow((3 - parts.len()) as u32))?;
    }

    Some(version)
}

/// Split a release name into `("major.minor", patch)`.
fn major_and_minor(release: &str) -> Option<(String, u64)> {
    let mut parts = release.split(|c: char| !c.is_ascii_digit() && c != '.');
    let numeric = parts.next()?;
    let mut components = numeric.split('.');

    let first = components.next().filter(|c| !c.is_empty())?;
    let second = components.next().filter(|c| !c.is_empty()).unwrap_or("0");
    let patch = components
        .next()
        .and_then(|c| c.parse::<u64>().ok())
        .unwrap_or(0);

    let first: u64 = first.parse().ok()?;
    let second: u64 = second.parse().ok()?;
    Some((format!("{first}.{second}"), patch))
}

/// Numeric ordering key for a dotted release prefix (`3.10` > `3.9`).
fn release_ordinal(release: &str) -> Option<u64> {
    let (major, patch) = major_and_minor(release)?;
    let (first, second) = major.split_once('.')?;
    let first: u64 = first.parse().ok()?;
    let second: u64 = second.parse().ok()?;
    first
        .checked_mul(1_000_000)?
        .checked_add(second.checked_mul(1_000)?)?
        .checked_add(patch.min(999))
}

/// Leading integer of a string, like `parseInt`.
fn parse_leading_int(value: &str) -> Option<u64> {
    let digits: String = value
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(version: Option<&str>, release: Option<&str>) -> SiteInfo {
        SiteInfo {
            version: version.map(String::from),
            release: release.map(String::from),
            ..SiteInfo::default()
        }
    }

    #[test]
    fn test_check_by_numeric_version() {
        assert_eq!(check_site_version(&info(Some("2016052300"), None)), VersionCheck::Valid);
        assert_eq!(check_site_version(&info(Some("2014051200"), None)), VersionCheck::LegacyApp);
        assert_eq!(check_site_version(&info(Some("2011070100"), None)), VersionCheck::Invalid);
    }

    #[test]
    fn test_check_falls_back_to_release() {
        assert_eq!(
            check_site_version(&info(Some("abc"), Some("3.10.1+ (Build: 20201118)"))),
            VersionCheck::Valid
        );
        assert_eq!(check_site_version(&info(None, Some("2.7.3"))), VersionCheck::LegacyApp);
        assert_eq!(check_site_version(&info(None, Some("1.9"))), VersionCheck::Invalid);
    }

    #[test]
    fn test_unparsable_is_invalid() {
        assert_eq!(check_site_version(&info(None, None)), VersionCheck::Invalid);
        assert_eq!(
            check_site_version(&info(Some("unknown"), Some("beta"))),
            VersionCheck::Invalid
        );
    }

    #[test]
    fn test_version_number() {
        assert_eq!(version_number("3.1"), 2016052300);
        assert_eq!(version_number("3.1.2"), 2016052302);
        assert_eq!(version_number("nope"), 0);
        // Unknown major uses the newest known one.
        assert_eq!(version_number("9.9"), 2024100700);
        assert_eq!(next_major_version_number("3.1"), 2016120500);
    }

    #[test]
    fn test_greater_equal_than_single() {
        assert!(is_version_greater_equal_than(2019111800, &["3.8"]));
        assert!(!is_version_greater_equal_than(2019052000, &["3.8"]));
        assert!(!is_version_greater_equal_than(2019052000, &[]));
    }

    #[test]
    fn test_greater_equal_than_ranges() {
        let releases = ["3.1.5", "3.3.1"];
        // 3.1.6: inside the 3.1 range.
        assert!(is_version_greater_equal_than(2016052306, &releases));
        // 3.1.1: below the 3.1 requirement.
        assert!(!is_version_greater_equal_than(2016052301, &releases));
        // 3.2: between ranges.
        assert!(!is_version_greater_equal_than(2016120500, &releases));
        // 3.4: above the last requirement.
        assert!(is_version_greater_equal_than(2017111300, &releases));
    }

    #[test]
    fn test_convert_version_name() {
        assert_eq!(convert_version_name("3.9.2"), Some(30902));
        assert_eq!(convert_version_name("4.1"), Some(40100));
        assert_eq!(convert_version_name("4"), Some(40000));
        assert_eq!(convert_version_name("4.1.0-dev"), Some(40100));
        assert_eq!(convert_version_name("four"), None);
        assert!(convert_version_name("4.1.1") > convert_version_name("4.1"));
    }

    #[test]
    fn test_huge_versions_do_not_overflow() {
        assert_eq!(convert_version_name("184467440737095516.1.1"), None);
        assert_eq!(convert_version_name("1844674407370955161"), None);
        assert_eq!(
            check_site_version(&info(None, Some("99999999999999999.1"))),
            VersionCheck::Invalid
        );
        assert_eq!(
            check_site_version(&info(None, Some("3.99999999999999999"))),
            VersionCheck::Invalid
        );
        assert_eq!(version_number("4.5.18446744073709551615"), u64::MAX);
        assert!(!is_version_greater_equal_than(2024100700, &["4.5.18446744073709551615"]));
    }
}

//! Logical platform names and their archive file keys.

/// Archive key used in artifact file names, e.g. `firefox-56.0a1.en-US.linux-x86_64.json`.
pub fn archive_key(platform: &str) -> &str {
    match platform {
        "linux32" => "linux-i686",
        "linux64" => "linux-x86_64",
        "mac" => "mac",
        "win32" => "win32",
        "win64" => "win64",
        other => other,
    }
}

/// File name suffix selecting a platform's entries in the listing.
pub fn match_suffix(platform: &str, ext: &str) -> String {
    format!(".{}.{}", archive_key(platform), ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_platforms() {
        assert_eq!(archive_key("linux64"), "linux-x86_64");
        assert_eq!(archive_key("linux32"), "linux-i686");
        assert_eq!(archive_key("win64"), "win64");
    }

    #[test]
    fn test_unknown_platform_passes_through() {
        assert_eq!(archive_key("android-arm"), "android-arm");
    }

    #[test]
    fn test_match_suffix() {
        assert_eq!(match_suffix("linux64", "json"), ".linux-x86_64.json");
    }
}

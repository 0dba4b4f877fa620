//! Netscape cookie file validation.

use std::io::{BufRead, BufReader};
use std::path::Path;

const ACCEPTED_HEADERS: &[&str] = &["# Netscape HTTP Cookie File", "# HTTP Cookie File"];

/// True when `path` exists and its first line is a Netscape cookie header.
///
/// A missing or malformed file just disables authenticated requests.
pub fn validate_cookies_file(path: &Path) -> bool {
    let Ok(file) = std::fs::File::open(path) else {
        return false;
    };
    let mut first_line = String::new();
    if BufReader::new(file).read_line(&mut first_line).is_err() {
        return false;
    }
    let first_line = first_line.trim_start_matches('\u{feff}');
    ACCEPTED_HEADERS.iter().any(|h| first_line.starts_with(h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netscape_header_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        std::fs::write(&path, "# Netscape HTTP Cookie File\n.youtube.com\tTRUE\t/\n").unwrap();
        assert!(validate_cookies_file(&path));

        std::fs::write(&path, "# HTTP Cookie File\n").unwrap();
        assert!(validate_cookies_file(&path));
    }

    #[test]
    fn test_other_content_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        std::fs::write(&path, "{\"cookies\": []}\n").unwrap();
        assert!(!validate_cookies_file(&path));
    }

    #[test]
    fn test_missing_file_rejected() {
        assert!(!validate_cookies_file(Path::new("/nonexistent/cookies.txt")));
    }
}

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Origin server label, e.g. `s1` in `https://s1.origin-cluster/...`
static SERVER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(s\d+)\.origin-cluster").expect("server pattern is valid")
});

/// Everything after the origin host
static PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://s\d+\.origin-cluster/(.*)").expect("path pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecomposeError {
    #[error("Unparseable video URL: {0}")]
    Unparseable(&'static str),
}

/// Parts of an origin video URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoUrl<'a> {
    pub server: &'a str,
    pub path: &'a str,
}

/// Split `scheme://s<N>.origin-cluster/<path>` into its server label and path.
pub fn decompose(url: &str) -> Result<VideoUrl<'_>, DecomposeError> {
    let server = SERVER_PATTERN
        .captures(url)
        .and_then(|c| c.get(1))
        .ok_or(DecomposeError::Unparseable("origin server not found"))?
        .as_str();

    let path = PATH_PATTERN
        .captures(url)
        .and_then(|c| c.get(1))
        .ok_or(DecomposeError::Unparseable("video path not found"))?
        .as_str();

    Ok(VideoUrl { server, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_url_decomposes() {
        let parts = decompose("https://s3.origin-cluster/video/7/a.m3u8").unwrap();
        assert_eq!(parts.server, "s3");
        assert_eq!(parts.path, "video/7/a.m3u8");
    }

    #[test]
    fn http_url_with_multi_digit_server() {
        let parts = decompose("http://s128.origin-cluster/video/123/xcg2djHckad.m3u8").unwrap();
        assert_eq!(parts.server, "s128");
        assert_eq!(parts.path, "video/123/xcg2djHckad.m3u8");
    }

    #[test]
    fn garbage_is_unparseable() {
        assert!(matches!(
            decompose("not-a-url"),
            Err(DecomposeError::Unparseable(_))
        ));
    }

    #[test]
    fn wrong_host_is_unparseable() {
        assert_eq!(
            decompose("https://cdn.example.com/video/1.m3u8"),
            Err(DecomposeError::Unparseable("origin server not found"))
        );
    }

    #[test]
    fn missing_path_separator_is_unparseable() {
        assert_eq!(
            decompose("https://s1.origin-cluster"),
            Err(DecomposeError::Unparseable("video path not found"))
        );
    }

    #[test]
    fn empty_path_is_accepted() {
        let parts = decompose("https://s1.origin-cluster/").unwrap();
        assert_eq!(parts.server, "s1");
        assert_eq!(parts.path, "");
    }
}

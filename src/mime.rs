//! Content types for LOAD requests, guessed from the URL file extension.

use once_cell::sync::Lazy;
use std::collections::HashMap;

static CONTENT_TYPES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("aac",  "audio/mp4"),
        ("mp3",  "audio/mp3"),
        ("wav",  "audio/wav"),
        ("flac", "audio/flac"),
        ("ogg",  "audio/ogg"),
        ("webm", "video/webm"),
        ("mp4",  "video/mp4"),
        ("m4a",  "audio/mp4"),
        ("m4s",  "video/mp4"),
        ("mpd",  "application/dash+xml"),
        ("m3u8", "application/x-mpegurl"),
        ("ts",   "video/MP2T"),
        ("gif",  "image/gif"),
        ("bmp",  "image/bmp"),
        ("jpg",  "image/jpg"),
        ("jpeg", "image/jpeg"),
        ("png",  "image/png"),
        ("webp", "image/webp"),
    ])
});

/// Adaptive streaming manifests: DASH and HLS.
const STREAMING_EXTENSIONS: &[&str] = &["mpd", "m3u8"];

/// Lower case extension of the last path segment, ignoring any query or fragment.
pub fn extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = segment.rsplit_once('.')?;

    if ext.is_empty() {
        return None;
    }

    Some(ext.to_ascii_lowercase())
}

/// MIME type for `url`, or "" when the extension is not known.
pub fn content_type(url: &str) -> &'static str {
    extension(url)
        .and_then(|ext| CONTENT_TYPES.get(ext.as_str()).copied())
        .unwrap_or("")
}

pub fn is_streaming_manifest(url: &str) -> bool {
    extension(url).is_some_and(|ext| STREAMING_EXTENSIONS.contains(&ext.as_str()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_types() {
        assert_eq!(content_type("http://10.0.0.2:8080/music/a.MP3"), "audio/mp3");
        assert_eq!(content_type("http://h/v/clip.mp4?token=abc"), "video/mp4");
        assert_eq!(content_type("https://h/live/master.m3u8#t=10"), "application/x-mpegurl");
    }

    #[test]
    fn unknown_types_are_empty() {
        assert_eq!(content_type("http://h/file.xyz"), "");
        assert_eq!(content_type("http://h.example.com/stream"), "");
        assert_eq!(content_type("http://h/dir.d/noext"), "");
        assert_eq!(content_type("http://h/trailing."), "");
    }

    #[test]
    fn streaming_manifests() {
        assert!(is_streaming_manifest("http://h/a/manifest.mpd"));
        assert!(is_streaming_manifest("http://h/a/INDEX.M3U8?x=1"));
        assert!(!is_streaming_manifest("http://h/a/video.mp4"));
        assert!(!is_streaming_manifest(""));
    }
}

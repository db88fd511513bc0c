use grovegrab::parser::classify_url;
use grovegrab::parser::errors::ParseError;
use grovegrab::parser::models::UrlKind;

#[test]
fn test_classify_track_url() {
    let parsed = classify_url("https://open.spotify.com/track/abc123").unwrap();
    assert_eq!(parsed.kind, UrlKind::Track);
    assert_eq!(parsed.id, "abc123");
    assert_eq!(parsed.url, "https://open.spotify.com/track/abc123");
}

#[test]
fn test_classify_collections_and_artist() {
    let cases = [
        (
            "https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=abcdef",
            UrlKind::Playlist,
            "37i9dQZF1DXcBWIGoYBM5M",
        ),
        (
            "https://open.spotify.com/album/4aawyAB9vmqN3uQ7FjRGTy",
            UrlKind::Album,
            "4aawyAB9vmqN3uQ7FjRGTy",
        ),
        (
            "https://open.spotify.com/intl-de/artist/0TnOYISbd1XYRBk9myaseg",
            UrlKind::Artist,
            "0TnOYISbd1XYRBk9myaseg",
        ),
    ];

    for (url, kind, id) in cases {
        let parsed = classify_url(url).unwrap();
        assert_eq!(parsed.kind, kind, "{}", url);
        assert_eq!(parsed.id, id, "{}", url);
    }
}

#[test]
fn test_surrounding_whitespace_is_ignored() {
    let parsed = classify_url("  https://open.spotify.com/track/abc123\n").unwrap();
    assert_eq!(parsed.url, "https://open.spotify.com/track/abc123");
}

#[test]
fn test_invalid_urls_are_rejected() {
    for url in [
        "",
        "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        "https://open.spotify.com/show/abc123",
        "https://open.spotify.com/track/",
        "spotify.com",
    ] {
        assert_eq!(classify_url(url), Err(ParseError::InvalidUrl), "{}", url);
    }

    assert_eq!(
        ParseError::InvalidUrl.to_string(),
        "Invalid Spotify URL. Please provide a valid track, playlist, album, or artist URL."
    );
}

#[test]
fn test_fallback_folder_name() {
    let parsed = classify_url("https://open.spotify.com/album/4aawyAB9vmqN3uQ7FjRGTy").unwrap();
    assert!(parsed.kind.is_collection());
    assert_eq!(parsed.fallback_name(), "album_4aawyAB9");

    let track = classify_url("https://open.spotify.com/track/abc123").unwrap();
    assert!(!track.kind.is_collection());
}

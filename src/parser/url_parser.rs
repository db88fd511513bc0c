use super::errors::ParseError;
use super::models::{ParsedUrl, UrlKind};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // 四种链接互斥，按顺序匹配
    static ref URL_PATTERNS: Vec<(Regex, UrlKind)> = vec![
        (Regex::new(r"spotify\.com/(?:intl-[a-zA-Z-]+/)?track/([a-zA-Z0-9]+)").unwrap(), UrlKind::Track),
        (Regex::new(r"spotify\.com/(?:intl-[a-zA-Z-]+/)?playlist/([a-zA-Z0-9]+)").unwrap(), UrlKind::Playlist),
        (Regex::new(r"spotify\.com/(?:intl-[a-zA-Z-]+/)?album/([a-zA-Z0-9]+)").unwrap(), UrlKind::Album),
        (Regex::new(r"spotify\.com/(?:intl-[a-zA-Z-]+/)?artist/([a-zA-Z0-9]+)").unwrap(), UrlKind::Artist),
    ];
}

/// 识别链接类型并提取 ID，没有副作用
pub fn classify_url(input: &str) -> Result<ParsedUrl, ParseError> {
    let url = input.trim();

    for (pattern, kind) in URL_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(url) {
            return Ok(ParsedUrl {
                kind: *kind,
                id: caps[1].to_string(),
                url: url.to_string(),
            });
        }
    }

    Err(ParseError::InvalidUrl)
}

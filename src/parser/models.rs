use serde::{Deserialize, Serialize};
use std::fmt;

// 链接类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlKind {
    Track,    // 单曲
    Playlist, // 歌单
    Album,    // 专辑
    Artist,   // 艺人
}

impl UrlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Playlist => "playlist",
            Self::Album => "album",
            Self::Artist => "artist",
        }
    }

    // 歌单和专辑可以查询到名称，用来创建子目录
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Playlist | Self::Album)
    }
}

impl fmt::Display for UrlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub kind: UrlKind,
    pub id: String,
    pub url: String,
}

impl ParsedUrl {
    /// 查询不到名称时使用的目录名，如 `album_4aawyAB9`
    pub fn fallback_name(&self) -> String {
        let short_id: String = self.id.chars().take(8).collect();
        format!("{}_{}", self.kind, short_id)
    }
}

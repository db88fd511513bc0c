use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // 终端颜色、光标控制序列
    static ref ANSI_ESCAPE: Regex = Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap();
}

/// 把子进程的原始字节流切成逻辑行。
///
/// `\n` 和 `\r` 都算行结束符：下载器用 `\r` 原地刷新进度行。
/// 按字节切分后再解码，多字节字符跨越两次 `push` 时也不会被截断。
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    // 输入一段字节，返回其中已经完整的行（空行会被丢弃）
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                if let Some(line) = Self::decode(&self.pending) {
                    lines.push(line);
                }
                self.pending.clear();
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    // 流结束时取出剩余的半行
    pub fn finish(&mut self) -> Option<String> {
        let line = Self::decode(&self.pending);
        self.pending.clear();
        line
    }

    fn decode(bytes: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(bytes);
        let text = ANSI_ESCAPE.replace_all(&text, "");
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

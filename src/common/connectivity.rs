use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// 启动下载前的联网检查
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// 尝试建立一个 TCP 连接，默认连到公共 DNS 的 53 端口
#[derive(Debug, Clone)]
pub struct TcpProbe {
    target: SocketAddr,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(target: SocketAddr, timeout: Duration) -> Self {
        Self { target, timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(SocketAddr::from(([8, 8, 8, 8], 53)), Duration::from_secs(3))
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_online(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(self.target)).await {
            Ok(Ok(_)) => {
                debug!("网络可用: {}", self.target);
                true
            }
            Ok(Err(e)) => {
                warn!("无法连接 {}: {}", self.target, e);
                false
            }
            Err(_) => {
                warn!("连接 {} 超时 ({:?})", self.target, self.timeout);
                false
            }
        }
    }
}

//! 网络连通性信号 - 基础设施层

use tokio::sync::watch;
use tracing::info;

/// 在线状态来源
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    /// 订阅在线状态变化
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// 由宿主程序驱动的在线状态
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state }
    }

    /// 更新在线状态，只有真正变化时才通知订阅者
    pub fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!("🌐 网络状态变化: {}", if online { "在线" } else { "离线" });
        }
    }
}

impl Connectivity for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

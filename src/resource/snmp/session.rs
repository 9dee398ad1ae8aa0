//! 设备会话池
//!
//! 一个资源实例持有的有序会话集合，下标即会话身份。句柄的读写都在同一把
//! 池级互斥锁内完成，锁内只做指针级操作，网络 I/O 一律在锁外进行。

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::snmp::{ConnectParams, SnmpClient};

/// 单个设备会话
pub struct DeviceSession {
    pub params: ConnectParams,
    handle: Option<Arc<dyn SnmpClient>>,
}

impl DeviceSession {
    pub fn new(params: ConnectParams) -> Self {
        Self {
            params,
            handle: None,
        }
    }
}

/// 会话池
#[derive(Default)]
pub struct SessionPool {
    sessions: Mutex<Vec<DeviceSession>>,
}

impl SessionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用新的目标列表替换全部会话，返回被替换下来的句柄（由调用方关闭）
    pub async fn reset(&self, params: Vec<ConnectParams>) -> Vec<Arc<dyn SnmpClient>> {
        let mut sessions = self.sessions.lock().await;
        let old = sessions.drain(..).filter_map(|s| s.handle).collect();
        *sessions = params.into_iter().map(DeviceSession::new).collect();
        old
    }

    /// 所有会话的连接参数快照
    pub async fn targets(&self) -> Vec<ConnectParams> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|s| s.params.clone())
            .collect()
    }

    /// 获取第 i 个会话的句柄
    pub async fn client(&self, i: usize) -> Option<Arc<dyn SnmpClient>> {
        self.sessions
            .lock()
            .await
            .get(i)
            .and_then(|s| s.handle.clone())
    }

    /// 写入第 i 个会话的句柄，返回旧句柄
    pub async fn set_client(
        &self,
        i: usize,
        client: Option<Arc<dyn SnmpClient>>,
    ) -> Option<Arc<dyn SnmpClient>> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(i) {
            Some(session) => std::mem::replace(&mut session.handle, client),
            None => client,
        }
    }

    /// 清空所有会话，返回其中的句柄
    pub async fn clear(&self) -> Vec<Arc<dyn SnmpClient>> {
        self.reset(Vec::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::snmp::mock::{MockClient, MockDevice, params};

    fn mock_client() -> Arc<dyn SnmpClient> {
        Arc::new(MockClient::new(MockDevice::new()))
    }

    #[tokio::test]
    async fn test_handles_indexed_by_position() {
        let pool = SessionPool::new();
        let old = pool.reset(vec![params("a"), params("b")]).await;
        assert!(old.is_empty());
        let targets: Vec<String> = pool.targets().await.into_iter().map(|p| p.target).collect();
        assert_eq!(targets, vec!["a", "b"]);
        assert!(pool.client(0).await.is_none());

        assert!(pool.set_client(1, Some(mock_client())).await.is_none());
        assert!(pool.client(0).await.is_none());
        assert!(pool.client(1).await.is_some());

        // 越界写入不会落到任何会话上，原样交还调用方
        assert!(pool.set_client(2, Some(mock_client())).await.is_some());
        assert!(pool.client(2).await.is_none());
    }

    #[tokio::test]
    async fn test_set_client_returns_replaced_handle() {
        let pool = SessionPool::new();
        pool.reset(vec![params("a")]).await;
        pool.set_client(0, Some(mock_client())).await;

        let replaced = pool.set_client(0, Some(mock_client())).await;
        assert!(replaced.is_some());
        assert!(pool.client(0).await.is_some());
    }

    #[tokio::test]
    async fn test_reset_and_clear_hand_back_handles() {
        let pool = SessionPool::new();
        pool.reset(vec![params("a"), params("b")]).await;
        pool.set_client(0, Some(mock_client())).await;

        let old = pool.reset(vec![params("c")]).await;
        assert_eq!(old.len(), 1);
        assert!(pool.client(0).await.is_none());

        pool.set_client(0, Some(mock_client())).await;
        assert_eq!(pool.clear().await.len(), 1);
        assert!(pool.targets().await.is_empty());
    }
}

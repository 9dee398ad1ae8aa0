use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::codec::{ERROR_NO_SUCH_NAME, Message, Pdu, PduType, SnmpValue, VarBind, Version, frame_length};
use super::oid::Oid;
use crate::error::{AppError, Result};

/// sysUpTime.0，连接时用来确认对端存活
pub const SYS_UP_TIME: &str = ".1.3.6.1.2.1.1.3.0";

/// 单次遍历最多返回的行数
const MAX_WALK_ROWS: usize = 10_000;

/// TCP 单个报文的上限
const MAX_FRAME_LEN: usize = 1 << 20;

/// 传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Udp => write!(f, "udp"),
            Transport::Tcp => write!(f, "tcp"),
        }
    }
}

/// 建立会话所需的参数
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub target: String,
    pub port: u16,
    pub transport: Transport,
    pub community: String,
    pub version: Version,
    pub timeout: Duration,
}

impl ConnectParams {
    /// 形如 `udp://10.0.0.1:161` 的地址描述，用于日志
    pub fn label(&self) -> String {
        format!("{}://{}:{}", self.transport, self.target, self.port)
    }
}

/// SNMP 客户端：会话持有的连接句柄
#[async_trait]
pub trait SnmpClient: Send + Sync {
    /// 单值读取
    async fn get(&self, oids: &[Oid]) -> Result<Vec<VarBind>>;

    /// 遍历子树，逐行追加到 rows；调用方超时取消后 rows 中保留已读到的部分
    async fn walk_into(&self, root: &Oid, rows: &mut Vec<VarBind>) -> Result<()>;

    /// 遍历子树
    async fn walk(&self, root: &Oid) -> Result<Vec<VarBind>> {
        let mut rows = Vec::new();
        self.walk_into(root, &mut rows).await?;
        Ok(rows)
    }

    /// 关闭连接，之后的请求全部失败
    async fn close(&self);
}

/// 连接器：根据参数建立新的客户端
#[async_trait]
pub trait SnmpConnector: Send + Sync {
    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn SnmpClient>>;
}

enum Wire {
    Udp(UdpSocket),
    Tcp(TcpStream),
    /// TCP 请求中途失败或被取消，流中可能残留旧响应，下次请求前重连
    Broken,
    Closed,
}

/// 基于 UDP / TCP 的 SNMP v1/v2c 客户端
pub struct NetSnmpClient {
    label: String,
    peer: SocketAddr,
    community: String,
    version: Version,
    timeout: Duration,
    request_id: AtomicI32,
    wire: Mutex<Wire>,
}

impl NetSnmpClient {
    fn next_request_id(&self) -> i32 {
        // 保持为正数，部分设备不接受负的 request-id
        self.request_id.fetch_add(1, Ordering::Relaxed) & 0x7fff_ffff
    }

    /// 发送一个请求并等待匹配的响应，整体受超时约束
    async fn exchange(&self, kind: PduType, oids: &[Oid]) -> Result<Pdu> {
        let request_id = self.next_request_id();
        let packet = Message::request(self.version, &self.community, kind, request_id, oids).encode();

        match tokio::time::timeout(self.timeout, self.exchange_once(request_id, &packet)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Read(format!(
                "{} 请求超时 ({:?})",
                self.label, self.timeout
            ))),
        }
    }

    async fn exchange_once(&self, request_id: i32, packet: &[u8]) -> Result<Pdu> {
        let mut wire = self.wire.lock().await;
        if let Wire::Udp(socket) = &*wire {
            return self.udp_round_trip(socket, request_id, packet).await;
        }

        // 请求期间流不在 wire 中；超时取消或出错时不放回，保证不会读到上一次请求的响应
        let mut stream = match std::mem::replace(&mut *wire, Wire::Broken) {
            Wire::Tcp(stream) => stream,
            Wire::Broken => {
                debug!("{} 重新建立 TCP 连接", self.label);
                TcpStream::connect(self.peer)
                    .await
                    .map_err(|e| AppError::Read(format!("{} 重连失败: {}", self.label, e)))?
            }
            other => {
                *wire = other;
                return Err(AppError::Read(format!("{} 连接已关闭", self.label)));
            }
        };

        let pdu = self.tcp_round_trip(&mut stream, request_id, packet).await?;
        *wire = Wire::Tcp(stream);
        Ok(pdu)
    }

    async fn udp_round_trip(&self, socket: &UdpSocket, request_id: i32, packet: &[u8]) -> Result<Pdu> {
        socket.send(packet).await?;
        let mut buf = vec![0u8; 65535];
        loop {
            let n = socket.recv(&mut buf).await?;
            match Message::decode(&buf[..n]) {
                Ok(msg) if msg.pdu.request_id == request_id => return Ok(msg.pdu),
                Ok(msg) => {
                    debug!(
                        "{} 丢弃过期响应: request_id={} (期望 {})",
                        self.label, msg.pdu.request_id, request_id
                    );
                }
                Err(e) => warn!("{} 丢弃无法解析的报文: {}", self.label, e),
            }
        }
    }

    async fn tcp_round_trip(
        &self,
        stream: &mut TcpStream,
        request_id: i32,
        packet: &[u8],
    ) -> Result<Pdu> {
        stream.write_all(packet).await?;
        let frame = read_frame(stream).await?;
        let msg = Message::decode(&frame)?;
        if msg.pdu.request_id != request_id {
            return Err(AppError::Codec(format!(
                "{} request_id 不匹配: {} != {}",
                self.label, msg.pdu.request_id, request_id
            )));
        }
        Ok(msg.pdu)
    }
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut frame = vec![0u8; 2];
    stream.read_exact(&mut frame).await?;
    if frame[1] & 0x80 != 0 {
        let n = (frame[1] & 0x7f) as usize;
        if n == 0 || n > 4 {
            return Err(AppError::Codec(format!("不支持的长度编码: 0x{:02x}", frame[1])));
        }
        let mut ext = vec![0u8; n];
        stream.read_exact(&mut ext).await?;
        frame.extend_from_slice(&ext);
    }
    let total = frame_length(&frame)
        .ok_or_else(|| AppError::Codec("报文头不完整".to_string()))?;
    if total > MAX_FRAME_LEN {
        return Err(AppError::Codec(format!("报文过大: {} 字节", total)));
    }
    let mut rest = vec![0u8; total - frame.len()];
    stream.read_exact(&mut rest).await?;
    frame.extend_from_slice(&rest);
    Ok(frame)
}

#[async_trait]
impl SnmpClient for NetSnmpClient {
    async fn get(&self, oids: &[Oid]) -> Result<Vec<VarBind>> {
        let pdu = self.exchange(PduType::GetRequest, oids).await?;
        if pdu.error_status != 0 {
            return Err(AppError::Read(format!(
                "{} 返回错误: status={} index={}",
                self.label, pdu.error_status, pdu.error_index
            )));
        }
        Ok(pdu.varbinds)
    }

    async fn walk_into(&self, root: &Oid, rows: &mut Vec<VarBind>) -> Result<()> {
        let mut cursor = root.clone();

        for _ in 0..MAX_WALK_ROWS {
            let pdu = self
                .exchange(PduType::GetNextRequest, std::slice::from_ref(&cursor))
                .await?;
            if pdu.error_status == ERROR_NO_SUCH_NAME {
                break;
            }
            if pdu.error_status != 0 {
                return Err(AppError::Read(format!(
                    "{} 遍历 {} 返回错误: status={}",
                    self.label, root, pdu.error_status
                )));
            }
            let Some(vb) = pdu.varbinds.into_iter().next() else {
                break;
            };
            if vb.value == SnmpValue::EndOfMibView || !vb.oid.is_child_of(root) {
                break;
            }
            if vb.oid <= cursor {
                warn!("{} 遍历 {} 时 OID 未递增: {}", self.label, root, vb.oid);
                break;
            }
            cursor = vb.oid.clone();
            rows.push(vb);
        }

        Ok(())
    }

    async fn close(&self) {
        *self.wire.lock().await = Wire::Closed;
        debug!("{} 连接已释放", self.label);
    }
}

/// 默认连接器：打开 UDP / TCP 通道并读取 sysUpTime 确认对端在线
#[derive(Debug, Default, Clone)]
pub struct NetConnector;

impl NetConnector {
    async fn open(params: &ConnectParams) -> Result<(Wire, SocketAddr)> {
        let label = params.label();
        let addr = lookup_host((params.target.as_str(), params.port))
            .await
            .map_err(|e| AppError::connect(&label, e))?
            .next()
            .ok_or_else(|| AppError::connect(&label, "无法解析地址"))?;

        let wire = match params.transport {
            Transport::Udp => {
                let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                let socket = UdpSocket::bind(bind)
                    .await
                    .map_err(|e| AppError::connect(&label, e))?;
                socket
                    .connect(addr)
                    .await
                    .map_err(|e| AppError::connect(&label, e))?;
                Wire::Udp(socket)
            }
            Transport::Tcp => Wire::Tcp(
                TcpStream::connect(addr)
                    .await
                    .map_err(|e| AppError::connect(&label, e))?,
            ),
        };
        Ok((wire, addr))
    }
}

#[async_trait]
impl SnmpConnector for NetConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn SnmpClient>> {
        let label = params.label();
        let (wire, peer) = tokio::time::timeout(params.timeout, Self::open(params))
            .await
            .map_err(|_| AppError::connect(&label, "建立连接超时"))??;

        let client = NetSnmpClient {
            label: label.clone(),
            peer,
            community: params.community.clone(),
            version: params.version,
            timeout: params.timeout,
            request_id: AtomicI32::new(1),
            wire: Mutex::new(wire),
        };

        let uptime: Oid = SYS_UP_TIME.parse()?;
        if let Err(e) = client.get(&[uptime]).await {
            client.close().await;
            return Err(AppError::connect(&label, e));
        }

        debug!("{} 连接成功", label);
        Ok(Arc::new(client))
    }
}

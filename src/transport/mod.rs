//! 传输层
//!
//! 所有变体共用同一契约：启动/停止、缓冲出站信封并在 `flush` 时批量写出、
//! 每帧取出一次入站帧。物理通道只负责字节如何跨越边界。
//!
//! | 变体 | 通道 |
//! |---|---|
//! | `LoopbackTransport` | 进程内通道，测试与嵌入式控制端 |
//! | `ScriptTransport` | 内嵌 QuickJS 脚本上下文 |
//! | `SocketTransport` | TCP 服务端，按行分隔的 JSON |
//! | `RelayTransport` | 连接外部中继的 TCP 客户端，断线重连 |

pub mod loopback;
pub mod queue;
pub mod relay;
pub mod script;
pub mod socket;
pub mod writer;

pub use loopback::{ControlEndpoint, LoopbackTransport};
pub use queue::{InboundQueue, InboundSender, OutboundQueue};
pub use relay::RelayTransport;
pub use script::ScriptTransport;
pub use socket::SocketTransport;
pub use writer::{FrameWriter, Offer};

use crate::bridge::Envelope;
use crate::config::{BridgeConfig, TransportConfig};
use crate::core::TransportResult;

/// 桥接层与控制端之间的物理通道
pub trait BridgeTransport {
    fn name(&self) -> &'static str;

    fn start(&mut self) -> TransportResult<()>;

    fn stop(&mut self);

    fn is_started(&self) -> bool;

    /// 缓冲一个出站信封；通道未就绪时保留到下一次 `flush`
    fn enqueue_outbound(&mut self, envelope: Envelope);

    /// 写出缓冲的信封，返回实际送出的数量。未启动时返回 0 并保留缓冲。
    fn flush(&mut self) -> TransportResult<usize>;

    /// 取出自上次调用以来到达的原始帧，按到达顺序排列
    fn drain_inbound(&mut self) -> Vec<String>;

    /// 尚未送出的出站信封数量
    fn pending_outbound(&self) -> usize;
}

/// 按配置构建传输实例
pub fn build(config: &BridgeConfig) -> TransportResult<Box<dyn BridgeTransport>> {
    let capacity = config.max_outbound;
    let batch = config.batch_outbound;
    let transport: Box<dyn BridgeTransport> = match &config.transport {
        TransportConfig::Loopback => Box::new(LoopbackTransport::new(capacity, batch)),
        TransportConfig::Script { bootstrap } => {
            let mut script = ScriptTransport::new(capacity, batch)?;
            if let Some(path) = bootstrap {
                script = script.with_bootstrap_file(path);
            }
            Box::new(script)
        }
        TransportConfig::Socket {
            bind_address,
            port,
            max_connections,
        } => Box::new(SocketTransport::new(
            format!("{}:{}", bind_address, port),
            *max_connections,
            capacity,
            batch,
        )),
        TransportConfig::Relay {
            address,
            reconnect_ms,
        } => Box::new(RelayTransport::new(address.clone(), *reconnect_ms, capacity, batch)),
    };
    tracing::info!(target: "transport", "Using {} transport", transport.name());
    Ok(transport)
}

//! 音频核心模块
//!
//! 包含：
//! - Format: 流规格和 PCM 编解码
//! - Fifo: 有界字节缓冲
//! - Silence: 静音填充
//! - Rate: 协议采样率表
//! - Stats: 通道统计
//! - Channel: 单向音频通道

pub mod channel;
pub mod fifo;
pub mod format;
pub mod rate;
pub mod silence;
pub mod stats;

pub use channel::{AudioChannel, ChannelConfig};
pub use fifo::ByteFifo;
pub use format::{SampleFormat, StreamSpec};
pub use rate::SampleRateTable;
pub use silence::SilenceFiller;
pub use stats::{ChannelReport, ChannelStats};

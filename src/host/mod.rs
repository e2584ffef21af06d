//! 宿主音频子系统边界
//!
//! 宿主提供 open / pause / close 原语和拉取式回调：
//! - 采集方向：宿主在实时线程上把录到的字节交给回调
//! - 播放方向：宿主在实时线程上向回调索取要播放的字节
//!
//! 关闭即 drop：HostStream 被释放时宿主必须停止回调并释放设备。

pub mod virtual_host;

#[cfg(feature = "host-cpal")]
pub mod cpal_host;

use std::fmt;

use thiserror::Error;

use crate::audio::StreamSpec;

pub use virtual_host::{VirtualDevice, VirtualHost};

#[cfg(feature = "host-cpal")]
pub use cpal_host::CpalHost;

/// 流方向
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 采集（麦克风）
    Capture,
    /// 播放（扬声器）
    Playback,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture => f.write_str("Capture"),
            Self::Playback => f.write_str("Playback"),
        }
    }
}

/// 实时回调
///
/// 在宿主音频线程上调用，只能做有界的非阻塞工作
pub enum StreamCallback {
    Capture(Box<dyn FnMut(&[u8]) + Send + 'static>),
    Playback(Box<dyn FnMut(&mut [u8]) + Send + 'static>),
}

impl StreamCallback {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Capture(_) => Direction::Capture,
            Self::Playback(_) => Direction::Playback,
        }
    }
}

/// 宿主设备错误
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{direction} device not found: {name}")]
    NotFound { direction: Direction, name: String },

    #[error("failed to open {direction} device {name}: {reason}")]
    OpenFailed {
        direction: Direction,
        name: String,
        reason: String,
    },

    #[error("unsupported stream format: {0}")]
    UnsupportedFormat(StreamSpec),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("failed to enumerate devices: {0}")]
    Enumerate(String),
}

/// 已打开的宿主音频流
pub trait HostStream: Send {
    /// 宿主实际协商出的规格
    fn spec(&self) -> StreamSpec;

    /// 暂停 / 恢复回调
    fn set_paused(&mut self, paused: bool) -> Result<(), DeviceError>;
}

/// 宿主音频子系统
pub trait AudioHost: Send + Sync {
    /// 打开设备
    ///
    /// `desired` 只是请求，实际规格以返回流的 `spec()` 为准。
    /// 流创建后处于暂停状态，由调用方决定何时开始。
    fn open_stream(
        &self,
        device_name: &str,
        desired: &StreamSpec,
        callback: StreamCallback,
    ) -> Result<Box<dyn HostStream>, DeviceError>;

    /// 列出指定方向的设备名
    fn device_names(&self, direction: Direction) -> Result<Vec<String>, DeviceError>;
}

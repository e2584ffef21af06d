//! 等时传输处理
//!
//! 总线每个等时槽位调用一次，每个方向各一次。
//! 不变量：绝不阻塞，传输长度总是被完整满足：
//! - IN（麦克风）：真实数据不足的部分补静音
//! - OUT（扬声器）：超出剩余空间的部分直接丢弃

use crate::audio::{AudioChannel, SilenceFiller};
use crate::bridge::BridgeConfig;

/// 单次传输结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferStatus {
    /// 传输长度（总是等于请求长度）
    pub length: usize,
    /// 真实音频字节数
    pub audio_bytes: usize,
}

impl TransferStatus {
    /// IN 方向补的静音 / OUT 方向丢弃的字节
    pub fn shortfall(&self) -> usize {
        self.length - self.audio_bytes
    }
}

/// 等时传输处理器
#[derive(Clone, Debug)]
pub struct BusTransferHandler {
    max_packet: usize,
    low_buffer_guard: bool,
}

impl BusTransferHandler {
    pub fn new(max_packet: usize, low_buffer_guard: bool) -> Self {
        Self {
            max_packet,
            low_buffer_guard,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.channel.max_packet, config.low_buffer_guard)
    }

    /// 麦克风数据：从采集 FIFO 取数据填满整个 payload
    pub fn handle_in(&self, capture: &AudioChannel, payload: &mut [u8]) -> TransferStatus {
        let stats = capture.stats();
        stats.record_transfer();

        let length = payload.len();
        let mut audio_bytes = 0;

        if capture.is_open() {
            let guarded = self.low_buffer_guard && capture.available() < self.max_packet;
            if !guarded {
                audio_bytes = capture.pop(payload);
            }
        }

        // 不论有没有数据都要填满整个包，短包会被上游当作错误
        let padded = SilenceFiller::pad_from(payload, audio_bytes);
        if padded > 0 {
            stats.record_underrun(padded);
            log::trace!("Capture underrun: {}/{} bytes of silence", padded, length);
        }

        TransferStatus {
            length,
            audio_bytes,
        }
    }

    /// 扬声器数据：把 payload 写入播放 FIFO，放不下的丢弃
    pub fn handle_out(&self, playback: &AudioChannel, payload: &[u8]) -> TransferStatus {
        playback.stats().record_transfer();

        let audio_bytes = if playback.is_open() {
            playback.push(payload)
        } else {
            0
        };

        TransferStatus {
            length: payload.len(),
            audio_bytes,
        }
    }
}

impl Default for BusTransferHandler {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

//! 音频桥
//!
//! 持有一对通道（采集 + 播放）、共享采样率和 AGC 标志。
//!
//! 重新配置规则：
//! - 采样率变化：两个通道都重开
//! - 仅设备名变化：只重开对应通道
//! - 都没变：通道原样运行（不暂停、不清缓冲）

pub mod bindings;

use std::sync::Arc;

use thiserror::Error;

use crate::audio::{AudioChannel, ChannelConfig, SampleRateTable, StreamSpec};
use crate::host::{AudioHost, DeviceError, Direction};

pub use bindings::{BoundDevices, InputBindings, StaticBindings};

/// 桥配置
#[derive(Clone, Debug, Default)]
pub struct BridgeConfig {
    /// 从哪个输入绑定记录取设备名
    pub controller_index: u8,
    /// 通道配置（两个方向相同）
    pub channel: ChannelConfig,
    /// 采集缓冲不足一个包时，IN 传输整包静音
    pub low_buffer_guard: bool,
}

/// 配置错误
///
/// 都是调用方的协议错误，不会被替换成默认值
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("sample rate index {0} out of range")]
    InvalidSampleRateIndex(u8),

    #[error("no capture device bound to controller {0}")]
    UnboundCapture(u8),

    #[error("no playback device bound to controller {0}")]
    UnboundPlayback(u8),
}

/// 单个通道的重新配置结果
#[derive(Debug)]
pub enum ChannelOutcome {
    /// 未重开
    Unchanged,
    /// 已重开，附带协商出的规格
    Reopened(StreamSpec),
    /// 打开失败，通道保持关闭
    Failed(DeviceError),
}

impl ChannelOutcome {
    pub fn is_reopened(&self) -> bool {
        matches!(self, Self::Reopened(_))
    }
}

/// 一次重新配置的结果
#[derive(Debug)]
pub struct ReconfigureOutcome {
    pub sample_rate: u32,
    pub capture: ChannelOutcome,
    pub playback: ChannelOutcome,
}

/// 音频桥
pub struct AudioBridge {
    host: Arc<dyn AudioHost>,
    bindings: Arc<dyn InputBindings>,
    config: BridgeConfig,
    sample_rate: u32,
    auto_gain_control: bool,
    capture: AudioChannel,
    playback: AudioChannel,
}

impl AudioBridge {
    /// 创建桥，两个通道均未打开
    pub fn new(
        host: Arc<dyn AudioHost>,
        bindings: Arc<dyn InputBindings>,
        config: BridgeConfig,
    ) -> Self {
        let capture = AudioChannel::new(Direction::Capture, config.channel.clone());
        let playback = AudioChannel::new(Direction::Playback, config.channel.clone());
        let sample_rate = SampleRateTable::RATES[SampleRateTable::DEFAULT_INDEX as usize];

        Self {
            host,
            bindings,
            config,
            sample_rate,
            auto_gain_control: false,
            capture,
            playback,
        }
    }

    /// 按协议采样率索引重新配置
    pub fn reconfigure(&mut self, sample_rate_index: u8) -> Result<ReconfigureOutcome, BridgeError> {
        let rate = SampleRateTable::lookup(sample_rate_index)
            .ok_or(BridgeError::InvalidSampleRateIndex(sample_rate_index))?;
        self.reconfigure_at(rate)
    }

    /// 以当前采样率重新配置（设备热插拔后调用）
    pub fn reinit(&mut self) -> Result<ReconfigureOutcome, BridgeError> {
        self.reconfigure_at(self.sample_rate)
    }

    fn reconfigure_at(&mut self, rate: u32) -> Result<ReconfigureOutcome, BridgeError> {
        let index = self.config.controller_index;
        let bound = self.bindings.bound_devices(index);
        let capture_name = bound.capture.ok_or(BridgeError::UnboundCapture(index))?;
        let playback_name = bound.playback.ok_or(BridgeError::UnboundPlayback(index))?;

        let rate_changed = rate != self.sample_rate;
        let host = self.host.as_ref();

        let capture = Self::reconfigure_channel(host, &self.capture, &capture_name, rate, rate_changed);
        let playback = Self::reconfigure_channel(host, &self.playback, &playback_name, rate, rate_changed);

        // 无论通道是否打开成功，都视为已切换到新采样率
        self.sample_rate = rate;

        log::info!("Audio streams configured at {} Hz", rate);

        Ok(ReconfigureOutcome {
            sample_rate: rate,
            capture,
            playback,
        })
    }

    fn reconfigure_channel(
        host: &dyn AudioHost,
        channel: &AudioChannel,
        device_name: &str,
        rate: u32,
        rate_changed: bool,
    ) -> ChannelOutcome {
        let name_changed = channel.device_name().as_deref() != Some(device_name);
        if !name_changed && !rate_changed {
            log::debug!("{} stream will not change", channel.direction());
            return ChannelOutcome::Unchanged;
        }

        match channel.open(host, device_name, rate) {
            Ok(spec) => ChannelOutcome::Reopened(spec),
            Err(e) => ChannelOutcome::Failed(e),
        }
    }

    /// 设置自动增益控制，不影响通道
    pub fn set_auto_gain_control(&mut self, enabled: bool) {
        log::debug!("Auto gain control set to {}", enabled);
        self.auto_gain_control = enabled;
    }

    /// 总线复位：丢弃两个通道的缓冲数据，不关闭宿主流
    pub fn reset(&self) {
        self.capture.clear();
        self.playback.clear();
        log::debug!("Bridge buffers reset");
    }

    /// 关闭两个通道
    pub fn close(&self) {
        self.capture.close();
        self.playback.close();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn auto_gain_control(&self) -> bool {
        self.auto_gain_control
    }

    pub fn capture(&self) -> &AudioChannel {
        &self.capture
    }

    pub fn playback(&self) -> &AudioChannel {
        &self.playback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VirtualHost;

    struct Fixture {
        host: VirtualHost,
        bindings: StaticBindings,
        bridge: AudioBridge,
    }

    fn fixture() -> Fixture {
        let host = VirtualHost::new();
        for name in ["mic0", "mic1"] {
            host.add_device(Direction::Capture, name);
        }
        for name in ["spk0", "spk1"] {
            host.add_device(Direction::Playback, name);
        }
        let bindings = StaticBindings::new();
        bindings.bind(0, BoundDevices::new("mic0", "spk0"));

        let bridge = AudioBridge::new(
            Arc::new(host.clone()),
            Arc::new(bindings.clone()),
            BridgeConfig::default(),
        );
        Fixture {
            host,
            bindings,
            bridge,
        }
    }

    #[test]
    fn test_rate_table_indices() {
        let mut f = fixture();
        for (index, rate) in [8000, 11025, 16000, 22050, 24000].into_iter().enumerate() {
            let outcome = f.bridge.reconfigure(index as u8).unwrap();
            assert_eq!(outcome.sample_rate, rate);
            assert_eq!(f.bridge.sample_rate(), rate);
        }
        assert_eq!(
            f.bridge.reconfigure(5).unwrap_err(),
            BridgeError::InvalidSampleRateIndex(5)
        );
        // 非法请求不改变状态
        assert_eq!(f.bridge.sample_rate(), 24000);
    }

    #[test]
    fn test_first_reconfigure_opens_both() {
        let mut f = fixture();
        assert!(!f.bridge.capture().is_open());

        let outcome = f.bridge.reconfigure(2).unwrap();
        assert!(outcome.capture.is_reopened());
        assert!(outcome.playback.is_reopened());
        assert_eq!(f.bridge.capture().spec().map(|s| s.sample_rate), Some(16000));
        assert_eq!(f.bridge.playback().device_name().as_deref(), Some("spk0"));
    }

    #[test]
    fn test_redundant_reconfigure_is_noop() {
        let mut f = fixture();
        f.bridge.reconfigure(2).unwrap();
        f.bridge.capture().push(&[3u8; 30]);

        let outcome = f.bridge.reconfigure(2).unwrap();
        assert!(matches!(outcome.capture, ChannelOutcome::Unchanged));
        assert!(matches!(outcome.playback, ChannelOutcome::Unchanged));
        assert_eq!(f.host.device(Direction::Capture, "mic0").open_count(), 1);
        assert_eq!(f.host.device(Direction::Playback, "spk0").open_count(), 1);
        // 缓冲未被清空
        assert_eq!(f.bridge.capture().available(), 30);
    }

    #[test]
    fn test_device_change_reopens_only_that_channel() {
        let mut f = fixture();
        f.bridge.reconfigure(2).unwrap();

        f.bindings.set_capture(0, Some("mic1"));
        let outcome = f.bridge.reconfigure(2).unwrap();

        assert!(outcome.capture.is_reopened());
        assert!(matches!(outcome.playback, ChannelOutcome::Unchanged));
        assert_eq!(f.host.device(Direction::Capture, "mic1").open_count(), 1);
        assert!(!f.host.device(Direction::Capture, "mic0").is_open());
        assert_eq!(f.host.device(Direction::Playback, "spk0").open_count(), 1);
        assert_eq!(f.bridge.playback().stats().opens(), 1);
    }

    #[test]
    fn test_rate_change_reopens_both() {
        let mut f = fixture();
        f.bridge.reconfigure(2).unwrap();

        let outcome = f.bridge.reconfigure(4).unwrap();
        assert!(outcome.capture.is_reopened());
        assert!(outcome.playback.is_reopened());
        assert_eq!(f.host.device(Direction::Capture, "mic0").open_count(), 2);
        assert_eq!(f.host.device(Direction::Playback, "spk0").open_count(), 2);
    }

    #[test]
    fn test_unbound_device_rejected() {
        let mut f = fixture();
        f.bindings.set_playback(0, None);

        assert_eq!(
            f.bridge.reconfigure(2).unwrap_err(),
            BridgeError::UnboundPlayback(0)
        );
        // 校验在动通道之前完成
        assert!(!f.bridge.capture().is_open());
    }

    #[test]
    fn test_partial_failure_still_updates_rate() {
        let mut f = fixture();
        f.bridge.reconfigure(2).unwrap();
        f.host.device(Direction::Playback, "spk0").set_fail_open(true);

        let outcome = f.bridge.reconfigure(0).unwrap();
        assert!(outcome.capture.is_reopened());
        assert!(matches!(outcome.playback, ChannelOutcome::Failed(_)));
        assert_eq!(f.bridge.sample_rate(), 8000);
        assert!(!f.bridge.playback().is_open());

        // 失败的通道在下一次重新配置时重试
        f.host.device(Direction::Playback, "spk0").set_fail_open(false);
        let outcome = f.bridge.reinit().unwrap();
        assert!(matches!(outcome.capture, ChannelOutcome::Unchanged));
        assert!(outcome.playback.is_reopened());
    }

    #[test]
    fn test_agc_does_not_touch_channels() {
        let mut f = fixture();
        f.bridge.reconfigure(2).unwrap();
        f.bridge.capture().push(&[1u8; 8]);

        f.bridge.set_auto_gain_control(true);
        assert!(f.bridge.auto_gain_control());
        assert_eq!(f.bridge.capture().available(), 8);
        assert_eq!(f.host.device(Direction::Capture, "mic0").open_count(), 1);
    }

    #[test]
    fn test_reset_keeps_streams() {
        let mut f = fixture();
        f.bridge.reconfigure(2).unwrap();
        f.bridge.capture().push(&[1u8; 48]);
        f.bridge.playback().push(&[1u8; 48]);

        f.bridge.reset();
        assert_eq!(f.bridge.capture().available(), 0);
        assert_eq!(f.bridge.playback().available(), 0);
        assert_eq!(f.bridge.capture().device_name().as_deref(), Some("mic0"));
        assert!(f.host.device(Direction::Playback, "spk0").is_open());
        assert_eq!(f.host.device(Direction::Capture, "mic0").close_count(), 0);
    }
}

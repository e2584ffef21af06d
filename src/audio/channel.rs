//! 单向音频通道
//!
//! 一个通道 = 一个有界 FIFO + 一个宿主音频流 + 当前绑定的设备名。
//!
//! 两把锁：
//! - `state`：宿主流句柄、设备名、协商格式。只有控制线程会拿。
//! - `shared.fifo`：缓冲数据。实时回调线程和总线轮询线程在这里交汇。
//!
//! 关闭流时不持有 FIFO 锁，宿主 join 回调线程时不会互相等待。

use std::sync::Arc;

use parking_lot::Mutex;

use super::fifo::ByteFifo;
use super::format::{SampleFormat, StreamSpec};
use super::silence::SilenceFiller;
use super::stats::ChannelStats;
use crate::host::{AudioHost, DeviceError, Direction, HostStream, StreamCallback};

/// 通道配置
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// FIFO 容量（毫秒，按协商采样率换算成字节）
    pub buffer_ms: u32,
    /// 请求宿主每次回调处理的帧数
    pub callback_samples: u16,
    /// 总线最大包长（字节）
    /// 播放 FIFO 不足一个包时宿主回调输出整段静音
    pub max_packet: usize,
    /// 是否 mlock FIFO 内存
    pub lock_memory: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            buffer_ms: 100,
            callback_samples: 100,
            max_packet: 48,
            lock_memory: false,
        }
    }
}

impl ChannelConfig {
    /// 给定协商格式下的 FIFO 容量，至少一个包
    pub fn fifo_capacity(&self, spec: &StreamSpec) -> usize {
        spec.bytes_for_ms(self.buffer_ms).max(self.max_packet)
    }
}

/// 实时线程和总线线程共享的部分
struct Shared {
    fifo: Mutex<ByteFifo>,
    stats: ChannelStats,
}

impl Shared {
    fn push(&self, data: &[u8]) -> usize {
        let accepted = self.fifo.lock().push(data);
        self.stats.add_bytes_in(accepted);
        if accepted < data.len() {
            let dropped = data.len() - accepted;
            self.stats.record_overflow(dropped);
            log::trace!("Fifo overflow, dropped {} bytes", dropped);
        }
        accepted
    }

    fn pop(&self, output: &mut [u8]) -> usize {
        let read = self.fifo.lock().pop(output);
        self.stats.add_bytes_out(read);
        read
    }

    /// 宿主播放回调
    ///
    /// 数据不足一个包时整段静音，避免刚开始播放时断断续续
    fn render(&self, output: &mut [u8], min_fill: usize) {
        let mut fifo = self.fifo.lock();
        if fifo.available() < min_fill {
            drop(fifo);
            SilenceFiller::fill(output);
            self.stats.record_underrun(output.len());
            return;
        }
        let read = fifo.pop(output);
        drop(fifo);

        self.stats.add_bytes_out(read);
        let padded = SilenceFiller::pad_from(output, read);
        if padded > 0 {
            self.stats.record_underrun(padded);
            log::trace!("Render underrun, {} bytes of silence", padded);
        }
    }
}

/// 宿主流相关状态
#[derive(Default)]
struct ChannelState {
    device_name: Option<String>,
    stream: Option<Box<dyn HostStream>>,
    spec: Option<StreamSpec>,
}

/// 单向音频通道
pub struct AudioChannel {
    direction: Direction,
    config: ChannelConfig,
    state: Mutex<ChannelState>,
    shared: Arc<Shared>,
}

impl AudioChannel {
    /// 创建未打开的通道
    pub fn new(direction: Direction, config: ChannelConfig) -> Self {
        // 打开前按最高协议采样率预分配，打开时再按协商结果调整
        let initial = StreamSpec::mono_s16(24000, config.callback_samples);
        let fifo = ByteFifo::new(config.fifo_capacity(&initial));

        Self {
            direction,
            config,
            state: Mutex::new(ChannelState::default()),
            shared: Arc::new(Shared {
                fifo: Mutex::new(fifo),
                stats: ChannelStats::new(),
            }),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// 打开宿主设备
    ///
    /// 先关闭已有的流并清空缓冲；打开成功后立即开始运行。
    /// 失败时通道保持关闭状态，设备名为空。
    pub fn open(
        &self,
        host: &dyn AudioHost,
        device_name: &str,
        sample_rate: u32,
    ) -> Result<StreamSpec, DeviceError> {
        let mut state = self.state.lock();
        Self::close_locked(self.direction, &mut state);
        self.shared.fifo.lock().clear();

        let desired = StreamSpec::mono_s16(sample_rate, self.config.callback_samples);
        let callback = self.make_callback();

        let mut stream = match host.open_stream(device_name, &desired, callback) {
            Ok(stream) => stream,
            Err(e) => {
                self.shared.stats.record_open_failure();
                log::warn!("{} device {} failed to open: {}", self.direction, device_name, e);
                return Err(e);
            }
        };

        let achieved = stream.spec();
        log::debug!("{}Device: {}", self.direction, device_name);
        log::debug!(
            "{}Device: Wanted {} Channels, Obtained {} Channels",
            self.direction, desired.channels, achieved.channels
        );
        log::debug!(
            "{}Device: Wanted {} hz, Obtained {} hz",
            self.direction, desired.sample_rate, achieved.sample_rate
        );
        log::debug!(
            "{}Device: Wanted {}, Obtained {}",
            self.direction, desired.format, achieved.format
        );
        log::debug!(
            "{}Device: Wanted samples {}, Obtained samples {}",
            self.direction, desired.samples, achieved.samples
        );

        if achieved.channels != 1 || achieved.format != SampleFormat::S16Le {
            self.shared.stats.record_open_failure();
            log::warn!(
                "{} device {} negotiated unusable format: {}",
                self.direction, device_name, achieved
            );
            return Err(DeviceError::UnsupportedFormat(achieved));
        }

        // FIFO 容量跟随实际采样率
        {
            let capacity = self.config.fifo_capacity(&achieved);
            let mut fifo = self.shared.fifo.lock();
            if fifo.capacity() != capacity {
                *fifo = ByteFifo::new(capacity);
            }
            if self.config.lock_memory {
                fifo.lock_memory();
            }
        }

        if let Err(e) = stream.set_paused(false) {
            self.shared.stats.record_open_failure();
            log::warn!("{} device {} failed to start: {}", self.direction, device_name, e);
            return Err(e);
        }

        state.device_name = Some(device_name.to_string());
        state.stream = Some(stream);
        state.spec = Some(achieved);
        self.shared.stats.record_open();

        log::info!("{} stream opened: {} @ {}", self.direction, device_name, achieved);

        Ok(achieved)
    }

    fn make_callback(&self) -> StreamCallback {
        let shared = Arc::clone(&self.shared);
        match self.direction {
            Direction::Capture => StreamCallback::Capture(Box::new(move |data: &[u8]| {
                shared.push(data);
            })),
            Direction::Playback => {
                let min_fill = self.config.max_packet;
                StreamCallback::Playback(Box::new(move |output: &mut [u8]| {
                    shared.render(output, min_fill);
                }))
            }
        }
    }

    fn close_locked(direction: Direction, state: &mut ChannelState) {
        if let Some(mut stream) = state.stream.take() {
            if let Err(e) = stream.set_paused(true) {
                log::debug!("{} stream failed to pause before close: {}", direction, e);
            }
            drop(stream);
            log::info!(
                "{} stream closed: {}",
                direction,
                state.device_name.as_deref().unwrap_or("<unknown>")
            );
        }
        state.device_name = None;
        state.spec = None;
    }

    /// 暂停并释放宿主流；重复调用为空操作
    pub fn close(&self) {
        let mut state = self.state.lock();
        Self::close_locked(self.direction, &mut state);
    }

    /// 写入字节，返回接受的字节数，超出剩余空间的部分被丢弃
    pub fn push(&self, data: &[u8]) -> usize {
        self.shared.push(data)
    }

    /// 读取至多 output.len() 字节，返回实际读取数
    pub fn pop(&self, output: &mut [u8]) -> usize {
        self.shared.pop(output)
    }

    /// 丢弃缓冲数据，不动宿主流
    pub fn clear(&self) {
        self.shared.fifo.lock().clear();
    }

    pub fn available(&self) -> usize {
        self.shared.fifo.lock().available()
    }

    pub fn free_space(&self) -> usize {
        self.shared.fifo.lock().free_space()
    }

    pub fn capacity(&self) -> usize {
        self.shared.fifo.lock().capacity()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().stream.is_some()
    }

    /// 当前绑定的设备名，None 表示未打开
    pub fn device_name(&self) -> Option<String> {
        self.state.lock().device_name.clone()
    }

    /// 宿主协商出的规格
    pub fn spec(&self) -> Option<StreamSpec> {
        self.state.lock().spec
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.shared.stats
    }
}

impl Drop for AudioChannel {
    fn drop(&mut self) {
        self.close();
    }
}

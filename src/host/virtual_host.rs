//! 软件宿主
//!
//! 不接触真实硬件的宿主实现：回调由调用方手动驱动
//! （`VirtualDevice::feed` / `VirtualDevice::drain`），
//! 可以注入打开失败、强制协商采样率，并记录每个设备的打开次数。
//! 用于测试和命令行模拟器。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{AudioHost, DeviceError, Direction, HostStream, StreamCallback};
use crate::audio::{SampleFormat, StreamSpec};

type DeviceKey = (Direction, String);

struct ActiveStream {
    callback: StreamCallback,
    spec: StreamSpec,
    paused: bool,
}

#[derive(Default)]
struct DeviceSlot {
    opens: u64,
    closes: u64,
    fail_open: bool,
    forced_rate: Option<u32>,
    forced_format: Option<(u16, SampleFormat)>,
    active: Option<Arc<Mutex<ActiveStream>>>,
}

#[derive(Default)]
struct HostInner {
    devices: HashMap<DeviceKey, DeviceSlot>,
    next_stream_id: u64,
}

/// 软件宿主
#[derive(Clone, Default)]
pub struct VirtualHost {
    inner: Arc<Mutex<HostInner>>,
}

impl VirtualHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册设备，返回其控制句柄
    pub fn add_device(&self, direction: Direction, name: &str) -> VirtualDevice {
        self.inner
            .lock()
            .devices
            .entry((direction, name.to_string()))
            .or_default();
        self.device(direction, name)
    }

    /// 获取设备句柄（设备不存在时句柄上的操作均为空操作）
    pub fn device(&self, direction: Direction, name: &str) -> VirtualDevice {
        VirtualDevice {
            inner: Arc::clone(&self.inner),
            key: (direction, name.to_string()),
        }
    }
}

impl AudioHost for VirtualHost {
    fn open_stream(
        &self,
        device_name: &str,
        desired: &StreamSpec,
        callback: StreamCallback,
    ) -> Result<Box<dyn HostStream>, DeviceError> {
        let direction = callback.direction();
        let mut inner = self.inner.lock();
        inner.next_stream_id += 1;
        let id = inner.next_stream_id;

        let slot = inner
            .devices
            .get_mut(&(direction, device_name.to_string()))
            .ok_or_else(|| DeviceError::NotFound {
                direction,
                name: device_name.to_string(),
            })?;

        if slot.fail_open {
            return Err(DeviceError::OpenFailed {
                direction,
                name: device_name.to_string(),
                reason: "device busy".to_string(),
            });
        }

        let mut spec = *desired;
        if let Some(rate) = slot.forced_rate {
            spec.sample_rate = rate;
        }
        if let Some((channels, format)) = slot.forced_format {
            spec.channels = channels;
            spec.format = format;
        }

        let active = Arc::new(Mutex::new(ActiveStream {
            callback,
            spec,
            paused: true,
        }));
        slot.opens += 1;
        slot.active = Some(Arc::clone(&active));

        log::debug!("Virtual {} device opened: {} ({})", direction, device_name, spec);

        Ok(Box::new(VirtualStream {
            inner: Arc::clone(&self.inner),
            key: (direction, device_name.to_string()),
            id,
            stream: active,
        }))
    }

    fn device_names(&self, direction: Direction) -> Result<Vec<String>, DeviceError> {
        let inner = self.inner.lock();
        let mut names: Vec<String> = inner
            .devices
            .keys()
            .filter(|(d, _)| *d == direction)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

struct VirtualStream {
    inner: Arc<Mutex<HostInner>>,
    key: DeviceKey,
    id: u64,
    stream: Arc<Mutex<ActiveStream>>,
}

impl HostStream for VirtualStream {
    fn spec(&self) -> StreamSpec {
        self.stream.lock().spec
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), DeviceError> {
        self.stream.lock().paused = paused;
        Ok(())
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.devices.get_mut(&self.key) {
            // 只清理自己这一次打开
            let is_current = slot
                .active
                .as_ref()
                .map(|a| Arc::ptr_eq(a, &self.stream))
                .unwrap_or(false);
            if is_current {
                slot.active = None;
            }
            slot.closes += 1;
        }
        log::debug!("Virtual {} device closed: {} (stream {})", self.key.0, self.key.1, self.id);
    }
}

/// 软件设备控制句柄
///
/// 模拟宿主音频线程：`feed` 送入录音数据，`drain` 取走播放数据
#[derive(Clone)]
pub struct VirtualDevice {
    inner: Arc<Mutex<HostInner>>,
    key: DeviceKey,
}

impl VirtualDevice {
    fn active(&self) -> Option<Arc<Mutex<ActiveStream>>> {
        self.inner
            .lock()
            .devices
            .get(&self.key)
            .and_then(|slot| slot.active.clone())
    }

    /// 模拟一次采集回调
    ///
    /// 设备未打开、已暂停或方向不符时返回 false
    pub fn feed(&self, data: &[u8]) -> bool {
        let Some(active) = self.active() else {
            return false;
        };
        let mut stream = active.lock();
        if stream.paused {
            return false;
        }
        match &mut stream.callback {
            StreamCallback::Capture(callback) => {
                callback(data);
                true
            }
            StreamCallback::Playback(_) => false,
        }
    }

    /// 模拟一次播放回调，返回宿主“播放”出去的字节
    pub fn drain(&self, len: usize) -> Option<Vec<u8>> {
        let active = self.active()?;
        let mut stream = active.lock();
        if stream.paused {
            return None;
        }
        match &mut stream.callback {
            StreamCallback::Playback(callback) => {
                let mut out = vec![0xAAu8; len];
                callback(&mut out);
                Some(out)
            }
            StreamCallback::Capture(_) => None,
        }
    }

    /// 累计成功打开次数
    pub fn open_count(&self) -> u64 {
        self.inner
            .lock()
            .devices
            .get(&self.key)
            .map(|slot| slot.opens)
            .unwrap_or(0)
    }

    /// 累计关闭次数
    pub fn close_count(&self) -> u64 {
        self.inner
            .lock()
            .devices
            .get(&self.key)
            .map(|slot| slot.closes)
            .unwrap_or(0)
    }

    pub fn is_open(&self) -> bool {
        self.active().is_some()
    }

    pub fn is_paused(&self) -> Option<bool> {
        self.active().map(|a| a.lock().paused)
    }

    /// 后续打开是否失败
    pub fn set_fail_open(&self, fail: bool) {
        if let Some(slot) = self.inner.lock().devices.get_mut(&self.key) {
            slot.fail_open = fail;
        }
    }

    /// 强制协商出的采样率（模拟宿主不接受请求的采样率）
    pub fn force_rate(&self, rate: Option<u32>) {
        if let Some(slot) = self.inner.lock().devices.get_mut(&self.key) {
            slot.forced_rate = rate;
        }
    }

    /// 强制协商出的声道数和样本格式，None 表示按请求
    pub fn force_spec(&self, spec: Option<(u16, SampleFormat)>) {
        if let Some(slot) = self.inner.lock().devices.get_mut(&self.key) {
            slot.forced_format = spec;
        }
    }
}

//! cpal 宿主
//!
//! 通过 cpal 打开真实的输入 / 输出设备。
//! 只接受单声道、请求采样率的配置；i16 直通，f32 设备做样本格式转换
//! （不做混音或重采样）。

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{AudioHost, DeviceError, Direction, HostStream, StreamCallback};
use crate::audio::StreamSpec;

/// 单次回调的 f32 转换缓冲上限（样本数）
const CONVERT_BUFFER_SAMPLES: usize = 8192;

/// 使用系统默认 cpal host
pub struct CpalHost {
    host: cpal::Host,
}

// cpal::Host 在部分平台上不是 Send/Sync，只在控制线程上使用
unsafe impl Send for CpalHost {}
unsafe impl Sync for CpalHost {}

impl CpalHost {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    fn devices(&self, direction: Direction) -> Result<Vec<cpal::Device>, DeviceError> {
        let devices: Vec<cpal::Device> = match direction {
            Direction::Capture => self
                .host
                .input_devices()
                .map_err(|e| DeviceError::Enumerate(e.to_string()))?
                .collect(),
            Direction::Playback => self
                .host
                .output_devices()
                .map_err(|e| DeviceError::Enumerate(e.to_string()))?
                .collect(),
        };
        Ok(devices)
    }

    fn find_device(&self, direction: Direction, name: &str) -> Result<cpal::Device, DeviceError> {
        for device in self.devices(direction)? {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(device);
            }
        }

        Err(DeviceError::NotFound {
            direction,
            name: name.to_string(),
        })
    }

    /// 选择单声道、包含目标采样率的配置，优先 i16
    fn pick_config(
        device: &cpal::Device,
        direction: Direction,
        desired: &StreamSpec,
    ) -> Result<cpal::SupportedStreamConfig, DeviceError> {
        let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
            Direction::Capture => device
                .supported_input_configs()
                .map_err(|e| DeviceError::Enumerate(e.to_string()))?
                .collect(),
            Direction::Playback => device
                .supported_output_configs()
                .map_err(|e| DeviceError::Enumerate(e.to_string()))?
                .collect(),
        };

        let rate = cpal::SampleRate(desired.sample_rate);
        let candidates = ranges.iter().filter(|r| {
            r.channels() == desired.channels
                && r.min_sample_rate() <= rate
                && r.max_sample_rate() >= rate
        });

        let mut fallback = None;
        for range in candidates {
            match range.sample_format() {
                cpal::SampleFormat::I16 => {
                    return Ok(range.clone().with_sample_rate(rate));
                }
                cpal::SampleFormat::F32 if fallback.is_none() => {
                    fallback = Some(range.clone().with_sample_rate(rate));
                }
                _ => {}
            }
        }

        fallback.ok_or(DeviceError::UnsupportedFormat(*desired))
    }
}

/// 设备支持请求的回调帧数时固定之，否则交给后端决定
fn buffer_size(supported: &cpal::SupportedBufferSize, frames: u32) -> cpal::BufferSize {
    match supported {
        cpal::SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            cpal::BufferSize::Fixed(frames)
        }
        _ => cpal::BufferSize::Default,
    }
}

impl Default for CpalHost {
    fn default() -> Self {
        Self::new()
    }
}

fn stream_error(err: cpal::StreamError) {
    log::error!("Host audio stream error: {}", err);
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    callback: StreamCallback,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    match (callback, sample_format) {
        (StreamCallback::Capture(mut callback), cpal::SampleFormat::I16) => {
            let mut bytes = vec![0u8; CONVERT_BUFFER_SAMPLES * 2];
            device.build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    for chunk in data.chunks(CONVERT_BUFFER_SAMPLES) {
                        for (out, &s) in bytes.chunks_exact_mut(2).zip(chunk) {
                            out.copy_from_slice(&s.to_le_bytes());
                        }
                        callback(&bytes[..chunk.len() * 2]);
                    }
                },
                stream_error,
                None,
            )
        }
        (StreamCallback::Capture(mut callback), _) => {
            let mut bytes = vec![0u8; CONVERT_BUFFER_SAMPLES * 2];
            device.build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for chunk in data.chunks(CONVERT_BUFFER_SAMPLES) {
                        for (out, &s) in bytes.chunks_exact_mut(2).zip(chunk) {
                            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                            out.copy_from_slice(&v.to_le_bytes());
                        }
                        callback(&bytes[..chunk.len() * 2]);
                    }
                },
                stream_error,
                None,
            )
        }
        (StreamCallback::Playback(mut callback), cpal::SampleFormat::I16) => {
            let mut bytes = vec![0u8; CONVERT_BUFFER_SAMPLES * 2];
            device.build_output_stream(
                config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    for chunk in data.chunks_mut(CONVERT_BUFFER_SAMPLES) {
                        let raw = &mut bytes[..chunk.len() * 2];
                        callback(&mut *raw);
                        for (s, b) in chunk.iter_mut().zip(raw.chunks_exact(2)) {
                            *s = i16::from_le_bytes([b[0], b[1]]);
                        }
                    }
                },
                stream_error,
                None,
            )
        }
        (StreamCallback::Playback(mut callback), _) => {
            let mut bytes = vec![0u8; CONVERT_BUFFER_SAMPLES * 2];
            device.build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for chunk in data.chunks_mut(CONVERT_BUFFER_SAMPLES) {
                        let raw = &mut bytes[..chunk.len() * 2];
                        callback(&mut *raw);
                        for (s, b) in chunk.iter_mut().zip(raw.chunks_exact(2)) {
                            *s = i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32;
                        }
                    }
                },
                stream_error,
                None,
            )
        }
    }
}

struct CpalStream {
    stream: cpal::Stream,
    spec: StreamSpec,
}

// cpal::Stream 在 macOS 上不是 Send；只在持有通道锁时访问
unsafe impl Send for CpalStream {}

impl HostStream for CpalStream {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), DeviceError> {
        let result = if paused {
            self.stream.pause()
        } else {
            self.stream.play()
        };
        result.map_err(|e| DeviceError::Stream(e.to_string()))
    }
}

impl AudioHost for CpalHost {
    fn open_stream(
        &self,
        device_name: &str,
        desired: &StreamSpec,
        callback: StreamCallback,
    ) -> Result<Box<dyn HostStream>, DeviceError> {
        let direction = callback.direction();
        let device = self.find_device(direction, device_name)?;
        let supported = Self::pick_config(&device, direction, desired)?;
        let sample_format = supported.sample_format();
        let mut config = supported.config();
        config.buffer_size = buffer_size(supported.buffer_size(), desired.samples as u32);

        log::debug!(
            "{} device {}: {:?} {}Hz {}ch buffer {:?}",
            direction,
            device_name,
            sample_format,
            config.sample_rate.0,
            config.channels,
            config.buffer_size
        );

        let stream = match build_stream(&device, &config, sample_format, callback) {
            Ok(stream) => stream,
            Err(cpal::BuildStreamError::StreamConfigNotSupported) => {
                return Err(DeviceError::UnsupportedFormat(*desired));
            }
            Err(e) => {
                return Err(DeviceError::OpenFailed {
                    direction,
                    name: device_name.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        // 与其他宿主保持一致：创建后处于暂停状态
        if let Err(e) = stream.pause() {
            log::debug!("Failed to pause new stream: {}", e);
        }

        let spec = StreamSpec {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
            ..*desired
        };

        Ok(Box::new(CpalStream { stream, spec }))
    }

    fn device_names(&self, direction: Direction) -> Result<Vec<String>, DeviceError> {
        Ok(self
            .devices(direction)?
            .iter()
            .filter_map(|d| d.name().ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size_within_range() {
        let range = cpal::SupportedBufferSize::Range { min: 64, max: 4096 };
        assert_eq!(buffer_size(&range, 100), cpal::BufferSize::Fixed(100));
    }

    #[test]
    fn test_buffer_size_falls_back_to_default() {
        let range = cpal::SupportedBufferSize::Range { min: 256, max: 4096 };
        assert_eq!(buffer_size(&range, 100), cpal::BufferSize::Default);
        assert_eq!(
            buffer_size(&cpal::SupportedBufferSize::Unknown, 100),
            cpal::BufferSize::Default
        );
    }
}

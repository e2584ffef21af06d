//! 音频格式
//!
//! 桥接两端固定为单声道 16-bit signed little-endian，只有采样率可变。
//! 宿主音频子系统可能返回与请求不同的格式（协商结果由宿主决定），
//! 因此区分 desired 和 achieved 两份 StreamSpec。

use std::fmt;

/// 样本格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// 16-bit signed little-endian
    S16Le,
    /// 32-bit float little-endian（部分宿主只给浮点流）
    F32Le,
}

impl SampleFormat {
    /// 每样本的字节数
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::S16Le => 2,
            Self::F32Le => 4,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::S16Le => "S16LE",
            Self::F32Le => "F32LE",
        };
        f.write_str(name)
    }
}

/// 流规格
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// 宿主每次回调处理的帧数
    pub samples: u16,
}

impl StreamSpec {
    /// 桥接使用的唯一格式：单声道 S16LE
    pub fn mono_s16(sample_rate: u32, samples: u16) -> Self {
        Self {
            sample_rate,
            channels: 1,
            format: SampleFormat::S16Le,
            samples,
        }
    }

    /// 每帧的字节数
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// 指定时长对应的字节数
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        self.bytes_per_frame() * self.sample_rate as usize * ms as usize / 1000
    }
}

impl fmt::Display for StreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz {}ch {} ({} samples)",
            self.sample_rate, self.channels, self.format, self.samples
        )
    }
}

/// 将 i16 样本打包为 little-endian 字节
///
/// 返回写入的样本数
pub fn encode_s16le(samples: &[i16], output: &mut [u8]) -> usize {
    let mut written = 0;
    for (chunk, &sample) in output.chunks_exact_mut(2).zip(samples) {
        chunk.copy_from_slice(&sample.to_le_bytes());
        written += 1;
    }
    written
}

/// 将 little-endian 字节解码为 i16 样本
///
/// 奇数长度的尾字节被忽略
pub fn decode_s16le(bytes: &[u8], output: &mut [i16]) -> usize {
    let mut read = 0;
    for (out, chunk) in output.iter_mut().zip(bytes.chunks_exact(2)) {
        *out = i16::from_le_bytes([chunk[0], chunk[1]]);
        read += 1;
    }
    read
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_s16_frame_size() {
        let spec = StreamSpec::mono_s16(24000, 100);
        assert_eq!(spec.bytes_per_frame(), 2);
        // 100ms @ 24kHz = 4800 字节
        assert_eq!(spec.bytes_for_ms(100), 4800);
    }

    #[test]
    fn test_float_frame_size() {
        let spec = StreamSpec {
            channels: 2,
            format: SampleFormat::F32Le,
            ..StreamSpec::mono_s16(16000, 100)
        };
        assert_eq!(spec.bytes_per_frame(), 8);
        assert_eq!(spec.to_string(), "16000Hz 2ch F32LE (100 samples)");
    }

    #[test]
    fn test_bytes_for_ms_low_rate() {
        let spec = StreamSpec::mono_s16(11025, 100);
        assert_eq!(spec.bytes_for_ms(100), 2205);
    }

    #[test]
    fn test_s16le_layout() {
        let mut bytes = [0u8; 4];
        assert_eq!(encode_s16le(&[0x1234, -2], &mut bytes), 2);
        assert_eq!(bytes, [0x34, 0x12, 0xFE, 0xFF]);

        let mut samples = [0i16; 2];
        assert_eq!(decode_s16le(&bytes, &mut samples), 2);
        assert_eq!(samples, [0x1234, -2]);
    }

    #[test]
    fn test_encode_truncates_to_output() {
        let mut bytes = [0u8; 3];
        // 只容得下一个完整样本
        assert_eq!(encode_s16le(&[1, 2], &mut bytes), 1);
        assert_eq!(bytes, [1, 0, 0]);
    }
}

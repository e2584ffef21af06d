//! 静音填充

/// 零字节填充器
///
/// 真实数据不足时用于补齐传输长度
pub struct SilenceFiller;

impl SilenceFiller {
    /// 将整个缓冲区填为静音
    #[inline]
    pub fn fill(buf: &mut [u8]) {
        buf.fill(0);
    }

    /// 从 offset 开始补齐静音，返回补齐的字节数
    #[inline]
    pub fn pad_from(buf: &mut [u8], offset: usize) -> usize {
        if offset >= buf.len() {
            return 0;
        }
        let tail = &mut buf[offset..];
        tail.fill(0);
        tail.len()
    }
}

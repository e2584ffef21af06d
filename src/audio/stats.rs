//! 通道统计模块
//!
//! 实时回调线程和总线轮询线程都会更新计数，全部使用 Relaxed 原子操作。
//! Underrun/overflow 属于稳态现象，只计数，不视为错误。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// 通道统计收集器
///
/// 所有操作都是 lock-free 的，适合在音频回调中使用
#[derive(Default)]
pub struct ChannelStats {
    /// 成功打开宿主设备的次数
    opens: AtomicU64,
    /// 打开失败次数
    open_failures: AtomicU64,
    transfers: AtomicU64,

    // 回调线程和轮询线程分别写，各占一个 cache line
    underruns: CachePadded<AtomicU64>,
    silence_bytes: CachePadded<AtomicU64>,
    overflows: CachePadded<AtomicU64>,
    dropped_bytes: CachePadded<AtomicU64>,

    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl ChannelStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_open_failure(&self) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transfer(&self) {
        self.transfers.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录 underrun，`silence` 为补齐的静音字节数
    #[inline]
    pub fn record_underrun(&self, silence: usize) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
        self.silence_bytes.fetch_add(silence as u64, Ordering::Relaxed);
    }

    /// 记录 overflow，`dropped` 为被丢弃的字节数
    #[inline]
    pub fn record_overflow(&self, dropped: usize) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
        self.dropped_bytes.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    /// 写入 FIFO 的字节数
    #[inline]
    pub fn add_bytes_in(&self, bytes: usize) {
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// 从 FIFO 读出的字节数
    #[inline]
    pub fn add_bytes_out(&self, bytes: usize) {
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes.load(Ordering::Relaxed)
    }

    /// 生成报告
    pub fn report(&self, label: &'static str) -> ChannelReport {
        ChannelReport {
            label,
            opens: self.opens.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            transfers: self.transfers.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            silence_bytes: self.silence_bytes.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            dropped_bytes: self.dropped_bytes.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

/// 统计报告
#[derive(Debug, Clone)]
pub struct ChannelReport {
    pub label: &'static str,
    pub opens: u64,
    pub open_failures: u64,
    pub transfers: u64,
    pub underruns: u64,
    pub silence_bytes: u64,
    pub overflows: u64,
    pub dropped_bytes: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl fmt::Display for ChannelReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} Channel", self.label)?;
        writeln!(f, "=================")?;
        writeln!(
            f,
            "Device opens: {} ({} failed)",
            self.opens, self.open_failures
        )?;
        writeln!(f, "Bus transfers: {}", self.transfers)?;
        writeln!(f, "Bytes in/out: {} / {}", self.bytes_in, self.bytes_out)?;
        writeln!(
            f,
            "Underruns: {} ({} bytes of silence)",
            self.underruns, self.silence_bytes
        )?;
        writeln!(
            f,
            "Overflows: {} ({} bytes dropped)",
            self.overflows, self.dropped_bytes
        )?;
        Ok(())
    }
}

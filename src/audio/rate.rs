//! 协议采样率表

/// 协议索引 → 采样率
pub struct SampleRateTable;

impl SampleRateTable {
    pub const RATES: [u32; 5] = [8000, 11025, 16000, 22050, 24000];

    /// 上电默认采样率索引（16000 Hz）
    pub const DEFAULT_INDEX: u8 = 2;

    /// 查表，越界返回 None
    #[inline]
    pub fn lookup(index: u8) -> Option<u32> {
        Self::RATES.get(index as usize).copied()
    }

    /// 反查索引
    pub fn index_of(rate: u32) -> Option<u8> {
        Self::RATES.iter().position(|&r| r == rate).map(|i| i as u8)
    }

    #[inline]
    pub fn len() -> usize {
        Self::RATES.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_all_indices() {
        let expected = [8000, 11025, 16000, 22050, 24000];
        for (i, &rate) in expected.iter().enumerate() {
            assert_eq!(SampleRateTable::lookup(i as u8), Some(rate));
        }
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(SampleRateTable::lookup(5), None);
        assert_eq!(SampleRateTable::lookup(0xFF), None);
    }

    #[test]
    fn test_index_of() {
        assert_eq!(SampleRateTable::index_of(16000), Some(2));
        assert_eq!(SampleRateTable::index_of(48000), None);
        assert_eq!(
            SampleRateTable::lookup(SampleRateTable::DEFAULT_INDEX),
            Some(16000)
        );
    }
}

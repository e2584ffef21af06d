//! 厂商控制请求
//!
//! 设备只认两个请求，都是 Vendor / Interface / OUT 的 SET_FEATURE：
//! - wIndex 0：设置采样率，wValue 低字节为采样率表索引
//! - wIndex 1：设置自动增益控制
//!
//! 其他请求一律 STALL。

use std::fmt;

/// OUT（扬声器）端点号
pub const EP_OUT: u8 = 0x04;
/// IN（麦克风）端点号
pub const EP_IN: u8 = 0x05;
/// 等时端点最大包长
pub const MAX_PACKET: usize = 48;

/// bmRequestType: Host-to-device | Vendor | Interface
pub const VENDOR_INTERFACE_OUT: u8 = 0x41;
/// bRequest: SET_FEATURE
pub const REQ_SET_FEATURE: u8 = 0x03;

const FEATURE_SAMPLE_RATE: u16 = 0x00;
const FEATURE_AGC: u16 = 0x01;

/// USB SETUP 包
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetupPacket {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
}

impl SetupPacket {
    /// 从 8 字节线格式解析
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self {
            bm_request_type: bytes[0],
            b_request: bytes[1],
            w_value: u16::from_le_bytes([bytes[2], bytes[3]]),
            w_index: u16::from_le_bytes([bytes[4], bytes[5]]),
            w_length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    /// 设置采样率请求
    pub fn set_sample_rate(index: u8) -> Self {
        Self {
            bm_request_type: VENDOR_INTERFACE_OUT,
            b_request: REQ_SET_FEATURE,
            w_value: index as u16,
            w_index: FEATURE_SAMPLE_RATE,
            w_length: 0,
        }
    }

    /// 设置 AGC 请求
    pub fn set_agc(enabled: bool) -> Self {
        Self {
            bm_request_type: VENDOR_INTERFACE_OUT,
            b_request: REQ_SET_FEATURE,
            w_value: enabled as u16,
            w_index: FEATURE_AGC,
            w_length: 0,
        }
    }
}

impl fmt::Display for SetupPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "request 0x{:02x}{:02x} value 0x{:04x} index 0x{:04x}",
            self.bm_request_type, self.b_request, self.w_value, self.w_index
        )
    }
}

/// 解码后的厂商请求
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VendorRequest {
    /// 采样率表索引（未校验范围）
    SetSampleRate(u8),
    SetAutoGainControl(bool),
}

impl VendorRequest {
    /// 不认识的请求返回 None，调用方应 STALL
    pub fn decode(setup: &SetupPacket) -> Option<Self> {
        if setup.bm_request_type != VENDOR_INTERFACE_OUT || setup.b_request != REQ_SET_FEATURE {
            return None;
        }
        match setup.w_index {
            FEATURE_SAMPLE_RATE => Some(Self::SetSampleRate((setup.w_value & 0xFF) as u8)),
            FEATURE_AGC => Some(Self::SetAutoGainControl(setup.w_value != 0)),
            _ => None,
        }
    }
}

/// 控制传输应答
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlResponse {
    Ack,
    Stall,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sample_rate() {
        let setup = SetupPacket::from_bytes([0x41, 0x03, 0x02, 0xAB, 0x00, 0x00, 0x00, 0x00]);
        // 只取 wValue 低字节
        assert_eq!(VendorRequest::decode(&setup), Some(VendorRequest::SetSampleRate(2)));
    }

    #[test]
    fn test_decode_agc() {
        assert_eq!(
            VendorRequest::decode(&SetupPacket::set_agc(true)),
            Some(VendorRequest::SetAutoGainControl(true))
        );
        let mut setup = SetupPacket::set_agc(false);
        setup.w_value = 0x0100;
        assert_eq!(
            VendorRequest::decode(&setup),
            Some(VendorRequest::SetAutoGainControl(true))
        );
    }

    #[test]
    fn test_unknown_requests() {
        let mut setup = SetupPacket::set_sample_rate(0);
        setup.w_index = 2;
        assert_eq!(VendorRequest::decode(&setup), None);

        // 标准 GET_STATUS
        let get_status = SetupPacket::from_bytes([0x80, 0x00, 0, 0, 0, 0, 2, 0]);
        assert_eq!(VendorRequest::decode(&get_status), None);
    }
}

//! USB 协议层
//!
//! - Control: 厂商控制请求解码
//! - Transfer: 等时传输处理

pub mod control;
pub mod transfer;

pub use control::{ControlResponse, SetupPacket, VendorRequest, EP_IN, EP_OUT, MAX_PACKET};
pub use transfer::{BusTransferHandler, TransferStatus};

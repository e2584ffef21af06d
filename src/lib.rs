//! Voice Bridge Library
//!
//! 宿主音频设备与模拟 USB 语音通信器之间的实时双向音频桥。

pub mod audio;
pub mod bridge;
pub mod device;
pub mod host;
pub mod usb;

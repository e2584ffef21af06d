//! 语音通信器外设
//!
//! 把宿主框架的生命周期钩子（realize / attach / reset / control / data /
//! unrealize）接到音频桥上。描述符表和类型注册不在这里。

use std::sync::Arc;

use crate::bridge::{AudioBridge, BridgeConfig, BridgeError, InputBindings, ReconfigureOutcome};
use crate::host::AudioHost;
use crate::usb::{BusTransferHandler, ControlResponse, SetupPacket, TransferStatus, VendorRequest, EP_IN, EP_OUT};

/// 数据传输令牌
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsbToken {
    In,
    Out,
}

/// 数据传输结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsbDataResult {
    Complete(TransferStatus),
    Stall,
}

/// 语音通信器
pub struct Communicator {
    bridge: AudioBridge,
    transfer: BusTransferHandler,
}

impl Communicator {
    /// 外设实例化：创建桥，通道暂不打开
    pub fn realize(
        host: Arc<dyn AudioHost>,
        bindings: Arc<dyn InputBindings>,
        config: BridgeConfig,
    ) -> Self {
        let transfer = BusTransferHandler::from_config(&config);
        log::info!(
            "Voice communicator realized on controller {}",
            config.controller_index
        );
        Self {
            bridge: AudioBridge::new(host, bindings, config),
            transfer,
        }
    }

    /// 设备接入总线：以当前采样率打开通道
    pub fn handle_attach(&mut self) -> Result<ReconfigureOutcome, BridgeError> {
        log::debug!("Attach");
        self.bridge.reinit()
    }

    /// 绑定的设备变化后重新打开（热插拔）
    pub fn reinit(&mut self) -> Result<ReconfigureOutcome, BridgeError> {
        self.bridge.reinit()
    }

    /// 总线复位：丢弃缓冲数据
    pub fn handle_reset(&mut self) {
        log::debug!("Reset");
        self.bridge.reset();
    }

    pub fn handle_control(&mut self, setup: &SetupPacket) -> ControlResponse {
        let Some(request) = VendorRequest::decode(setup) else {
            log::error!("USB stalled on {}", setup);
            return ControlResponse::Stall;
        };

        match request {
            VendorRequest::SetSampleRate(index) => {
                log::debug!("Set sample rate index to {}", index);
                match self.bridge.reconfigure(index) {
                    Ok(_) => ControlResponse::Ack,
                    Err(e) => {
                        log::error!("USB stalled on {}: {}", setup, e);
                        ControlResponse::Stall
                    }
                }
            }
            VendorRequest::SetAutoGainControl(enabled) => {
                self.bridge.set_auto_gain_control(enabled);
                ControlResponse::Ack
            }
        }
    }

    /// 等时数据传输，每个槽位每个方向调用一次
    pub fn handle_data(&mut self, token: UsbToken, endpoint: u8, payload: &mut [u8]) -> UsbDataResult {
        match (token, endpoint) {
            (UsbToken::In, EP_IN) => {
                UsbDataResult::Complete(self.transfer.handle_in(self.bridge.capture(), payload))
            }
            (UsbToken::Out, EP_OUT) => {
                UsbDataResult::Complete(self.transfer.handle_out(self.bridge.playback(), payload))
            }
            _ => {
                log::error!("Unexpected {:?} transfer on endpoint 0x{:02x}", token, endpoint);
                UsbDataResult::Stall
            }
        }
    }

    pub fn bridge(&self) -> &AudioBridge {
        &self.bridge
    }

    /// 外设销毁：关闭两个通道
    pub fn unrealize(self) {
        self.bridge.close();
        log::info!("Voice communicator unrealized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BoundDevices, StaticBindings};
    use crate::host::{Direction, VirtualHost};

    fn realize() -> (VirtualHost, StaticBindings, Communicator) {
        let host = VirtualHost::new();
        host.add_device(Direction::Capture, "mic0");
        host.add_device(Direction::Capture, "mic1");
        host.add_device(Direction::Playback, "spk0");
        let bindings = StaticBindings::new();
        bindings.bind(0, BoundDevices::new("mic0", "spk0"));

        let device = Communicator::realize(
            Arc::new(host.clone()),
            Arc::new(bindings.clone()),
            BridgeConfig::default(),
        );
        (host, bindings, device)
    }

    #[test]
    fn test_end_to_end_microphone() {
        let (host, _bindings, mut device) = realize();
        assert!(!device.bridge().capture().is_open());

        let response = device.handle_control(&SetupPacket::set_sample_rate(2));
        assert_eq!(response, ControlResponse::Ack);
        assert_eq!(device.bridge().sample_rate(), 16000);
        assert_eq!(device.bridge().capture().spec().map(|s| s.sample_rate), Some(16000));
        assert_eq!(device.bridge().playback().spec().map(|s| s.sample_rate), Some(16000));

        // 缓冲为空：整包静音
        let mut payload = [0xFFu8; 48];
        let result = device.handle_data(UsbToken::In, EP_IN, &mut payload);
        assert_eq!(
            result,
            UsbDataResult::Complete(TransferStatus { length: 48, audio_bytes: 0 })
        );
        assert_eq!(payload, [0u8; 48]);

        // 宿主录到 48 字节
        let captured: Vec<u8> = (0..48).collect();
        assert!(host.device(Direction::Capture, "mic0").feed(&captured));

        let result = device.handle_data(UsbToken::In, EP_IN, &mut payload);
        assert_eq!(
            result,
            UsbDataResult::Complete(TransferStatus { length: 48, audio_bytes: 48 })
        );
        assert_eq!(&payload[..], &captured[..]);
    }

    #[test]
    fn test_speaker_path_reaches_host() {
        let (host, _bindings, mut device) = realize();
        device.handle_attach().unwrap();

        let mut payload = [4u8; 48];
        device.handle_data(UsbToken::Out, EP_OUT, &mut payload);

        let played = host.device(Direction::Playback, "spk0").drain(48).unwrap();
        assert_eq!(played, vec![4u8; 48]);
    }

    #[test]
    fn test_hot_swap_capture_device() {
        let (host, bindings, mut device) = realize();
        device.handle_attach().unwrap();

        bindings.set_capture(0, Some("mic1"));
        let outcome = device.reinit().unwrap();

        assert!(outcome.capture.is_reopened());
        assert!(!outcome.playback.is_reopened());
        assert_eq!(host.device(Direction::Playback, "spk0").open_count(), 1);
        assert_eq!(host.device(Direction::Capture, "mic1").open_count(), 1);
    }

    #[test]
    fn test_invalid_rate_stalls() {
        let (host, _bindings, mut device) = realize();
        assert_eq!(
            device.handle_control(&SetupPacket::set_sample_rate(5)),
            ControlResponse::Stall
        );
        assert_eq!(host.device(Direction::Capture, "mic0").open_count(), 0);
    }

    #[test]
    fn test_unknown_control_stalls() {
        let (_host, _bindings, mut device) = realize();
        let setup = SetupPacket::from_bytes([0x80, 0x06, 0x00, 0x01, 0, 0, 18, 0]);
        assert_eq!(device.handle_control(&setup), ControlResponse::Stall);
    }

    #[test]
    fn test_agc_request() {
        let (_host, _bindings, mut device) = realize();
        assert_eq!(
            device.handle_control(&SetupPacket::set_agc(true)),
            ControlResponse::Ack
        );
        assert!(device.bridge().auto_gain_control());
    }

    #[test]
    fn test_wrong_endpoint_stalls() {
        let (_host, _bindings, mut device) = realize();
        let mut payload = [0u8; 48];
        assert_eq!(
            device.handle_data(UsbToken::In, EP_OUT, &mut payload),
            UsbDataResult::Stall
        );
    }

    #[test]
    fn test_reset_then_transfer_has_no_backlog() {
        let (host, _bindings, mut device) = realize();
        device.handle_attach().unwrap();
        host.device(Direction::Capture, "mic0").feed(&[9u8; 96]);

        device.handle_reset();

        let mut payload = [0xFFu8; 48];
        let result = device.handle_data(UsbToken::In, EP_IN, &mut payload);
        assert_eq!(
            result,
            UsbDataResult::Complete(TransferStatus { length: 48, audio_bytes: 0 })
        );
        assert!(host.device(Direction::Capture, "mic0").is_open());
    }

    #[test]
    fn test_audio_thread_races_bus_and_reconfigure() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        let (host, _bindings, mut device) = realize();
        device.handle_attach().unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let mic = host.device(Direction::Capture, "mic0");
        let spk = host.device(Direction::Playback, "spk0");
        let r = Arc::clone(&running);
        let audio = thread::spawn(move || {
            let mut bad_render = 0usize;
            while r.load(Ordering::Acquire) {
                mic.feed(&[1u8; 32]);
                if let Some(out) = spk.drain(32) {
                    bad_render += out.iter().filter(|&&b| b != 0 && b != 2).count();
                }
                thread::yield_now();
            }
            bad_render
        });

        let mut payload = [0xFFu8; 48];
        for i in 1..=20_000u32 {
            payload.fill(0xFF);
            let result = device.handle_data(UsbToken::In, EP_IN, &mut payload);
            let UsbDataResult::Complete(status) = result else {
                panic!("IN transfer stalled at poll {}", i);
            };
            assert_eq!(status.length, 48);
            assert!(payload.iter().all(|&b| b == 0 || b == 1), "poll {}: {:?}", i, payload);

            payload.fill(2);
            device.handle_data(UsbToken::Out, EP_OUT, &mut payload);

            if i % 100 == 0 {
                // 16000 / 24000 交替，每次都是真实的采样率变化
                let index = if (i / 100) % 2 == 1 { 4 } else { 2 };
                assert_eq!(
                    device.handle_control(&SetupPacket::set_sample_rate(index)),
                    ControlResponse::Ack
                );
            }
            if i % 333 == 0 {
                device.handle_reset();
            }
        }

        running.store(false, Ordering::Release);
        let bad_render = audio.join().unwrap();
        assert_eq!(bad_render, 0);

        // 一次 attach + 200 次采样率切换
        assert_eq!(host.device(Direction::Capture, "mic0").open_count(), 201);
        assert_eq!(host.device(Direction::Playback, "spk0").open_count(), 201);
        assert_eq!(device.bridge().sample_rate(), 16000);
        assert!(device.bridge().capture().is_open());
        assert!(device.bridge().playback().is_open());
    }

    #[test]
    fn test_unrealize_closes_streams() {
        let (host, _bindings, mut device) = realize();
        device.handle_attach().unwrap();

        device.unrealize();
        assert!(!host.device(Direction::Capture, "mic0").is_open());
        assert!(!host.device(Direction::Playback, "spk0").is_open());
    }
}

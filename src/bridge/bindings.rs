//! 输入绑定
//!
//! 外部输入绑定服务按控制器索引提供当前绑定的麦克风 / 扬声器设备名。
//! 每次重新配置开始时同步查询一次。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// 某个控制器当前绑定的设备名（未绑定为 None）
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoundDevices {
    pub capture: Option<String>,
    pub playback: Option<String>,
}

impl BoundDevices {
    pub fn new(capture: &str, playback: &str) -> Self {
        Self {
            capture: Some(capture.to_string()),
            playback: Some(playback.to_string()),
        }
    }
}

/// 输入绑定服务
pub trait InputBindings: Send + Sync {
    fn bound_devices(&self, controller_index: u8) -> BoundDevices;
}

/// 内存中的绑定表
///
/// 克隆共享同一张表，前端在另一个线程修改后调用 `Communicator::reinit`
#[derive(Clone, Default)]
pub struct StaticBindings {
    table: Arc<RwLock<HashMap<u8, BoundDevices>>>,
}

impl StaticBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, controller_index: u8, devices: BoundDevices) {
        self.table.write().insert(controller_index, devices);
    }

    pub fn set_capture(&self, controller_index: u8, name: Option<&str>) {
        self.table.write().entry(controller_index).or_default().capture =
            name.map(str::to_string);
    }

    pub fn set_playback(&self, controller_index: u8, name: Option<&str>) {
        self.table.write().entry(controller_index).or_default().playback =
            name.map(str::to_string);
    }

    pub fn unbind(&self, controller_index: u8) {
        self.table.write().remove(&controller_index);
    }
}

impl InputBindings for StaticBindings {
    fn bound_devices(&self, controller_index: u8) -> BoundDevices {
        self.table
            .read()
            .get(&controller_index)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_controller() {
        let bindings = StaticBindings::new();
        assert_eq!(bindings.bound_devices(3), BoundDevices::default());
    }

    #[test]
    fn test_shared_updates() {
        let bindings = StaticBindings::new();
        let frontend = bindings.clone();
        frontend.bind(0, BoundDevices::new("mic0", "spk0"));
        frontend.set_capture(0, Some("mic1"));

        assert_eq!(bindings.bound_devices(0), BoundDevices::new("mic1", "spk0"));

        frontend.unbind(0);
        assert_eq!(bindings.bound_devices(0).capture, None);
    }
}

//! Voice Bridge - 语音通信器音频桥
//!
//! 设计目标：
//! - 总线轮询永不阻塞：每个等时槽位都交付完整的包
//! - 热插拔安全：设备切换、采样率切换不打断轮询节奏
//! - 实时线程和控制线程只在每个通道的锁上交汇

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};

use voice_bridge::audio::format::{decode_s16le, encode_s16le};
use voice_bridge::audio::{ChannelConfig, SampleRateTable};
use voice_bridge::bridge::{BoundDevices, BridgeConfig, StaticBindings};
use voice_bridge::device::{Communicator, UsbToken};
use voice_bridge::host::{AudioHost, Direction, VirtualDevice, VirtualHost};
use voice_bridge::usb::{ControlResponse, SetupPacket, EP_IN, EP_OUT, MAX_PACKET};

/// 软件时钟每次回调的时长
const VIRTUAL_CALLBACK_MS: u64 = 10;

/// 测试音频率
const TONE_HZ: f32 = 440.0;

/// 总线轮询间隔
const BUS_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Voice Bridge - real-time audio bridge for an emulated USB voice communicator
#[derive(Parser)]
#[command(name = "voice-bridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum HostKind {
    /// Software devices driven by an internal clock
    Virtual,
    /// Real audio devices (requires the host-cpal feature)
    Cpal,
}

#[derive(Subcommand)]
enum Commands {
    /// List capture and playback devices
    Devices {
        /// Host audio backend
        #[arg(long, value_enum, default_value = "virtual")]
        host: HostKind,
    },

    /// Run the bridge with a simulated 1 ms bus poll
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Host audio backend
    #[arg(long, value_enum, default_value = "virtual")]
    host: HostKind,

    /// Capture (microphone) device name
    #[arg(long, default_value = "mic0")]
    mic: String,

    /// Playback (speaker) device name
    #[arg(long, default_value = "spk0")]
    speaker: String,

    /// Sample rate index (0=8000 1=11025 2=16000 3=22050 4=24000)
    #[arg(short, long, default_value = "2")]
    rate_index: u8,

    /// Controller index used for device binding
    #[arg(long, default_value = "0")]
    controller: u8,

    /// Buffer size per channel in milliseconds
    #[arg(short, long, default_value = "100")]
    buffer_ms: u32,

    /// Send a silent packet when less than one packet of capture data is buffered
    #[arg(long)]
    low_buffer_guard: bool,

    /// Lock buffer memory (mlock)
    #[arg(long)]
    mlock: bool,

    /// Stop after this many seconds (default: run until Ctrl+C)
    #[arg(short, long)]
    seconds: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Some(Commands::Devices { host }) => list_devices(host),
        Some(Commands::Run(ref args)) => run(args),
        None => {
            println!("Voice Bridge - USB voice communicator audio bridge\n");
            println!("Usage: voice-bridge devices [--host virtual|cpal]");
            println!("       voice-bridge run [OPTIONS]");
            println!("\nOptions (run):");
            println!("  --mic <NAME>           Capture device [default: mic0]");
            println!("  --speaker <NAME>       Playback device [default: spk0]");
            println!("  -r, --rate-index <N>   Sample rate index 0-4 [default: 2]");
            println!("  -b, --buffer-ms <MS>   Buffer per channel [default: 100]");
            println!("  -s, --seconds <N>      Stop after N seconds");
            println!("  --low-buffer-guard     Silence IN packets until a full packet is buffered");
            println!("  --host <virtual|cpal>  Host audio backend [default: virtual]");
            println!("  -v, --verbose          Show verbose output");
            println!("\nPress Ctrl+C to stop");
            Ok(())
        }
    }
}

#[cfg(feature = "host-cpal")]
fn cpal_host() -> anyhow::Result<Arc<dyn AudioHost>> {
    Ok(Arc::new(voice_bridge::host::CpalHost::new()))
}

#[cfg(not(feature = "host-cpal"))]
fn cpal_host() -> anyhow::Result<Arc<dyn AudioHost>> {
    anyhow::bail!("cpal host not available: rebuild with --features host-cpal")
}

/// 显示设备列表
fn list_devices(kind: HostKind) -> anyhow::Result<()> {
    let host: Arc<dyn AudioHost> = match kind {
        HostKind::Virtual => {
            let host = VirtualHost::new();
            host.add_device(Direction::Capture, "mic0");
            host.add_device(Direction::Playback, "spk0");
            Arc::new(host)
        }
        HostKind::Cpal => cpal_host()?,
    };

    for direction in [Direction::Capture, Direction::Playback] {
        println!("=== {} Devices ===\n", direction);
        for (i, name) in host.device_names(direction)?.iter().enumerate() {
            println!("[{:>3}] {}", i, name);
        }
        println!();
    }

    Ok(())
}

/// 软件时钟线程：模拟宿主音频线程的回调节奏
///
/// 每 10ms 向麦克风送一段测试音，从扬声器取走同样时长的数据
struct VirtualClock {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    /// 扬声器输出中非静音的样本数
    audible_samples: Arc<AtomicU64>,
}

impl VirtualClock {
    fn start(mic: VirtualDevice, speaker: VirtualDevice, sample_rate: u32) -> anyhow::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let audible_samples = Arc::new(AtomicU64::new(0));

        let r = Arc::clone(&running);
        let audible = Arc::clone(&audible_samples);
        let handle = thread::Builder::new()
            .name("virtual-audio".to_string())
            .spawn(move || Self::run(mic, speaker, sample_rate, r, audible))?;

        Ok(Self {
            running,
            handle: Some(handle),
            audible_samples,
        })
    }

    fn run(
        mic: VirtualDevice,
        speaker: VirtualDevice,
        sample_rate: u32,
        running: Arc<AtomicBool>,
        audible: Arc<AtomicU64>,
    ) {
        let frames = (sample_rate as u64 * VIRTUAL_CALLBACK_MS / 1000) as usize;
        let mut tone = vec![0i16; frames];
        let mut bytes = vec![0u8; frames * 2];
        let mut played = vec![0i16; frames];
        let mut phase = 0.0f32;
        let step = TAU * TONE_HZ / sample_rate as f32;

        let mut next = Instant::now();
        while running.load(Ordering::Acquire) {
            for s in tone.iter_mut() {
                *s = (phase.sin() * 8000.0) as i16;
                phase = (phase + step) % TAU;
            }
            encode_s16le(&tone, &mut bytes);
            mic.feed(&bytes);

            if let Some(out) = speaker.drain(bytes.len()) {
                let n = decode_s16le(&out, &mut played);
                let count = played[..n].iter().filter(|&&s| s != 0).count();
                audible.fetch_add(count as u64, Ordering::Relaxed);
            }

            next += Duration::from_millis(VIRTUAL_CALLBACK_MS);
            if let Some(wait) = next.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            join_worker(handle);
        }
    }
}

/// 等待工作线程结束，线程 panic 时记录错误
///
/// 返回线程是否正常退出
fn join_worker(handle: JoinHandle<()>) -> bool {
    let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
    match handle.join() {
        Ok(()) => true,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Thread {} panicked: {}", name, message);
            false
        }
    }
}

impl Drop for VirtualClock {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 每毫秒的字节数（取偶数，不超过最大包长）
fn packet_len(sample_rate: u32) -> usize {
    let bytes = (sample_rate as usize * 2 / 1000) & !1;
    bytes.min(MAX_PACKET)
}

/// 运行桥接
fn run(args: &RunArgs) -> anyhow::Result<()> {
    let rate = SampleRateTable::lookup(args.rate_index).ok_or_else(|| {
        anyhow::anyhow!(
            "sample rate index {} out of range (0-{})",
            args.rate_index,
            SampleRateTable::len() - 1
        )
    })?;

    let bindings = StaticBindings::new();
    bindings.bind(args.controller, BoundDevices::new(&args.mic, &args.speaker));

    let mut virtual_host = None;
    let host: Arc<dyn AudioHost> = match args.host {
        HostKind::Virtual => {
            let host = VirtualHost::new();
            host.add_device(Direction::Capture, &args.mic);
            host.add_device(Direction::Playback, &args.speaker);
            virtual_host = Some(host.clone());
            Arc::new(host)
        }
        HostKind::Cpal => cpal_host()?,
    };

    let config = BridgeConfig {
        controller_index: args.controller,
        channel: ChannelConfig {
            buffer_ms: args.buffer_ms,
            lock_memory: args.mlock,
            ..ChannelConfig::default()
        },
        low_buffer_guard: args.low_buffer_guard,
    };

    let mut device = Communicator::realize(host, Arc::new(bindings), config);

    if device.handle_control(&SetupPacket::set_sample_rate(args.rate_index)) == ControlResponse::Stall {
        anyhow::bail!("device refused sample rate index {}", args.rate_index);
    }
    if !device.bridge().capture().is_open() || !device.bridge().playback().is_open() {
        log::warn!("Running with a closed channel, audio will be silent");
    }

    let mut clock = match virtual_host {
        Some(ref host) => Some(VirtualClock::start(
            host.device(Direction::Capture, &args.mic),
            host.device(Direction::Playback, &args.speaker),
            rate,
        )?),
        None => None,
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    println!(
        "Voice Bridge - {} Hz | mic: {} | speaker: {}",
        rate, args.mic, args.speaker
    );
    println!("Press Ctrl+C to stop.\n");

    let packet = packet_len(rate);
    let mut payload = vec![0u8; packet];
    let started = Instant::now();
    let deadline = args.seconds.map(|s| started + Duration::from_secs(s));
    let mut next = started;
    let mut polls = 0u64;

    // 总线轮询循环：IN 取麦克风数据，原样回送到 OUT
    while running.load(Ordering::SeqCst) {
        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            break;
        }

        device.handle_data(UsbToken::In, EP_IN, &mut payload);
        device.handle_data(UsbToken::Out, EP_OUT, &mut payload);
        polls += 1;

        next += BUS_POLL_INTERVAL;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    if let Some(ref mut clock) = clock {
        clock.stop();
    }

    println!(
        "Ran {} bus polls of {} bytes in {:.1}s\n",
        polls,
        packet,
        started.elapsed().as_secs_f64()
    );
    println!("{}", device.bridge().capture().stats().report("Capture"));
    println!("{}", device.bridge().playback().stats().report("Playback"));
    if let Some(ref clock) = clock {
        println!(
            "Audible samples played: {}",
            clock.audible_samples.load(Ordering::Relaxed)
        );
    }

    device.unrealize();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_len() {
        assert_eq!(packet_len(8000), 16);
        assert_eq!(packet_len(11025), 22);
        assert_eq!(packet_len(24000), 48);
    }

    #[test]
    fn test_join_worker_reports_panic() {
        let ok = thread::Builder::new()
            .name("ok-worker".to_string())
            .spawn(|| {})
            .unwrap();
        assert!(join_worker(ok));

        let failed = thread::Builder::new()
            .name("failing-worker".to_string())
            .spawn(|| panic!("clock stalled"))
            .unwrap();
        assert!(!join_worker(failed));
    }
}

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ferricom_scripting::{
    EmulationLock, EmulationSpeed, EmulatorBridge, EmulatorCore, HostRegistry, LogSink,
    NullFrameEventSource,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Default)]
struct NoopCore {
    frame: AtomicU32,
}

impl EmulatorCore for NoopCore {
    fn power_on(&self) {}

    fn soft_reset(&self) {}

    fn set_paused(&self, _paused: bool) {}

    fn paused(&self) -> bool {
        false
    }

    fn frame_count(&self) -> u32 {
        self.frame.load(Ordering::Relaxed)
    }

    fn lag_count(&self) -> u32 {
        0
    }

    fn lagged(&self) -> bool {
        false
    }

    fn set_lag_flag(&self, _lagged: bool) {}

    fn emulating(&self) -> bool {
        true
    }

    fn display_message(&self, _message: &str) {}

    fn set_speed(&self, _speed: EmulationSpeed) {}

    fn load_rom(&self, _path: &Path) -> bool {
        true
    }

    fn install_directory(&self) -> PathBuf {
        PathBuf::new()
    }
}

struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _text: &str) {}
}

fn registry_with_subscribers(count: usize) -> Arc<HostRegistry> {
    let registry = HostRegistry::new(
        Arc::new(EmulatorBridge::new(Arc::new(NoopCore::default()))),
        EmulationLock::new(),
        Arc::new(NullFrameEventSource),
    );
    for i in 0..count {
        let host = registry.create_host(Arc::new(NullSink)).unwrap();
        host.load("function onFrameFinish() end", &format!("noop{i}.lua"))
            .unwrap();
    }
    registry
}

fn bench_dispatch_overhead(c: &mut Criterion) {
    let empty = registry_with_subscribers(0);
    c.bench_function("dispatch_no_subscribers", |b| {
        b.iter(|| black_box(&empty).dispatch_frame_finished())
    });

    let single = registry_with_subscribers(1);
    c.bench_function("dispatch_one_noop_subscriber", |b| {
        b.iter(|| black_box(&single).dispatch_frame_finished())
    });

    let four = registry_with_subscribers(4);
    c.bench_function("dispatch_four_noop_subscribers", |b| {
        b.iter(|| black_box(&four).dispatch_frame_finished())
    });

    let counting = registry_with_subscribers(0);
    let host = counting.create_host(Arc::new(NullSink)).unwrap();
    host.load(
        "frames = 0\nfunction onFrameFinish() frames = frames + emu.framecount() end",
        "counting.lua",
    )
    .unwrap();
    c.bench_function("dispatch_one_bridge_calling_subscriber", |b| {
        b.iter(|| black_box(&counting).dispatch_frame_finished())
    });
}

criterion_group!(benches, bench_dispatch_overhead);
criterion_main!(benches);

use browser_profiler::monitor::cpu::CpuSplitReader;
use std::time::Duration;

fn main() {
    let mut reader = CpuSplitReader::for_platform();
    for _ in 0..3 {
        match reader.read() {
            Ok(split) => println!("user: {:.1}%, sys: {:.1}%", split.user_pct, split.sys_pct),
            Err(e) => println!("cpu split unavailable: {e}"),
        }
        std::thread::sleep(Duration::from_secs(1));
    }
}

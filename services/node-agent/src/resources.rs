//! Local resource snapshot sent during registration and in heartbeats.

use std::path::Path;

use nodelink_wire::NodeCapabilities;

/// Proc entry populated by the NVIDIA driver, one directory per GPU.
const NVIDIA_GPU_DIR: &str = "/proc/driver/nvidia/gpus";

#[derive(Debug, Clone)]
pub struct SystemResources {
    pub host: String,
    pub cpu_cores: u32,
    pub cpu_usage_percent: f64,
    pub total_memory_bytes: u64,
    pub available_memory_bytes: u64,
    pub gpu_present: bool,
}

impl SystemResources {
    pub fn measure() -> Self {
        let cpu_cores = get_cpu_count();
        let (total_memory, available_memory) = get_memory_info();

        Self {
            host: get_host_name(),
            cpu_cores,
            cpu_usage_percent: get_cpu_usage(cpu_cores),
            total_memory_bytes: total_memory,
            available_memory_bytes: available_memory,
            gpu_present: gpu_present(Path::new(NVIDIA_GPU_DIR)),
        }
    }

    /// Memory in use, in percent of the total.
    pub fn memory_usage_percent(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 0.0;
        }
        let used = self
            .total_memory_bytes
            .saturating_sub(self.available_memory_bytes);
        used as f64 * 100.0 / self.total_memory_bytes as f64
    }

    /// Wire form of the snapshot, advertising the given runtime kinds.
    pub fn capabilities(&self, technology: Vec<String>) -> NodeCapabilities {
        NodeCapabilities {
            host: self.host.clone(),
            cpu_cores: self.cpu_cores,
            cpu_usage: self.cpu_usage_percent,
            memory_usage: self.memory_usage_percent(),
            memory_free_mb: self.available_memory_bytes / (1024 * 1024),
            gpu_present: self.gpu_present,
            technology,
        }
    }
}

fn get_cpu_count() -> u32 {
    #[cfg(unix)]
    {
        let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if count > 0 {
            return count as u32;
        }
    }

    std::thread::available_parallelism()
        .map(|p| p.get() as u32)
        .unwrap_or(1)
}

/// One-minute load average relative to the core count, capped at 100%.
fn get_cpu_usage(cpu_cores: u32) -> f64 {
    std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|content| parse_loadavg(&content))
        .map(|load| load_to_percent(load, cpu_cores))
        .unwrap_or(0.0)
}

fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

fn load_to_percent(load: f64, cpu_cores: u32) -> f64 {
    (load * 100.0 / f64::from(cpu_cores.max(1))).clamp(0.0, 100.0)
}

fn gpu_present(gpu_dir: &Path) -> bool {
    std::fs::read_dir(gpu_dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn get_host_name() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(target_os = "linux")]
fn get_memory_info() -> (u64, u64) {
    if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
        return parse_meminfo(&meminfo);
    }

    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let total_pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    let avail_pages = unsafe { libc::sysconf(libc::_SC_AVPHYS_PAGES) };

    if page_size > 0 && total_pages > 0 {
        let total = (page_size * total_pages) as u64;
        let avail = if avail_pages > 0 {
            (page_size * avail_pages) as u64
        } else {
            total
        };
        return (total, avail);
    }

    (16 * 1024 * 1024 * 1024, 8 * 1024 * 1024 * 1024)
}

#[cfg(not(target_os = "linux"))]
fn get_memory_info() -> (u64, u64) {
    #[cfg(unix)]
    {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let total_pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };

        if page_size > 0 && total_pages > 0 {
            let total = (page_size * total_pages) as u64;
            return (total, total / 2);
        }
    }

    (16 * 1024 * 1024 * 1024, 8 * 1024 * 1024 * 1024)
}

#[cfg(target_os = "linux")]
fn parse_meminfo(content: &str) -> (u64, u64) {
    let mut total: u64 = 0;
    let mut available: u64 = 0;
    let mut free: u64 = 0;
    let mut buffers: u64 = 0;
    let mut cached: u64 = 0;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            const KB_TO_BYTES: u64 = 1024;
            let value: u64 = parts[1].parse().unwrap_or(0) * KB_TO_BYTES;
            match parts[0] {
                "MemTotal:" => total = value,
                "MemAvailable:" => available = value,
                "MemFree:" => free = value,
                "Buffers:" => buffers = value,
                "Cached:" => cached = value,
                _ => {}
            }
        }
    }

    if available == 0 {
        available = free + buffers + cached;
    }

    (total, available)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SystemResources {
        SystemResources {
            host: "worker-1".to_string(),
            cpu_cores: 4,
            cpu_usage_percent: 12.5,
            total_memory_bytes: 8 * 1024 * 1024 * 1024,
            available_memory_bytes: 2 * 1024 * 1024 * 1024,
            gpu_present: false,
        }
    }

    #[test]
    fn test_measure_resources() {
        let resources = SystemResources::measure();
        assert!(resources.cpu_cores > 0);
        assert!(resources.total_memory_bytes > 0);
        assert!(resources.available_memory_bytes <= resources.total_memory_bytes);
        assert!((0.0..=100.0).contains(&resources.cpu_usage_percent));
        assert!(!resources.host.is_empty());
    }

    #[test]
    fn test_capabilities() {
        let capabilities = sample().capabilities(vec!["containerd".to_string()]);
        assert_eq!(capabilities.cpu_cores, 4);
        assert_eq!(capabilities.memory_usage, 75.0);
        assert_eq!(capabilities.memory_free_mb, 2048);
        assert!(!capabilities.gpu_present);
        assert_eq!(capabilities.technology, vec!["containerd"]);
    }

    #[test]
    fn test_memory_usage_without_total() {
        let mut resources = sample();
        resources.total_memory_bytes = 0;
        assert_eq!(resources.memory_usage_percent(), 0.0);
    }

    #[test]
    fn test_load_to_percent() {
        assert_eq!(parse_loadavg("1.00 0.50 0.25 1/123 4567\n"), Some(1.0));
        assert_eq!(parse_loadavg(""), None);
        assert_eq!(load_to_percent(1.0, 4), 25.0);
        assert_eq!(load_to_percent(9.0, 4), 100.0);
        assert_eq!(load_to_percent(0.5, 0), 50.0);
    }

    #[test]
    fn test_gpu_absent_when_driver_missing() {
        assert!(!gpu_present(Path::new("/nonexistent/nvidia/gpus")));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_meminfo() {
        let sample = r#"MemTotal:       16384000 kB
MemFree:         1234567 kB
MemAvailable:    8000000 kB
Buffers:          123456 kB
Cached:          2345678 kB
"#;
        let (total, available) = parse_meminfo(sample);
        assert_eq!(total, 16384000 * 1024);
        assert_eq!(available, 8000000 * 1024);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parse_meminfo_no_available() {
        let sample = r#"MemTotal:       16384000 kB
MemFree:         1000000 kB
Buffers:          500000 kB
Cached:          2000000 kB
"#;
        let (total, available) = parse_meminfo(sample);
        assert_eq!(total, 16384000 * 1024);
        assert_eq!(available, (1000000 + 500000 + 2000000) * 1024);
    }
}

use std::fs;
use std::io;

/// System memory as reported by the kernel. The INFO memory section shows
/// it next to the keyspace's own byte accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStats {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

pub fn read_memory_stats() -> io::Result<MemoryStats> {
    parse_meminfo(&fs::read_to_string("/proc/meminfo")?).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "unrecognized /proc/meminfo")
    })
}

fn parse_meminfo(raw: &str) -> Option<MemoryStats> {
    let mut total_kb: Option<u64> = None;
    let mut available_kb: Option<u64> = None;
    for line in raw.lines() {
        let mut fields = line.split_whitespace();
        let (Some(label), Some(amount)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Ok(kb) = amount.parse::<u64>() else {
            continue;
        };
        match label {
            "MemTotal:" => total_kb = Some(kb),
            "MemAvailable:" => available_kb = Some(kb),
            _ => {}
        }
        if total_kb.is_some() && available_kb.is_some() {
            break;
        }
    }
    Some(MemoryStats {
        total_bytes: total_kb? * 1024,
        available_bytes: available_kb? * 1024,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_kernel_report() {
        let raw = "MemTotal:       16316412 kB\n\
                   MemFree:         1093640 kB\n\
                   MemAvailable:    9554992 kB\n\
                   Buffers:          523996 kB\n";
        let stats = parse_meminfo(raw).unwrap();
        assert_eq!(stats.total_bytes, 16_316_412 * 1024);
        assert_eq!(stats.available_bytes, 9_554_992 * 1024);
    }

    #[test]
    fn rejects_reports_missing_either_field() {
        assert!(parse_meminfo("MemTotal: 1024 kB\n").is_none());
        assert!(parse_meminfo("MemAvailable: 1024 kB\n").is_none());
        assert!(parse_meminfo("").is_none());
    }

    #[test]
    fn skips_malformed_lines() {
        let raw = "garbage\nMemTotal: not-a-number kB\nMemTotal: 2048 kB\nMemAvailable: 1024 kB\n";
        let stats = parse_meminfo(raw).unwrap();
        assert_eq!(stats.total_bytes, 2048 * 1024);
    }
}

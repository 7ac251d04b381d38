use crate::Result;
use comfy_table::Table;

pub fn print_table(table: Table) -> Result<()> {
    let table = table.to_string();
    for line in table.lines() {
        println!("{}", line.trim_end());
    }
    Ok(())
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes}B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

pub fn format_uptime(uptime_ms: u64) -> String {
    if uptime_ms == 0 {
        "-".to_string()
    } else {
        humantime::format_duration(std::time::Duration::from_secs(uptime_ms / 1000)).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.0MB");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "-");
        assert_eq!(format_uptime(61_000), "1m 1s");
    }
}

const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
const SPEED_UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];

fn scaled(value: u64, units: &[&str]) -> String {
    if value == 0 {
        return format!("0 {}", units[0]);
    }
    let mut exp = 0;
    let mut step = 1u64;
    while exp + 1 < units.len() && value / step >= 1024 {
        step *= 1024;
        exp += 1;
    }
    let shown = (value as f64 / step as f64 * 10.0).round() / 10.0;
    format!("{} {}", shown, units[exp])
}

/// `1536` -> `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    scaled(bytes, &BYTE_UNITS)
}

pub fn format_speed(bytes_per_sec: u64) -> String {
    scaled(bytes_per_sec, &SPEED_UNITS)
}

pub fn round_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

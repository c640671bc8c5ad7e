use std::time::Duration;

pub(crate) fn format_duration_single(d: Duration) -> String {
    // Single rounded component in one of: ms, s, m.
    let total_ms = d.as_millis();

    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    if total_ms >= 600_000 {
        return format!("{}m", round_div(total_ms, 60_000));
    }
    if total_ms >= 1_000 {
        return format!("{}s", round_div(total_ms, 1_000));
    }
    format!("{total_ms}ms")
}

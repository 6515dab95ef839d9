/// Timestamp format shared by the audit log and the hash log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time rendered with [`TIMESTAMP_FORMAT`].
pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Renders a number the way cleaned tables store it: integral values without a
/// fractional part, everything else in shortest round-trip form.
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Formats an optional f64 to 2 decimal places, or returns "-" if None or non-finite.
pub fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) if x.is_finite() => format!("{x:.2}"),
        _ => "-".to_owned(),
    }
}

pub(crate) fn format_tags_inline(tags: &[(String, String)], exclude: &[&str]) -> String {
    let mut filtered: Vec<(String, String)> = tags
        .iter()
        .filter(|(k, _)| !exclude.iter().any(|e| e == &k.as_str()))
        .cloned()
        .collect();

    filtered.sort_by(|(ak, av), (bk, bv)| ak.cmp(bk).then_with(|| av.cmp(bv)));

    if filtered.is_empty() {
        return String::new();
    }

    let inner = filtered
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");

    format!("{{{inner}}}")
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

pub(crate) fn format_ms_opt(v: Option<f64>) -> String {
    match v {
        Some(ms) if ms.is_finite() => format!("{ms:.2} ms"),
        _ => "n/a".to_string(),
    }
}

pub(crate) fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        format!("{v:.4}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_sorted_and_filtered() {
        let tags = vec![
            ("scenario".to_string(), "s".to_string()),
            ("status".to_string(), "200".to_string()),
            ("endpoint".to_string(), "cpu".to_string()),
        ];
        assert_eq!(
            format_tags_inline(&tags, &["scenario"]),
            "{endpoint=cpu status=200}"
        );
        assert_eq!(format_tags_inline(&tags[..1], &["scenario"]), "");
    }

    #[test]
    fn numbers_render_compactly() {
        assert_eq!(format_rate(f64::NAN), "0");
        assert_eq!(format_ms_opt(Some(12.345)), "12.35 ms");
        assert_eq!(format_ms_opt(None), "n/a");
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(0.25), "0.2500");
    }
}

use chrono::{NaiveDate, NaiveDateTime};

use super::Dynamic;
use super::range::SheetRange;

/// Format a Dynamic value for display.
pub fn format_dynamic(value: &Dynamic) -> String {
    if value.is_unit() {
        String::new()
    } else if let Ok(n) = value.as_float() {
        format_number(n)
    } else if let Ok(n) = value.as_int() {
        n.to_string()
    } else if let Ok(b) = value.as_bool() {
        if b { "TRUE" } else { "FALSE" }.to_string()
    } else if value.is_string() {
        value.clone().into_string().unwrap_or_default()
    } else if value.is_array() {
        let items = value.clone().into_array().unwrap_or_default();
        let parts: Vec<String> = items.iter().map(format_element).collect();
        format!("[{}]", parts.join(", "))
    } else if value.is_map() {
        let map = value.clone().cast::<rhai::Map>();
        let parts: Vec<String> = map
            .iter()
            .map(|(k, v)| format!("'{}': {}", k, format_element(v)))
            .collect();
        format!("{{{}}}", parts.join(", "))
    } else if let Some(range) = value.clone().try_cast::<SheetRange>() {
        range.to_string()
    } else if let Some(dt) = value.clone().try_cast::<NaiveDateTime>() {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else if let Some(date) = value.clone().try_cast::<NaiveDate>() {
        date.format("%Y-%m-%d").to_string()
    } else {
        value.to_string()
    }
}

/// Strings inside containers are quoted so `['1', 1]` stays readable.
fn format_element(value: &Dynamic) -> String {
    if value.is_string() {
        format!("'{}'", format_dynamic(value))
    } else if value.is_unit() {
        "None".to_string()
    } else {
        format_dynamic(value)
    }
}

/// Format a number for display.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "#NAN!".to_string()
    } else if n.is_infinite() {
        "#INF!".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{:.0}", n)
    } else {
        n.to_string()
    }
}

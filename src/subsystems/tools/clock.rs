//! `get_current_time` tool.

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, Utc};
use serde_json::json;

/// Current time in UTC and local zone.  `format` is an optional strftime
/// string applied to local time.
pub fn current_time(format: Option<&str>) -> Result<serde_json::Value, String> {
    let utc = Utc::now();
    let local = utc.with_timezone(&Local);
    let formatted = match format {
        Some(f) => {
            let items: Vec<Item<'_>> = StrftimeItems::new(f).collect();
            if items.iter().any(|i| matches!(i, Item::Error)) {
                return Err(format!("invalid time format: {f}"));
            }
            Some(local.format_with_items(items.into_iter()).to_string())
        }
        None => None,
    };
    Ok(json!({
        "utc": utc.to_rfc3339(),
        "local": local.to_rfc3339(),
        "unix": utc.timestamp(),
        "formatted": formatted,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shape() {
        let v = current_time(None).unwrap();
        assert!(v["utc"].as_str().unwrap().contains('T'));
        assert!(v["unix"].as_i64().unwrap() > 1_600_000_000);
        assert!(v["formatted"].is_null());
    }

    #[test]
    fn custom_format_applies() {
        let v = current_time(Some("%Y")).unwrap();
        assert_eq!(v["formatted"].as_str().unwrap().len(), 4);
    }

    #[test]
    fn invalid_format_rejected() {
        assert!(current_time(Some("%Q")).is_err());
    }
}

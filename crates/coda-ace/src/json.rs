//! Tolerant JSON extraction from model output.

/// Extract the first valid top-level JSON object from text.
///
/// Models wrap JSON in code fences and prose; this scans for balanced
/// braces (string- and escape-aware) and returns the first candidate that
/// parses to an object.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(cleaned) {
        if value.is_object() {
            return Some(value);
        }
    }

    let bytes: Vec<char> = cleaned.chars().collect();
    for (start, ch) in bytes.iter().enumerate() {
        if *ch != '{' {
            continue;
        }
        let Some(end) = find_matching_brace(&bytes, start) else {
            continue;
        };
        let candidate: String = bytes[start..=end].iter().collect();
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&candidate) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    None
}

fn find_matching_brace(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (index, ch) in chars.iter().enumerate().skip(start) {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_object() {
        let value = extract_json_object(r#"{"operations": []}"#).unwrap();
        assert!(value["operations"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_code_fenced_object() {
        let text = "Here you go:\n```json\n{\"key\": \"value\"}\n```\nDone.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"prefix {"content": "use {braces} carefully", "n": 1} suffix"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_escaped_quotes() {
        let text = r#"{"content": "say \"hi\" politely"}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["content"], "say \"hi\" politely");
    }

    #[test]
    fn test_no_object() {
        assert!(extract_json_object("").is_none());
        assert!(extract_json_object("just words").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("{broken").is_none());
    }

    #[test]
    fn test_skips_invalid_candidates() {
        let text = "{not json} then {\"valid\": true}";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["valid"], true);
    }
}

//! Inline-XML tool-call extraction.
//!
//! Some models emit tool calls as XML tags inside ordinary content instead
//! of using the provider's native tool-call channel:
//!
//! ```text
//! <function=read_file><parameter=file_path>README.md</parameter></function>
//! ```
//!
//! The adapter buffers streamed content and, once the response is complete
//! and no native tool calls were seen, extracts these regions.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::ToolCall;

static FUNCTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<function=(\w+)>(.*?)</function>").unwrap());

static PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<parameter=(\w+)>\s*(.*?)\s*</parameter>").unwrap());

/// Parse XML-style tool calls out of model output.
///
/// Returns the content with tool-call regions removed (and stray
/// `</tool_call>` tags stripped) together with the extracted calls, in
/// document order. Call ids are synthesized as `call_0`, `call_1`, ….
/// Parameter values that look like booleans are coerced; everything else
/// stays a string. Content without any XML comes back unchanged with an
/// empty call list.
pub fn parse_xml_tool_calls(content: &str) -> (String, Vec<ToolCall>) {
    let mut tool_calls = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();

    for caps in FUNCTION_RE.captures_iter(content) {
        let whole = caps.get(0).unwrap();
        let func_name = caps.get(1).unwrap().as_str();
        let params_text = caps.get(2).unwrap().as_str();

        let mut params = serde_json::Map::new();
        for param in PARAM_RE.captures_iter(params_text) {
            let name = param.get(1).unwrap().as_str().to_string();
            let value = param.get(2).unwrap().as_str();
            params.insert(name, coerce_value(value));
        }

        tool_calls.push(ToolCall::new(
            format!("call_{}", tool_calls.len()),
            func_name,
            serde_json::Value::Object(params),
        ));
        spans.push((whole.start(), whole.end()));
    }

    let mut cleaned = content.to_string();
    for (start, end) in spans.into_iter().rev() {
        cleaned.replace_range(start..end, "");
    }
    cleaned = cleaned.replace("</tool_call>", "");

    (cleaned.trim().to_string(), tool_calls)
}

/// Booleans are the only non-string parameter type models reliably emit.
fn coerce_value(value: &str) -> serde_json::Value {
    if value.eq_ignore_ascii_case("true") {
        serde_json::Value::Bool(true)
    } else if value.eq_ignore_ascii_case("false") {
        serde_json::Value::Bool(false)
    } else {
        serde_json::Value::String(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_xml_returns_content_unchanged() {
        let (content, calls) = parse_xml_tool_calls("just a normal answer");
        assert_eq!(content, "just a normal answer");
        assert!(calls.is_empty());
    }

    #[test]
    fn test_single_call_stripped_from_content() {
        let input = "sure<function=read_file><parameter=file_path>README.md</parameter></function>done";
        let (content, calls) = parse_xml_tool_calls(input);
        assert_eq!(content, "suredone");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[0].arguments["file_path"], "README.md");
    }

    #[test]
    fn test_multiple_calls_in_order() {
        let input = "<function=list_files><parameter=directory>.</parameter></function>\
                     <function=read_file><parameter=file_path>a.rs</parameter></function>";
        let (content, calls) = parse_xml_tool_calls(input);
        assert_eq!(content, "");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "list_files");
        assert_eq!(calls[1].name, "read_file");
        assert_eq!(calls[1].id, "call_1");
    }

    #[test]
    fn test_boolean_coercion() {
        let input = "<function=list_files>\
                     <parameter=directory>src</parameter>\
                     <parameter=recursive>True</parameter>\
                     <parameter=hidden>FALSE</parameter>\
                     </function>";
        let (_, calls) = parse_xml_tool_calls(input);
        assert_eq!(calls[0].arguments["recursive"], true);
        assert_eq!(calls[0].arguments["hidden"], false);
        assert_eq!(calls[0].arguments["directory"], "src");
    }

    #[test]
    fn test_strips_stray_tool_call_tags() {
        let (content, calls) = parse_xml_tool_calls("answer</tool_call> text");
        assert_eq!(content, "answer text");
        assert!(calls.is_empty());
    }

    #[test]
    fn test_multiline_parameter_values_trimmed() {
        let input = "<function=write_file><parameter=content>\nline one\nline two\n</parameter></function>";
        let (_, calls) = parse_xml_tool_calls(input);
        assert_eq!(calls[0].arguments["content"], "line one\nline two");
    }
}

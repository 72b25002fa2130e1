use serde_json::Value;

use crate::error::GenerateError;

/// Parse the model reply into a JSON value, tolerating code fences and
/// prose around the object.
pub fn parse_llm_output(raw: &str) -> Result<Value, GenerateError> {
    let trimmed = strip_code_fence(raw.trim());
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Ok(value);
        }
    }
    let json_str = extract_json_object(trimmed).ok_or(GenerateError::NoJson)?;
    Ok(serde_json::from_str(json_str)?)
}

/// Extract the JSON object substring from raw LLM output.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    // Drop the info string ("json") on the opening line.
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_object() {
        let v = parse_llm_output(r#"{"elements": []}"#).unwrap();
        assert_eq!(v, json!({"elements": []}));
    }

    #[test]
    fn fenced_object() {
        let raw = "```json\n{\"elements\": [{\"id\": \"a\"}]}\n```";
        let v = parse_llm_output(raw).unwrap();
        assert_eq!(v["elements"][0]["id"], "a");
    }

    #[test]
    fn prose_around_object() {
        let raw = "Here is your diagram:\n{\"relationships\": []}\nLet me know if you need more.";
        let v = parse_llm_output(raw).unwrap();
        assert_eq!(v, json!({"relationships": []}));
    }

    #[test]
    fn no_object_is_an_error() {
        assert!(matches!(
            parse_llm_output("I cannot help with that."),
            Err(GenerateError::NoJson)
        ));
        assert!(matches!(parse_llm_output("[1, 2]"), Err(GenerateError::NoJson)));
    }

    #[test]
    fn broken_object_is_invalid_json() {
        assert!(matches!(
            parse_llm_output("{\"elements\": [}"),
            Err(GenerateError::InvalidJson(_))
        ));
    }
}

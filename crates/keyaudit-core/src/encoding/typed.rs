use serde_json::{Map, Value};

use super::plain::{decode_base64, encode_base64, validate_number};
use crate::error::EncodingError;
use crate::types::AttributeValue;

/// Render a value as a single-entry JSON object keyed by its type tag,
/// e.g. `{"S":"abc"}` or `{"NS":["1","2"]}`.
pub fn to_typed(value: &AttributeValue) -> String {
    let body = match value {
        AttributeValue::S(s) | AttributeValue::N(s) => Value::String(s.clone()),
        AttributeValue::B(b) => Value::String(encode_base64(b)),
        AttributeValue::Ss(v) | AttributeValue::Ns(v) => {
            Value::Array(v.iter().cloned().map(Value::String).collect())
        }
        AttributeValue::Bs(v) => Value::Array(
            v.iter()
                .map(|b| Value::String(encode_base64(b)))
                .collect(),
        ),
        AttributeValue::Other { text, .. } => Value::String(text.clone()),
    };
    let mut map = Map::new();
    map.insert(value.type_tag().to_string(), body);
    Value::Object(map).to_string()
}

/// Parse the output of [`to_typed`] back into a value.
///
/// Only key-able kinds and sets are accepted; other tags are rejected since
/// they cannot be used as expected values.
pub fn parse_typed(text: &str) -> Result<AttributeValue, EncodingError> {
    let parsed: Value = serde_json::from_str(text.trim())
        .map_err(|e| EncodingError::MalformedTyped(e.to_string()))?;
    let Value::Object(map) = parsed else {
        return Err(EncodingError::MalformedTyped(format!(
            "expected an object, got {text}"
        )));
    };
    if map.len() != 1 {
        return Err(EncodingError::MalformedTyped(format!(
            "expected exactly one type tag, got {}",
            map.len()
        )));
    }
    let Some((tag, body)) = map.into_iter().next() else {
        return Err(EncodingError::MalformedTyped(text.to_string()));
    };

    match tag.as_str() {
        "S" => Ok(AttributeValue::S(as_str(&tag, &body)?.to_string())),
        "N" => validate_number(as_str(&tag, &body)?).map(AttributeValue::N),
        "B" => decode_base64(as_str(&tag, &body)?).map(AttributeValue::B),
        "SS" => Ok(AttributeValue::Ss(strings(&tag, &body)?)),
        "NS" => strings(&tag, &body)?
            .iter()
            .map(|s| validate_number(s))
            .collect::<Result<_, _>>()
            .map(AttributeValue::Ns),
        "BS" => strings(&tag, &body)?
            .iter()
            .map(|s| decode_base64(s))
            .collect::<Result<_, _>>()
            .map(AttributeValue::Bs),
        _ => Err(EncodingError::InvalidTypeTag(tag)),
    }
}

fn as_str<'a>(tag: &str, body: &'a Value) -> Result<&'a str, EncodingError> {
    body.as_str()
        .ok_or_else(|| EncodingError::MalformedTyped(format!("{tag} body must be a string")))
}

fn strings(tag: &str, body: &Value) -> Result<Vec<String>, EncodingError> {
    let arr = body
        .as_array()
        .ok_or_else(|| EncodingError::MalformedTyped(format!("{tag} body must be an array")))?;
    arr.iter()
        .map(|v| as_str(tag, v).map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_format() {
        assert_eq!(to_typed(&AttributeValue::S("abc".into())), r#"{"S":"abc"}"#);
        assert_eq!(to_typed(&AttributeValue::N("12".into())), r#"{"N":"12"}"#);
        assert_eq!(
            to_typed(&AttributeValue::Ss(vec!["a".into(), "b".into()])),
            r#"{"SS":["a","b"]}"#
        );
        assert_eq!(to_typed(&AttributeValue::B(vec![1, 2, 3])), r#"{"B":"AQID"}"#);
    }

    #[test]
    fn test_typed_parse_keeps_type() {
        // A number recorded where a string was expected must come back as N.
        assert_eq!(
            parse_typed(r#"{"N":"7"}"#).unwrap(),
            AttributeValue::N("7".into())
        );
        assert_eq!(
            parse_typed(r#"{"BS":["AQID"]}"#).unwrap(),
            AttributeValue::Bs(vec![vec![1, 2, 3]])
        );
        let quoted = to_typed(&AttributeValue::S("say \"hi\", ok".into()));
        assert_eq!(
            parse_typed(&quoted).unwrap(),
            AttributeValue::S("say \"hi\", ok".into())
        );
    }

    #[test]
    fn test_typed_parse_errors() {
        match parse_typed("abc") {
            Err(EncodingError::MalformedTyped(_)) => {}
            other => panic!("expected MalformedTyped, got {other:?}"),
        }
        match parse_typed(r#"{"S":"a","N":"1"}"#) {
            Err(EncodingError::MalformedTyped(_)) => {}
            other => panic!("expected MalformedTyped, got {other:?}"),
        }
        match parse_typed(r#"{"BOOL":"true"}"#) {
            Err(EncodingError::InvalidTypeTag(tag)) => assert_eq!(tag, "BOOL"),
            other => panic!("expected InvalidTypeTag, got {other:?}"),
        }
        match parse_typed(r#"{"N":"x"}"#) {
            Err(EncodingError::InvalidNumber(_)) => {}
            other => panic!("expected InvalidNumber, got {other:?}"),
        }
        match parse_typed(r#"{"SS":"a"}"#) {
            Err(EncodingError::MalformedTyped(_)) => {}
            other => panic!("expected MalformedTyped, got {other:?}"),
        }
    }
}

//! Serde helpers that encode byte strings as standard base64 text.
//!
//! Keys and values are arbitrary bytes, but every persisted file and wire payload is JSON.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&STANDARD.encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let raw = String::deserialize(d)?;
    STANDARD
        .decode(raw.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// Same encoding for a set of byte strings.
pub mod set {
    use std::collections::BTreeSet;

    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &BTreeSet<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(items.iter().map(|item| STANDARD.encode(item)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeSet<Vec<u8>>, D::Error> {
        let raw = Vec::<String>::deserialize(d)?;
        raw.into_iter()
            .map(|item| {
                STANDARD
                    .decode(item.as_bytes())
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "crate::b64")]
        key: Vec<u8>,
    }

    #[test]
    fn bytes_are_base64_text_on_the_wire() {
        let holder = Holder {
            key: b"foo".to_vec(),
        };
        let value = serde_json::to_value(&holder).unwrap();
        assert_eq!(value, json!({ "key": "Zm9v" }));
        let back: Holder = serde_json::from_value(value).unwrap();
        assert_eq!(back, holder);
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = serde_json::from_value::<Holder>(json!({ "key": "***" })).unwrap_err();
        assert!(err.to_string().contains("Invalid"));
    }
}

//! Control messages posted to the worker by its pages.

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

/// A recognised control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Prefetch media into the current cache: `{"type": "CACHE_MEDIA", "urls": [...]}`.
    CacheMedia { urls: Vec<String> },
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Wire {
    #[serde(rename = "CACHE_MEDIA")]
    CacheMedia {
        #[serde(default)]
        urls: Value,
    },
}

impl ControlMessage {
    /// Parse message data. Anything unrecognised, including a
    /// `CACHE_MEDIA` without a non-empty `urls` array, yields `None`.
    /// Non-string entries in `urls` are skipped.
    pub fn parse(data: &Value) -> Option<Self> {
        let wire = match Wire::deserialize(data) {
            Ok(wire) => wire,
            Err(e) => {
                trace!(error = %e, "Unrecognised message");
                return None;
            }
        };

        match wire {
            Wire::CacheMedia { urls } => {
                let urls: Vec<String> = urls
                    .as_array()?
                    .iter()
                    .filter_map(|u| u.as_str().map(str::to_string))
                    .collect();
                if urls.is_empty() {
                    return None;
                }
                Some(ControlMessage::CacheMedia { urls })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_cache_media() {
        let msg = json!({
            "type": "CACHE_MEDIA",
            "urls": ["https://cdn.example/a.png", "https://cdn.example/b.mp4"]
        });
        assert_eq!(
            ControlMessage::parse(&msg),
            Some(ControlMessage::CacheMedia {
                urls: vec![
                    "https://cdn.example/a.png".into(),
                    "https://cdn.example/b.mp4".into()
                ]
            })
        );
    }

    #[test]
    fn test_ignored_messages() {
        for msg in [
            json!(null),
            json!("CACHE_MEDIA"),
            json!({}),
            json!({ "type": "SKIP_WAITING" }),
            json!({ "type": "CACHE_MEDIA" }),
            json!({ "type": "CACHE_MEDIA", "urls": [] }),
            json!({ "type": "CACHE_MEDIA", "urls": "https://cdn.example/a.png" }),
            json!({ "type": "cache_media", "urls": ["https://cdn.example/a.png"] }),
        ] {
            assert_eq!(ControlMessage::parse(&msg), None, "{msg}");
        }
    }

    #[test]
    fn test_extra_fields_and_non_strings() {
        let msg = json!({
            "type": "CACHE_MEDIA",
            "urls": [1, "https://cdn.example/a.png", null],
            "source": "gallery"
        });
        assert_eq!(
            ControlMessage::parse(&msg),
            Some(ControlMessage::CacheMedia {
                urls: vec!["https://cdn.example/a.png".into()]
            })
        );
    }
}

//! Topic naming rules.

use crate::hexutil;

/// Canonical private-message topic for a user: `hex(user_id) + "/pm"`.
/// Hex keeps arbitrary user IDs (emails, URIs) out of the broker's topic
/// grammar.
pub fn private_topic(user_id: &str) -> String {
    format!("{}/pm", hexutil::encode(user_id.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_topic_is_hex_plus_suffix() {
        assert_eq!(private_topic("alice"), "616c696365/pm");
    }

    #[test]
    fn ids_with_topic_metacharacters_stay_flat() {
        let topic = private_topic("evil/+/#user");
        assert!(!topic[..topic.len() - 3].contains('/'));
        assert!(!topic.contains('+'));
        assert!(!topic.contains('#'));
    }
}

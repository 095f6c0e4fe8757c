//! Chat message scanning and reaction validation.
//!
//! Messages are checked for a leading slash-command before broadcast; TTS
//! commands become `ttsMessage` events on the server, the other recognized
//! commands drive the sender's local toggles. Reactions are restricted to a
//! fixed emoji allowlist or a vetted asset path.

use crate::protocol::ReactionKind;

/// How long a reaction stays visible before the client expires it.
pub const REACTION_LIFETIME_MS: u64 = 4_000;

const EMOJI_ALLOWLIST: &[&str] = &[
    "👍", "👎", "👏", "🎉", "❤️", "😂", "😮", "🙌", "🔥", "✋",
];

const ASSET_PREFIX: &str = "/assets/reactions/";

/// Recognized leading slash-commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    ToggleMute,
    ToggleCamera,
    ToggleHand,
    Tts(String),
}

/// Scans a message for a leading slash-command. Non-command text (including
/// unknown `/words`) returns `None` and is delivered verbatim.
pub fn parse_command(text: &str) -> Option<ChatCommand> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix('/')?;
    let (word, tail) = match rest.split_once(char::is_whitespace) {
        Some((w, t)) => (w, t.trim()),
        None => (rest, ""),
    };
    match word {
        "mute" => Some(ChatCommand::ToggleMute),
        "cam" => Some(ChatCommand::ToggleCamera),
        "hand" => Some(ChatCommand::ToggleHand),
        "tts" if !tail.is_empty() => Some(ChatCommand::Tts(tail.to_string())),
        _ => None,
    }
}

/// Validates a reaction payload against the allowlists.
pub fn validate_reaction(kind: ReactionKind, value: &str) -> bool {
    match kind {
        ReactionKind::Emoji => EMOJI_ALLOWLIST.contains(&value),
        ReactionKind::Asset => {
            value.starts_with(ASSET_PREFIX)
                && !value.contains("..")
                && value.len() > ASSET_PREFIX.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(parse_command("/mute"), Some(ChatCommand::ToggleMute));
        assert_eq!(parse_command("  /cam  "), Some(ChatCommand::ToggleCamera));
        assert_eq!(parse_command("/hand"), Some(ChatCommand::ToggleHand));
        assert_eq!(
            parse_command("/tts hello there"),
            Some(ChatCommand::Tts("hello there".into()))
        );
    }

    #[test]
    fn test_non_commands_pass_through() {
        assert_eq!(parse_command("hello /mute"), None);
        assert_eq!(parse_command("/shrug"), None);
        assert_eq!(parse_command("/tts"), None);
        assert_eq!(parse_command("plain text"), None);
    }

    #[test]
    fn test_emoji_allowlist() {
        assert!(validate_reaction(ReactionKind::Emoji, "👍"));
        assert!(!validate_reaction(ReactionKind::Emoji, "🦊"));
        assert!(!validate_reaction(ReactionKind::Emoji, "<script>"));
    }

    #[test]
    fn test_asset_path_allowlist() {
        assert!(validate_reaction(
            ReactionKind::Asset,
            "/assets/reactions/confetti.webp"
        ));
        assert!(!validate_reaction(
            ReactionKind::Asset,
            "/assets/reactions/../../etc/passwd"
        ));
        assert!(!validate_reaction(ReactionKind::Asset, "/assets/reactions/"));
        assert!(!validate_reaction(ReactionKind::Asset, "/other/confetti.webp"));
    }
}

//! MarkdownV2 rendering of Telegram-formatted text.

use chanpost_core::TextEntity;

/// Escapes special characters for Telegram MarkdownV2 parse mode.
///
/// Telegram requires these characters to be escaped with a preceding backslash
/// when using MarkdownV2: `_`, `*`, `[`, `]`, `(`, `)`, `~`, `` ` ``, `>`,
/// `#`, `+`, `-`, `=`, `|`, `{`, `}`, `.`, `!`
pub fn escape_markdown_v2(text: &str) -> String {
    let mut result = String::with_capacity(text.len() * 2);
    for ch in text.chars() {
        push_escaped(&mut result, ch);
    }
    result
}

const SPECIAL: [char; 18] = [
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

fn push_escaped(out: &mut String, ch: char) {
    if SPECIAL.contains(&ch) {
        out.push('\\');
    }
    out.push(ch);
}

/// Render `text` with its formatting entities as MarkdownV2.
///
/// Entity offsets and lengths are UTF-16 code units. Entities that fall
/// outside the text, and kinds with no MarkdownV2 form (mentions, bare URLs,
/// hashtags...), leave the text plain.
pub fn entities_to_markdown(text: &str, entities: &[TextEntity]) -> String {
    let chars: Vec<char> = text.chars().collect();

    // UTF-16 unit index -> char index.
    let mut unit_to_char = Vec::with_capacity(text.len());
    for (i, ch) in chars.iter().enumerate() {
        for _ in 0..ch.len_utf16() {
            unit_to_char.push(i);
        }
    }

    let mut opens = vec![String::new(); chars.len()];
    let mut closes = vec![String::new(); chars.len()];

    for entity in entities {
        if entity.length == 0 {
            continue;
        }
        let (Some(&first), Some(&last)) = (
            unit_to_char.get(entity.offset),
            unit_to_char.get(entity.offset + entity.length - 1),
        ) else {
            tracing::debug!(kind = %entity.kind, offset = entity.offset, "entity out of range");
            continue;
        };

        let (open, close) = match entity.kind.as_str() {
            "italic" => ("_".to_string(), "_".to_string()),
            "bold" => ("*".to_string(), "*".to_string()),
            "strikethrough" => ("~".to_string(), "~".to_string()),
            "underline" => ("__".to_string(), "__".to_string()),
            "spoiler" => ("||".to_string(), "||".to_string()),
            "code" => ("`".to_string(), "`".to_string()),
            "pre" => ("```".to_string(), "```".to_string()),
            "text_link" => {
                let url = entity.url.as_deref().unwrap_or_default();
                ("[".to_string(), format!("]({})", escape_markdown_v2(url)))
            }
            "mention" | "url" | "hashtag" | "cashtag" | "bot_command" | "email"
            | "phone_number" => continue,
            other => {
                tracing::debug!(kind = other, "entity kind not supported");
                continue;
            }
        };
        opens[first].insert_str(0, &open);
        closes[last].push_str(&close);
    }

    let mut out = String::with_capacity(text.len() * 2);
    for (i, ch) in chars.into_iter().enumerate() {
        out.push_str(&opens[i]);
        push_escaped(&mut out, ch);
        out.push_str(&closes[i]);
    }
    out
}

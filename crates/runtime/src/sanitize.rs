//! Strips lightweight markup from model answers.
//!
//! The delivery channel renders plain text only, so a closed list of
//! markdown sequences is removed before an answer reaches the user. This is
//! a pure text transform, not a parser, and it is idempotent: running it
//! twice yields the same output as running it once.

use regex::Regex;
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
static ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*(.*?)\*").unwrap());
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`(.*?)`").unwrap());
static HEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s*").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(.*?)\]\(.*?\)").unwrap());
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Remove markdown sequences the channel cannot render.
///
/// Fenced code blocks are dropped entirely (before inline passes, so their
/// contents cannot leak as half-stripped markup); everything else keeps its
/// inner text.
pub fn strip_markup(text: &str) -> String {
    let text = FENCED_BLOCK.replace_all(text, "");
    let text = BOLD.replace_all(&text, "$1");
    let text = ITALIC.replace_all(&text, "$1");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = HEADER.replace_all(&text, "");
    let text = LINK.replace_all(&text, "$1");
    BLANK_LINES.replace_all(&text, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_inline_markup() {
        assert_eq!(strip_markup("**Paris** is *lovely* in `spring`"), "Paris is lovely in spring");
    }

    #[test]
    fn strips_headers_and_links() {
        let input = "## Top hotels\nSee [Hotel Lumière](https://example.com/h1) first";
        assert_eq!(strip_markup(input), "Top hotels\nSee Hotel Lumière first");
    }

    #[test]
    fn drops_fenced_blocks_and_collapses_blank_lines() {
        let input = "Before\n\n```json\n{\"a\": 1}\n```\n\n\n\nAfter";
        assert_eq!(strip_markup(input), "Before\n\nAfter");
    }

    #[test]
    fn plain_text_is_untouched()  {
        let input = "Flights from CDG - 420 USD, 2 stops.\n\nWeather: 18C";
        assert_eq!(strip_markup(input), input);
    }

    #[test]
    fn idempotent_on_mixed_input() {
        let inputs = [
            "**bold** and *italic* and `code`",
            "# Header\n[link](url)\n```\nfence\n```",
            "a ** stray opener, * single star, ` tick",
            "***nested* bold**",
        ];
        for input in inputs {
            let once = strip_markup(input);
            assert_eq!(strip_markup(&once), once, "not idempotent for {input:?}");
        }
    }
}

//! Markdown to HTML for user-authored content.
//!
//! On top of CommonMark (plus tables and strikethrough) the renderer turns
//! references into links:
//!
//! - `@alice` links to a user profile
//! - `#12` links to report 12
//! - `##34` links to post 34
//!
//! References are only recognised in plain text, never inside code, links
//! or image descriptions. Raw HTML from the input is shown as text, and
//! link or image destinations with a scheme other than http, https or
//! mailto are replaced by `#`.

use once_cell::sync::Lazy;
use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd, TextMergeStream};
use regex::Regex;

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@(?P<user>[A-Za-z0-9_]+(?:[.\-][A-Za-z0-9_]+)*)|##(?P<post>\d+)|#(?P<report>\d+)")
        .expect("reference pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference<'a> {
    User(&'a str),
    Report(i64),
    Post(i64),
}

#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    base_path: String,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new("")
    }
}

impl MarkdownRenderer {
    /// `base_path` is prefixed to every generated link, e.g. `/bugger`.
    pub fn new(base_path: &str) -> Self {
        Self {
            base_path: base_path.trim_end_matches('/').to_string(),
        }
    }

    pub fn render(&self, markdown: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);

        let parser = TextMergeStream::new(Parser::new_ext(markdown, options));
        let mut events = Vec::new();
        // Depth of constructs whose text must not be rewritten.
        let mut literal_depth = 0usize;

        for event in parser {
            match event {
                Event::Start(tag) => {
                    if matches!(
                        tag,
                        Tag::CodeBlock(_) | Tag::Link { .. } | Tag::Image { .. }
                    ) {
                        literal_depth += 1;
                    }
                    events.push(Event::Start(neutralize_destination(tag)));
                }
                Event::End(tag) => {
                    if matches!(tag, TagEnd::CodeBlock | TagEnd::Link | TagEnd::Image) {
                        literal_depth = literal_depth.saturating_sub(1);
                    }
                    events.push(Event::End(tag));
                }
                Event::Html(raw) | Event::InlineHtml(raw) => events.push(Event::Text(raw)),
                Event::Text(text) if literal_depth == 0 => self.link_references(text, &mut events),
                other => events.push(other),
            }
        }

        let mut output = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut output, events.into_iter());
        output
    }

    fn link_references<'a>(&self, text: CowStr<'a>, events: &mut Vec<Event<'a>>) {
        let links: Vec<_> = find_references(&text)
            .into_iter()
            .map(|(range, reference)| (range, self.href(&reference)))
            .collect();
        if links.is_empty() {
            events.push(Event::Text(text));
            return;
        }

        let mut cursor = 0;
        for (range, href) in links {
            if range.start > cursor {
                events.push(Event::Text(CowStr::from(text[cursor..range.start].to_string())));
            }
            events.push(Event::InlineHtml(CowStr::from(format!(
                "<a href=\"{}\" class=\"reference\">",
                href
            ))));
            events.push(Event::Text(CowStr::from(text[range.clone()].to_string())));
            events.push(Event::InlineHtml(CowStr::Borrowed("</a>")));
            cursor = range.end;
        }
        if cursor < text.len() {
            events.push(Event::Text(CowStr::from(text[cursor..].to_string())));
        }
    }

    fn href(&self, reference: &Reference<'_>) -> String {
        match reference {
            Reference::User(name) => format!("{}/users/{}", self.base_path, name),
            Reference::Report(id) => format!("{}/reports/{}", self.base_path, id),
            Reference::Post(id) => format!("{}/posts/{}", self.base_path, id),
        }
    }
}

const SAFE_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Whether a link destination is relative or uses an allowed scheme.
/// Whitespace and control characters are ignored the way browsers do.
pub fn is_safe_destination(url: &str) -> bool {
    let cleaned: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();
    match cleaned.find([':', '/', '?', '#']) {
        Some(index) if cleaned[index..].starts_with(':') => {
            let scheme = &cleaned[..index];
            SAFE_SCHEMES
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(scheme))
        }
        _ => true,
    }
}

fn neutralize_destination(tag: Tag<'_>) -> Tag<'_> {
    match tag {
        Tag::Link { link_type, dest_url, title, id } if !is_safe_destination(&dest_url) => Tag::Link {
            link_type,
            dest_url: CowStr::Borrowed("#"),
            title,
            id,
        },
        Tag::Image { link_type, dest_url, title, id } if !is_safe_destination(&dest_url) => Tag::Image {
            link_type,
            dest_url: CowStr::Borrowed("#"),
            title,
            id,
        },
        other => other,
    }
}

/// Locate references in plain text. A reference has to start the text or
/// follow a character that is not part of a word.
pub fn find_references(text: &str) -> Vec<(std::ops::Range<usize>, Reference<'_>)> {
    REFERENCE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let preceded_by_word = text[..whole.start()]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '#' || c == '@');
            if preceded_by_word {
                return None;
            }

            let reference = if let Some(user) = caps.name("user") {
                Reference::User(user.as_str())
            } else if let Some(post) = caps.name("post") {
                Reference::Post(post.as_str().parse().ok()?)
            } else {
                Reference::Report(caps.name("report")?.as_str().parse().ok()?)
            };
            Some((whole.range(), reference))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(markdown: &str) -> String {
        MarkdownRenderer::new("/bugger/").render(markdown)
    }

    #[test]
    fn test_plain_markdown() {
        let html = render("Some *emphasis* and `code`");
        assert_eq!(
            html,
            "<p>Some <em>emphasis</em> and <code>code</code></p>\n"
        );
    }

    #[test]
    fn test_references_become_links() {
        let html = render("Ask @jane.doe about #12 and ##345.");
        assert!(html.contains("<a href=\"/bugger/users/jane.doe\" class=\"reference\">@jane.doe</a>"));
        assert!(html.contains("<a href=\"/bugger/reports/12\" class=\"reference\">#12</a>"));
        assert!(html.contains("<a href=\"/bugger/posts/345\" class=\"reference\">##345</a>"));
        assert!(html.ends_with(".</p>\n"));
    }

    #[test]
    fn test_references_ignored_in_code_and_links() {
        let html = render("`#12` and [see @bob](https://example.com)\n\n```\n@alice #3\n```");
        assert!(!html.contains("/reports/12"));
        assert!(!html.contains("/users/bob"));
        assert!(!html.contains("/users/alice"));
        assert!(!html.contains("/reports/3"));
    }

    #[test]
    fn test_email_and_word_suffix_not_references() {
        let refs = find_references("mail me at jane@example.com, issue abc#4");
        assert!(refs.is_empty());
    }

    #[test]
    fn test_find_references() {
        let refs = find_references("(@a_b) #7 ##8");
        let found: Vec<_> = refs.into_iter().map(|(_, r)| r).collect();
        assert_eq!(
            found,
            vec![Reference::User("a_b"), Reference::Report(7), Reference::Post(8)]
        );
    }

    #[test]
    fn test_trailing_punctuation_not_in_username() {
        let refs = find_references("thanks @bob.");
        assert_eq!(refs[0].1, Reference::User("bob"));
    }

    #[test]
    fn test_raw_html_is_escaped() {
        let html = render("<script>alert(1)</script>\n\nhello <b>world</b>");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&lt;b&gt;world&lt;/b&gt;"));
    }

    #[test]
    fn test_headings_still_work() {
        let html = render("## Steps\n\n#12 breaks");
        assert!(html.starts_with("<h2>Steps</h2>"));
        assert!(html.contains("/bugger/reports/12"));
    }

    #[test]
    fn test_tables_enabled() {
        let html = render("| a | b |\n|---|---|\n| 1 | 2 |");
        assert!(html.contains("<table>"));
    }

    #[test]
    fn test_script_destinations_are_neutralized() {
        let html = render("[click](javascript:alert(document.cookie)) ![x](JavaScript:alert(1)) <vbscript:msgbox>");
        let lowered = html.to_lowercase();
        assert!(!lowered.contains("href=\"javascript"));
        assert!(!lowered.contains("src=\"javascript"));
        assert!(!lowered.contains("href=\"vbscript"));
        assert!(html.contains("<a href=\"#\">click</a>"));
        assert!(html.contains("<img src=\"#\" alt=\"x\" />"));
        assert!(html.contains("<a href=\"#\">vbscript:msgbox</a>"));
    }

    #[test]
    fn test_safe_destinations_are_kept() {
        let html = render("[docs](https://example.com/a?b=1) [mail](mailto:bugs@example.com) [rel](../reports/3#top)");
        assert!(html.contains("href=\"https://example.com/a?b=1\""));
        assert!(html.contains("href=\"mailto:bugs@example.com\""));
        assert!(html.contains("href=\"../reports/3#top\""));
    }

    #[test]
    fn test_is_safe_destination() {
        assert!(is_safe_destination("/reports/1"));
        assert!(is_safe_destination("HTTPS://example.com"));
        assert!(is_safe_destination("page?x=a:b"));
        assert!(!is_safe_destination("java\tscript:alert(1)"));
        assert!(!is_safe_destination("data:text/html,hi"));
    }
}

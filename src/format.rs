use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

// Runs after newline substitution, so fence line breaks are `<br>` markers here.
static BLOCK_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([\w+#.-]*)(?:<br>)?(.*?)```").expect("block fence pattern")
});

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("inline code pattern"));

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Turns untrusted message text into transcript markup.
///
/// Everything is escaped first. Newlines become `<br>`, fenced blocks become
/// `<pre><code class="language-…">` with their own newlines restored, and
/// single-backtick spans outside those blocks become `<code>`. A fence with
/// no closing backticks is left as literal text.
pub fn format(raw: &str) -> String {
    let text = escape_html(raw).replace('\n', "<br>");
    let mut out = String::with_capacity(text.len() + 32);
    let mut last = 0;

    for caps in BLOCK_FENCE.captures_iter(&text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&format_inline(&text[last..whole.start()]));

        let lang = caps
            .get(1)
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("text");
        let body = caps.get(2).map_or("", |m| m.as_str()).replace("<br>", "\n");
        let body = body.strip_suffix('\n').unwrap_or(&body);
        out.push_str(&format!(
            "<pre><code class=\"language-{lang}\">{body}</code></pre>"
        ));
        last = whole.end();
    }
    out.push_str(&format_inline(&text[last..]));
    out
}

fn format_inline(segment: &str) -> String {
    INLINE_CODE
        .replace_all(segment, "<code>$1</code>")
        .into_owned()
}

/// Pretty JSON dump of a tool argument value, escaped for embedding.
pub fn format_arguments(value: &Value) -> String {
    escape_html(&dump_arguments(value))
}

pub fn dump_arguments(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn script_tags_are_escaped() {
        let out = format("hi <script>alert('x')</script>");
        assert!(!out.contains("<script>"));
        assert!(out.contains("&lt;script&gt;"));
        assert!(out.contains("&#39;x&#39;"));
    }

    #[test]
    fn inline_code_wraps_literal_text() {
        assert_eq!(format("`inline`"), "<code>inline</code>");
        assert_eq!(format("use `cargo` now"), "use <code>cargo</code> now");
    }

    #[test]
    fn fenced_block_tagged_with_language() {
        assert_eq!(
            format("```js\ncode\n```"),
            "<pre><code class=\"language-js\">code</code></pre>"
        );
    }

    #[test]
    fn fenced_block_defaults_to_text_and_keeps_lines() {
        let out = format("before\n```\nlet a = 1;\nlet b = `x`;\n```\nafter");
        assert_eq!(
            out,
            "before<br><pre><code class=\"language-text\">let a = 1;\nlet b = `x`;</code></pre><br>after"
        );
    }

    #[test]
    fn block_body_is_escaped_once() {
        let out = format("```html\n<b>&amp;</b>\n```");
        assert_eq!(
            out,
            "<pre><code class=\"language-html\">&lt;b&gt;&amp;amp;&lt;/b&gt;</code></pre>"
        );
    }

    #[test]
    fn unterminated_fence_stays_literal() {
        assert_eq!(format("```rust\nfn main()"), "```rust<br>fn main()");
    }

    #[test]
    fn inline_rule_still_applies_after_unterminated_fence() {
        // the fence is not a block, so its backticks pair up like any others
        assert_eq!(
            format("```rust\nlet a = `x`;"),
            "``<code>rust<br>let a = </code>x`;"
        );
    }

    #[test]
    fn newlines_become_breaks() {
        assert_eq!(format("a\nb\n"), "a<br>b<br>");
    }

    #[test]
    fn arguments_dump_is_pretty_and_escaped() {
        let out = format_arguments(&json!({"x": 1, "q": "<i>"}));
        assert!(out.contains("&quot;x&quot;: 1"));
        assert!(out.contains("&lt;i&gt;"));
        assert!(!out.contains("<i>"));
    }
}

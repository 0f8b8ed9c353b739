//! Content formatting
//!
//! Converts the Markdown subset agents produce into Telegram-style HTML and
//! splits the result into messages no longer than the channel's limit.
//! Splits never land inside a tag or an entity, and every chunk is balanced:
//! tags left open at a cut are closed at the end of the chunk and re-opened
//! at the start of the next one.

/// Tags that must be balanced within a single message
const STRUCTURAL_TAGS: &[&str] = &[
    "b",
    "strong",
    "i",
    "em",
    "u",
    "ins",
    "s",
    "strike",
    "del",
    "code",
    "pre",
    "a",
    "blockquote",
    "span",
    "tg-spoiler",
];

/// Longest entity considered when refusing to cut (`&#x1F600;` and friends)
const MAX_ENTITY_LEN: usize = 10;

/// Escape the characters reserved by the HTML parse mode
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        push_escaped(&mut out, c);
    }
    out
}

fn escape_attr(text: &str) -> String {
    escape_html(text).replace('"', "&quot;")
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        _ => out.push(c),
    }
}

/// Convert a Markdown subset into HTML
///
/// Block level: fenced code, `>` quotes, `#` headings, `-`/`*`/`+` bullets.
/// Inline: code spans, links, bold, italic, strikethrough. Anything that
/// does not form a complete construct is kept as escaped text.
pub fn convert_markup(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];

        if let Some(info) = line.trim_start().strip_prefix("```") {
            let lang = info.split_whitespace().next().unwrap_or("");
            let mut body = Vec::new();
            i += 1;
            while i < lines.len() && !lines[i].trim_start().starts_with("```") {
                body.push(lines[i]);
                i += 1;
            }
            // Skip the closing fence; an unterminated block runs to the end
            i += 1;

            let code = escape_html(&body.join("\n"));
            if lang.is_empty() {
                out.push(format!("<pre><code>{}</code></pre>", code));
            } else {
                out.push(format!(
                    "<pre><code class=\"language-{}\">{}</code></pre>",
                    escape_attr(lang),
                    code
                ));
            }
            continue;
        }

        if quote_body(line).is_some() {
            let mut quoted = Vec::new();
            while let Some(body) = lines.get(i).and_then(|l| quote_body(l)) {
                quoted.push(convert_inline(body));
                i += 1;
            }
            out.push(format!("<blockquote>{}</blockquote>", quoted.join("\n")));
            continue;
        }

        if let Some(title) = heading_text(line) {
            out.push(format!("<b>{}</b>", convert_inline(title)));
        } else if let Some((indent, item)) = bullet_item(line) {
            out.push(format!("{}• {}", indent, convert_inline(item)));
        } else {
            out.push(convert_inline(line));
        }
        i += 1;
    }

    out.join("\n")
}

fn quote_body(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('>')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn heading_text(line: &str) -> Option<&str> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = line[hashes..].strip_prefix(' ')?;
    Some(rest.trim())
}

fn bullet_item(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start();
    let indent = &line[..line.len() - rest.len()];
    ["- ", "* ", "+ "]
        .iter()
        .find_map(|marker| rest.strip_prefix(marker))
        .map(|item| (indent, item))
}

/// Convert inline constructs of a single line
fn convert_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut rest = text;
    let mut prev: Option<char> = None;

    while let Some(c) = rest.chars().next() {
        if let Some((html, consumed)) = inline_span(rest, prev) {
            out.push_str(&html);
            prev = rest[..consumed].chars().next_back();
            rest = &rest[consumed..];
            continue;
        }
        push_escaped(&mut out, c);
        prev = Some(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Try to match an inline construct at the start of `rest`
///
/// Returns the rendered HTML and the number of bytes consumed.
fn inline_span(rest: &str, prev: Option<char>) -> Option<(String, usize)> {
    if let Some(after) = rest.strip_prefix('`') {
        let end = after.find('`').filter(|&end| end > 0)?;
        let html = format!("<code>{}</code>", escape_html(&after[..end]));
        return Some((html, end + 2));
    }

    if rest.starts_with('[') {
        return link_span(rest);
    }

    for (marker, tag) in [("**", "b"), ("__", "b"), ("~~", "s")] {
        if rest.starts_with(marker) {
            if let Some(span) = delimited(rest, marker, tag, prev) {
                return Some(span);
            }
        }
    }

    for (marker, tag) in [("*", "i"), ("_", "i")] {
        if rest.starts_with(marker) {
            return delimited(rest, marker, tag, prev);
        }
    }
    None
}

fn link_span(rest: &str) -> Option<(String, usize)> {
    let close = rest.find(']')?;
    let label = &rest[1..close];
    let target = rest[close + 1..].strip_prefix('(')?;
    let end = target.find(')')?;
    let url = &target[..end];
    if label.is_empty() || url.is_empty() || url.contains(char::is_whitespace) {
        return None;
    }
    let html = format!(
        "<a href=\"{}\">{}</a>",
        escape_attr(url),
        convert_inline(label)
    );
    // `[` + label + `](` + url + `)`
    Some((html, close + 2 + end + 1))
}

/// Match `marker inner marker` with flanking rules
fn delimited(rest: &str, marker: &str, tag: &str, prev: Option<char>) -> Option<(String, usize)> {
    let underscore = marker.starts_with('_');
    if underscore && prev.is_some_and(|c| c.is_alphanumeric()) {
        return None;
    }

    let after = &rest[marker.len()..];
    let first = after.chars().next()?;
    if first.is_whitespace() || (marker.len() == 1 && marker.starts_with(first)) {
        return None;
    }

    let mut search_from = 0;
    loop {
        let end = search_from + after[search_from..].find(marker)?;
        let inner = &after[..end];
        let next = after[end + marker.len()..].chars().next();

        let closes = !inner.is_empty()
            && !inner.ends_with(char::is_whitespace)
            // A single marker must not be half of a double one
            && !(marker.len() == 1 && next.is_some_and(|c| marker.starts_with(c)))
            && !(underscore && next.is_some_and(|c| c.is_alphanumeric()));

        if closes {
            let html = format!("<{tag}>{}</{tag}>", convert_inline(inner), tag = tag);
            return Some((html, marker.len() * 2 + end));
        }
        search_from = end + marker.len();
    }
}

/// One piece of a split message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Opening tags carried over from the previous chunk
    pub reopened: String,
    /// Slice of the original text
    pub body: String,
    /// Closing tags for everything still open at the cut
    pub closed: String,
}

impl Chunk {
    /// The chunk as it is sent
    pub fn render(&self) -> String {
        format!("{}{}{}", self.reopened, self.body, self.closed)
    }

    pub fn len(&self) -> usize {
        self.reopened.len() + self.body.len() + self.closed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct OpenTag {
    name: String,
    /// Full opening tag, attributes included
    open: String,
}

/// Split HTML into balanced chunks of at most `limit` bytes
///
/// Concatenating the bodies yields the input. A `limit` of zero disables
/// splitting.
pub fn split_chunks(text: &str, limit: usize) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }
    if limit == 0 || text.len() <= limit {
        return vec![Chunk {
            body: text.to_string(),
            ..Default::default()
        }];
    }

    let mut chunks = Vec::new();
    let mut open: Vec<OpenTag> = Vec::new();
    let mut pos = 0;

    while pos < text.len() {
        let remaining = &text[pos..];
        let reopened: String = open.iter().map(|t| t.open.as_str()).collect();

        if reopened.len() + remaining.len() <= limit {
            chunks.push(Chunk {
                reopened,
                body: remaining.to_string(),
                closed: String::new(),
            });
            break;
        }

        let mut budget = limit.saturating_sub(reopened.len());
        let mut placed = None;
        while budget > 0 {
            let cut = choose_cut(remaining, budget);
            if cut == 0 {
                break;
            }
            let body = &remaining[..cut];
            let still_open = track_tags(open.clone(), body);
            let closed: String = still_open
                .iter()
                .rev()
                .map(|t| format!("</{}>", t.name))
                .collect();

            let total = reopened.len() + cut + closed.len();
            if total <= limit {
                placed = Some((cut, closed, still_open));
                break;
            }
            budget = cut.saturating_sub(total - limit).min(budget - 1);
        }

        match placed {
            Some((cut, closed, still_open)) => {
                chunks.push(Chunk {
                    reopened,
                    body: remaining[..cut].to_string(),
                    closed,
                });
                open = still_open;
                pos += cut;
            }
            None => {
                // Nesting too deep for the limit: hard cut without rebalancing
                let cut = hard_cut(remaining, limit);
                tracing::warn!(limit, "Cannot balance chunk within limit, cutting raw");
                chunks.push(Chunk {
                    body: remaining[..cut].to_string(),
                    ..Default::default()
                });
                open.clear();
                pos += cut;
            }
        }
    }

    chunks
}

/// Split HTML into rendered messages of at most `limit` bytes
pub fn split_content(text: &str, limit: usize) -> Vec<String> {
    split_chunks(text, limit).iter().map(Chunk::render).collect()
}

/// Names of tags left open at the end of `html`, outermost first
pub fn unclosed_tags(html: &str) -> Vec<String> {
    track_tags(Vec::new(), html)
        .into_iter()
        .map(|t| t.name)
        .collect()
}

/// Pick a cut offset within the first `budget` bytes of `text`
///
/// Prefers a blank line, then a newline, then a space, each only past the
/// midpoint of the window; falls back to the last char boundary.
fn choose_cut(text: &str, budget: usize) -> usize {
    let max = floor_char_boundary(text, budget.min(text.len()));
    if max == 0 {
        return 0;
    }
    let window = &text[..max];
    let mid = max / 2;

    let cut = window
        .rfind("\n\n")
        .filter(|&i| i >= mid)
        .map(|i| i + 2)
        .or_else(|| window.rfind('\n').filter(|&i| i >= mid).map(|i| i + 1))
        .or_else(|| window.rfind(' ').filter(|&i| i >= mid).map(|i| i + 1))
        .unwrap_or(max);

    avoid_markup(text, cut)
}

/// Move a cut out of any tag or entity it falls into
fn avoid_markup(text: &str, mut cut: usize) -> usize {
    let before = &text[..cut];
    if let Some(lt) = before.rfind('<') {
        if !before[lt..].contains('>') {
            cut = if lt > 0 {
                lt
            } else {
                text.find('>').map(|gt| gt + 1).unwrap_or(text.len())
            };
        }
    }

    let before = &text[..cut];
    if let Some(amp) = before.rfind('&') {
        let tail = &before[amp + 1..];
        let partial = tail.len() < MAX_ENTITY_LEN
            && tail.chars().all(|c| c.is_ascii_alphanumeric() || c == '#')
            && text[cut..].find(';').is_some_and(|semi| tail.len() + semi < MAX_ENTITY_LEN);
        if partial {
            cut = if amp > 0 {
                amp
            } else {
                text.find(';').map(|semi| semi + 1).unwrap_or(text.len())
            };
        }
    }
    cut
}

fn hard_cut(text: &str, limit: usize) -> usize {
    let cut = floor_char_boundary(text, limit.min(text.len()));
    if cut > 0 {
        return cut;
    }
    text.chars().next().map(char::len_utf8).unwrap_or(text.len())
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Apply the tags found in `html` to a stack of open tags
fn track_tags(mut open: Vec<OpenTag>, html: &str) -> Vec<OpenTag> {
    let mut rest = html;
    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start..].find('>') else {
            break;
        };
        let tag = &rest[start..start + len + 1];
        rest = &rest[start + len + 1..];

        if let Some(name) = tag.strip_prefix("</") {
            let name = tag_name(name);
            if let Some(idx) = open.iter().rposition(|t| t.name == name) {
                open.remove(idx);
            }
            continue;
        }
        if tag.ends_with("/>") {
            continue;
        }
        let name = tag_name(&tag[1..]);
        if STRUCTURAL_TAGS.contains(&name.as_str()) {
            open.push(OpenTag {
                name,
                open: tag.to_string(),
            });
        }
    }
    open
}

fn tag_name(text: &str) -> String {
    text.chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Converts Markdown and splits it for a channel with a message limit
#[derive(Debug, Clone, Copy)]
pub struct ContentFormatter {
    pub limit: usize,
}

impl Default for ContentFormatter {
    fn default() -> Self {
        Self { limit: 4096 }
    }
}

impl ContentFormatter {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    /// Markdown in, sendable HTML messages out
    pub fn render(&self, markdown: &str) -> Vec<String> {
        split_content(&convert_markup(markdown), self.limit)
    }
}

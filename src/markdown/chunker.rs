const FENCE: &str = "```";
// room for a synthetic "\n```" appended when a cut lands inside a code block
const CLOSE_RESERVE: usize = 4;

#[derive(Debug)]
struct Line<'a> {
    text: &'a str,
    opens: bool,
    closes: bool,
    // language of the block this line belongs to or opens
    lang: Option<&'a str>,
}

fn annotate<'a>(content: &'a str) -> Vec<Line<'a>> {
    let mut lines = Vec::new();
    let mut open_lang: Option<&'a str> = None;

    for text in content.lines() {
        let trimmed = text.trim();
        if let Some(rest) = trimmed.strip_prefix(FENCE) {
            if open_lang.is_some() {
                lines.push(Line {
                    text,
                    opens: false,
                    closes: true,
                    lang: open_lang,
                });
                open_lang = None;
            } else {
                let lang = rest.trim();
                open_lang = Some(lang);
                lines.push(Line {
                    text,
                    opens: true,
                    closes: false,
                    lang: Some(lang),
                });
            }
        } else {
            lines.push(Line {
                text,
                opens: false,
                closes: false,
                lang: open_lang,
            });
        }
    }

    lines
}

/// Escape literal back-ticks inside fenced code blocks so Discord does not
/// terminate the block early. Fence lines themselves are left intact, and
/// already-escaped back-ticks are not escaped twice.
pub fn escape_backticks_in_code_blocks(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut in_block = false;

    for (i, line) in content.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }

        if line.trim().starts_with(FENCE) {
            in_block = !in_block;
            out.push_str(line);
            continue;
        }

        if !in_block {
            out.push_str(line);
            continue;
        }

        let mut prev = '\0';
        for ch in line.chars() {
            if ch == '`' && prev != '\\' {
                out.push('\\');
            }
            out.push(ch);
            prev = ch;
        }
    }

    if content.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Split markdown into chunks of at most `max_len` characters. A fenced code
/// block cut by a chunk boundary is closed at the end of the first chunk and
/// reopened with its original language fence at the start of the next, so
/// every chunk renders as self-contained markdown.
pub fn split_for_discord(content: &str, max_len: usize) -> Vec<String> {
    if content.chars().count() <= max_len {
        return vec![content.to_string()];
    }

    let escaped = escape_backticks_in_code_blocks(content);
    let lines = annotate(&escaped);

    let mut chunks: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut cur_chars = 0usize;
    // language of the block the tail of `cur` sits inside
    let mut open_lang: Option<String> = None;
    // true once a source line (not a synthetic reopen fence) is in `cur`
    let mut has_source = false;
    // byte offset in `cur` of an opening fence that nothing follows yet
    let mut dangling_fence_at: Option<usize> = None;

    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        let line_chars = line.text.chars().count();
        let sep = usize::from(!cur.is_empty());

        let next_open = if line.closes {
            None
        } else if line.opens {
            line.lang.map(|l| l.to_string())
        } else {
            open_lang.clone()
        };
        let reserve = if next_open.is_some() { CLOSE_RESERVE } else { 0 };

        if cur_chars + sep + line_chars + reserve <= max_len {
            let at = cur.len() + usize::from(sep == 1);
            if sep == 1 {
                cur.push('\n');
            }
            cur.push_str(line.text);
            cur_chars += sep + line_chars;
            dangling_fence_at = line.opens.then_some(at);
            has_source = true;
            open_lang = next_open;
            i += 1;
            continue;
        }

        if !has_source {
            // single line longer than a chunk; hard-split it
            cur.clear();
            chunks.extend(hard_split(line.text, max_len, open_lang.as_deref()));
            open_lang = next_open;
            match &open_lang {
                Some(lang) => {
                    cur = format!("```{lang}");
                    cur_chars = cur.chars().count();
                }
                None => cur_chars = 0,
            }
            i += 1;
            continue;
        }

        // never leave an opening fence dangling at the tail of a chunk
        if let Some(at) = dangling_fence_at.take() {
            if at > 0 {
                let fence_chars = cur[at..].chars().count();
                cur.truncate(at - 1);
                cur_chars -= fence_chars + 1;
                open_lang = None;
                i -= 1;
            }
        }

        if open_lang.is_some() {
            cur.push_str("\n```");
        }
        chunks.push(std::mem::take(&mut cur));

        match &open_lang {
            Some(lang) => {
                cur = format!("```{lang}");
                cur_chars = cur.chars().count();
            }
            None => cur_chars = 0,
        }
        has_source = false;
        dangling_fence_at = None;
    }

    if !cur.is_empty() && has_source {
        if open_lang.is_some() {
            cur.push_str("\n```");
        }
        chunks.push(cur);
    }

    chunks.retain(|c| !c.trim().is_empty());
    if chunks.is_empty() {
        chunks.push(escaped.chars().take(max_len).collect());
    }
    chunks
}

fn hard_split(line: &str, max_len: usize, lang: Option<&str>) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    let (prefix, reserve) = match lang {
        Some(l) => (format!("```{l}\n"), CLOSE_RESERVE),
        None => (String::new(), 0),
    };
    let prefix_chars = prefix.chars().count();

    for ch in line.chars() {
        if prefix_chars + buf_chars + 1 + reserve > max_len {
            let mut piece = prefix.clone();
            piece.push_str(&buf);
            if lang.is_some() {
                piece.push_str("\n```");
            }
            pieces.push(piece);
            buf.clear();
            buf_chars = 0;
        }
        buf.push(ch);
        buf_chars += 1;
    }

    if !buf.is_empty() {
        let mut piece = prefix.clone();
        piece.push_str(&buf);
        if lang.is_some() {
            piece.push_str("\n```");
        }
        pieces.push(piece);
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fence_count(s: &str) -> usize {
        s.lines().filter(|l| l.trim().starts_with("```")).count()
    }

    #[test]
    fn short_content_is_untouched() {
        let content = "hello `world`\n```rs\nlet x = 1;\n```";
        assert_eq!(split_for_discord(content, 2000), vec![content.to_string()]);
    }

    #[test]
    fn content_exactly_max_len_is_one_chunk() {
        let content = "a".repeat(50);
        assert_eq!(split_for_discord(&content, 50), vec![content.clone()]);
    }

    #[test]
    fn chunks_respect_max_len() {
        let mut content = String::new();
        for i in 0..120 {
            content.push_str(&format!("line number {i} with some padding text\n"));
        }
        for chunk in split_for_discord(&content, 200) {
            assert!(chunk.chars().count() <= 200, "oversized chunk: {chunk:?}");
        }
    }

    #[test]
    fn code_block_is_closed_and_reopened_across_cut() {
        let mut content = String::from("```typescript\n");
        for i in 0..80 {
            content.push_str(&format!("const value{i} = {i};\n"));
        }
        content.push_str("```\n");

        let chunks = split_for_discord(&content, 300);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert_eq!(fence_count(chunk) % 2, 0, "unbalanced fences in {chunk:?}");
            assert!(chunk.starts_with("```typescript"), "lost language: {chunk:?}");
            assert!(chunk.trim_end().ends_with("```"));
        }
    }

    #[test]
    fn cut_on_closing_fence_leaves_next_chunk_plain() {
        let mut content = String::from("```rs\n");
        for _ in 0..20 {
            content.push_str("let n = 42;\n");
        }
        content.push_str("```\n");
        for _ in 0..20 {
            content.push_str("plain text after the block\n");
        }

        let chunks = split_for_discord(&content, 260);
        let plain = chunks
            .iter()
            .find(|c| c.contains("plain text after the block"))
            .unwrap();
        // a chunk of prose must not have been wrapped in a reopened fence
        if !plain.contains("let n") {
            assert_eq!(fence_count(plain), 0);
        }
    }

    #[test]
    fn opening_fence_is_not_left_dangling() {
        let mut content = String::new();
        // prose sized so the fence lands exactly at a chunk tail
        for _ in 0..6 {
            content.push_str("some leading prose text here\n");
        }
        content.push_str("```python\n");
        for _ in 0..20 {
            content.push_str("print('hello')\n");
        }
        content.push_str("```\n");

        for max_len in [120, 150, 180, 210] {
            for chunk in split_for_discord(&content, max_len) {
                assert_eq!(fence_count(chunk) % 2, 0, "dangling fence at {max_len}: {chunk:?}");
            }
        }
    }

    #[test]
    fn concatenation_preserves_content_outside_injected_fences() {
        let mut content = String::new();
        for i in 0..40 {
            content.push_str(&format!("word{i} "));
        }
        content.push('\n');
        content.push_str("```go\n");
        for i in 0..40 {
            content.push_str(&format!("x{i} := {i}\n"));
        }
        content.push_str("```");

        let chunks = split_for_discord(&content, 220);
        let mut joined = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let mut c = chunk.as_str();
            if i > 0 {
                c = c.strip_prefix("```go\n").unwrap_or(c);
            }
            if i + 1 < chunks.len() {
                c = c.strip_suffix("\n```").unwrap_or(c);
            }
            if i > 0 {
                joined.push('\n');
            }
            joined.push_str(c);
        }
        for i in 0..40 {
            assert!(joined.contains(&format!("x{i} := {i}")));
        }
    }

    #[test]
    fn escape_adds_backslash_inside_blocks_only() {
        let content = "see `inline`\n```sh\necho `date`\n```";
        let escaped = escape_backticks_in_code_blocks(content);
        assert!(escaped.contains("see `inline`"));
        assert!(escaped.contains("echo \\`date\\`"));
    }

    #[test]
    fn escape_is_idempotent() {
        let content = "```sh\necho \\`date\\`\n```";
        assert_eq!(escape_backticks_in_code_blocks(content), content);

        let once = escape_backticks_in_code_blocks("```sh\necho `date`\n```");
        assert_eq!(escape_backticks_in_code_blocks(&once), once);
    }

    #[test]
    fn overlong_code_line_is_hard_split_with_fences() {
        let mut content = String::from("```\n");
        content.push_str(&"z".repeat(500));
        content.push_str("\n```\n");
        // force the chunker past the single-chunk shortcut
        content.push_str(&"padding\n".repeat(30));

        for chunk in split_for_discord(&content, 120) {
            assert!(chunk.chars().count() <= 120);
            assert_eq!(fence_count(chunk) % 2, 0);
        }
    }
}

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

#[derive(Default)]
struct TableBuild {
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: String,
    // >0 while inside a link/image; nested text is replaced by the URL
    link_depth: usize,
}

impl TableBuild {
    fn render(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        let columns = self.rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut widths = vec![0usize; columns];
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let mut out = String::from("```\n");
        for (n, row) in self.rows.iter().enumerate() {
            let line = (0..columns)
                .map(|i| pad(row.get(i).map(String::as_str).unwrap_or(""), widths[i]))
                .collect::<Vec<_>>()
                .join(" ");
            out.push_str(line.trim_end());
            out.push('\n');

            if n == 0 {
                let sep = widths
                    .iter()
                    .map(|w| "-".repeat((*w).max(1)))
                    .collect::<Vec<_>>()
                    .join(" ");
                out.push_str(&sep);
                out.push('\n');
            }
        }
        out.push_str("```\n");
        out
    }
}

fn pad(cell: &str, width: usize) -> String {
    let mut s = cell.to_string();
    let len = s.chars().count();
    for _ in len..width {
        s.push(' ');
    }
    s
}

/// Rewrite every GFM table in `content` as a space-aligned monospace block.
/// Discord has no table rendering, so aligned text inside a code fence is the
/// closest readable equivalent. Non-table markdown passes through verbatim.
pub fn normalize_tables(content: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut out = String::with_capacity(content.len());
    let mut copied = 0usize;
    let mut table: Option<TableBuild> = None;

    for (event, range) in Parser::new_ext(content, options).into_offset_iter() {
        match event {
            Event::Start(Tag::Table(_)) => {
                out.push_str(&content[copied..range.start]);
                copied = range.end;
                table = Some(TableBuild::default());
            }
            Event::End(TagEnd::Table) => {
                if let Some(t) = table.take() {
                    out.push_str(&t.render());
                }
            }
            Event::Start(Tag::TableHead) | Event::Start(Tag::TableRow) => {
                if let Some(t) = table.as_mut() {
                    t.row.clear();
                }
            }
            Event::End(TagEnd::TableHead) | Event::End(TagEnd::TableRow) => {
                if let Some(t) = table.as_mut() {
                    let row = std::mem::take(&mut t.row);
                    t.rows.push(row);
                }
            }
            Event::Start(Tag::TableCell) => {
                if let Some(t) = table.as_mut() {
                    t.cell.clear();
                }
            }
            Event::End(TagEnd::TableCell) => {
                if let Some(t) = table.as_mut() {
                    let cell = std::mem::take(&mut t.cell);
                    t.row.push(cell.trim().to_string());
                }
            }
            Event::Start(Tag::Link { dest_url, .. }) | Event::Start(Tag::Image { dest_url, .. }) => {
                if let Some(t) = table.as_mut() {
                    t.cell.push_str(&dest_url);
                    t.link_depth += 1;
                }
            }
            Event::End(TagEnd::Link) | Event::End(TagEnd::Image) => {
                if let Some(t) = table.as_mut() {
                    t.link_depth = t.link_depth.saturating_sub(1);
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(t) = table.as_mut() {
                    if t.link_depth == 0 {
                        t.cell.push_str(&text);
                    }
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some(t) = table.as_mut() {
                    if t.link_depth == 0 {
                        t.cell.push(' ');
                    }
                }
            }
            _ => {}
        }
    }

    out.push_str(&content[copied..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_markdown_passes_through() {
        let content = "# Title\n\nSome *text* with `code`.\n";
        assert_eq!(normalize_tables(content), content);
    }

    #[test]
    fn table_becomes_monospace_block() {
        let content = "before\n\n| Name | Count |\n|------|-------|\n| foo  | 1 |\n| barbaz | 22 |\n\nafter\n";
        let out = normalize_tables(content);

        assert!(out.contains("before"));
        assert!(out.contains("after"));
        assert!(out.contains("```\n"));
        assert!(out.contains("Name   Count"));
        assert!(out.contains("foo    1"));
        assert!(out.contains("barbaz 22"));
        assert!(!out.contains('|'));
    }

    #[test]
    fn separator_matches_column_widths() {
        let content = "| ab | cdef |\n|----|------|\n| x | y |\n";
        let out = normalize_tables(content);
        assert!(out.contains("-- ----"), "separator missing in {out:?}");
    }

    #[test]
    fn inline_markup_is_stripped_and_links_become_urls() {
        let content =
            "| Col |\n|-----|\n| **bold** `code` ~~gone~~ |\n| [text](https://example.com) |\n";
        let out = normalize_tables(content);
        assert!(out.contains("bold code gone"));
        assert!(out.contains("https://example.com"));
        assert!(!out.contains("text"));
        assert!(!out.contains("**"));
    }

    #[test]
    fn multiple_tables_and_surrounding_prose() {
        let content = "intro\n\n| A |\n|---|\n| 1 |\n\nmiddle\n\n| B |\n|---|\n| 2 |\n\nend\n";
        let out = normalize_tables(content);
        assert_eq!(out.matches("```").count(), 4);
        for word in ["intro", "middle", "end"] {
            assert!(out.contains(word));
        }
    }
}

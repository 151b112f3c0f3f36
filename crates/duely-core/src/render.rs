use std::io::{self, IsTerminal, Write};

use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_due_date;
use crate::session::{EditDraft, RowView};
use crate::urgency::{Color, RowStyle};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self::with_color(cfg.get_bool("color").unwrap_or(true) && io::stdout().is_terminal())
    }

    fn with_color(color: bool) -> Self {
        Self { color }
    }

    pub fn plain() -> Self {
        Self::with_color(false)
    }

    #[tracing::instrument(skip(self, rows))]
    pub fn print_item_table(&self, rows: &[RowView]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_item_table(&mut out, rows)
    }

    pub fn write_item_table<W: Write>(&self, writer: W, rows: &[RowView]) -> anyhow::Result<()> {
        if rows.is_empty() {
            let mut writer = writer;
            writeln!(writer, "No items.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Name".to_string(),
            "Due".to_string(),
            "Days".to_string(),
        ];

        let mut table = Vec::with_capacity(rows.len());
        for row in rows {
            let name = if row.editing {
                format!("{} (editing)", row.item.name)
            } else {
                row.item.name.clone()
            };
            let cells = vec![
                row.item.id.to_string(),
                name,
                format_due_date(row.item.due_date),
                format_days(row.urgency.days_until_due),
            ];
            table.push(
                cells
                    .into_iter()
                    .map(|cell| self.paint(&cell, row.style))
                    .collect(),
            );
        }

        write_table(writer, headers, table)
    }

    pub fn write_editor<W: Write>(
        &self,
        mut writer: W,
        id: u64,
        draft: &EditDraft,
    ) -> anyhow::Result<()> {
        writeln!(writer, "editing   {id}")?;
        writeln!(writer, "name      {}", draft.name)?;
        writeln!(writer, "due       {}", format_due_date(draft.due_date))?;
        if let Some(picker) = draft.picker {
            writeln!(writer, "picking   {}", format_due_date(picker.selected))?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, style: RowStyle) -> String {
        if !self.color {
            return text.to_string();
        }
        let mut codes = Vec::new();
        if let Some(code) = ansi_code(style.foreground, 38) {
            codes.push(code);
        }
        if let Some(code) = ansi_code(style.background, 48) {
            codes.push(code);
        }
        if codes.is_empty() {
            return text.to_string();
        }
        format!("\x1b[{}m{text}\x1b[0m", codes.join(";"))
    }
}

/// `base` is 38 for foreground, 48 for background.
fn ansi_code(color: Color, base: u8) -> Option<String> {
    match color {
        Color::Rgb(r, g, b) => Some(format!("{base};2;{r};{g};{b}")),
        Color::White => Some(format!("{base};2;255;255;255")),
        Color::Black => Some(format!("{base};2;0;0;0")),
        Color::Default => None,
    }
}

pub fn format_days(days: i64) -> String {
    match days {
        0 => "today".to_string(),
        1 => "1 day".to_string(),
        -1 => "1 day ago".to_string(),
        d if d < 0 => format!("{} days ago", -d),
        d => format!("{d} days"),
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::item::DueItem;
    use crate::urgency::classify;

    fn row(id: u64, name: &str, due: NaiveDate, today: NaiveDate) -> RowView {
        let urgency = classify(today, due);
        RowView {
            item: DueItem {
                id,
                name: name.to_string(),
                due_date: due,
            },
            urgency,
            style: urgency.tier.style(),
            editing: false,
        }
    }

    #[test]
    fn plain_table_has_days_column() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 1).expect("date");
        let due = NaiveDate::from_ymd_opt(2025, 1, 31).expect("date");
        let rows = vec![row(7, "Milk", due, today)];

        let mut buf = Vec::new();
        Renderer::plain()
            .write_item_table(&mut buf, &rows)
            .expect("render");
        let text = String::from_utf8(buf).expect("utf8");

        assert!(text.starts_with("ID Name Due"));
        assert!(text.contains("Jan 31, 2025"));
        assert!(text.contains("30 days"));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn colored_cells_keep_alignment() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 1).expect("date");
        let near = NaiveDate::from_ymd_opt(2025, 1, 2).expect("date");
        let far = NaiveDate::from_ymd_opt(2026, 1, 2).expect("date");
        let rows = vec![row(1, "Milk", near, today), row(22, "Passport", far, today)];

        let mut buf = Vec::new();
        Renderer::with_color(true)
            .write_item_table(&mut buf, &rows)
            .expect("render");
        let text = String::from_utf8(buf).expect("utf8");

        assert!(text.contains("\x1b[38;2;255;255;255;48;2;245;91;114m"));
        let lines: Vec<String> = text.lines().map(strip_ansi).collect();
        assert_eq!(lines[2].len(), lines[3].len());
    }

    #[test]
    fn empty_table_says_so() {
        let mut buf = Vec::new();
        Renderer::plain()
            .write_item_table(&mut buf, &[])
            .expect("render");
        assert_eq!(String::from_utf8(buf).expect("utf8"), "No items.\n");
    }

    #[test]
    fn color_setting_uses_config_booleans() {
        for spelling in ["off", "no", "0", "false"] {
            let mut cfg = Config::defaults();
            cfg.apply_overrides([("color".to_string(), spelling.to_string())]);
            assert!(!Renderer::new(&cfg).color, "{spelling}");
        }
    }

    #[test]
    fn days_wording() {
        assert_eq!(format_days(0), "today");
        assert_eq!(format_days(1), "1 day");
        assert_eq!(format_days(-5), "5 days ago");
        assert_eq!(format_days(42), "42 days");
    }
}

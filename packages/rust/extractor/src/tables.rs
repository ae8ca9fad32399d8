//! Geometric table detection and markdown rendering.
//!
//! A line split into two or more cells at wide horizontal gaps is a tabular
//! row. Consecutive tabular rows with the same column count, not separated by
//! a block break, form a table whose first row is the header.

use rulevault_shared::{Result, RuleVaultError};

use crate::layout::{PageLayout, TextLine, is_block_break};

/// A run of rows shorter than this is not treated as a table.
const MIN_TABLE_ROWS: usize = 2;

/// Header keyword sets, tested in order. First set with a hit names the table.
const TABLE_TYPES: &[(&str, &[&str])] = &[
    ("spell_list", &["spell", "level", "casting"]),
    ("weapons", &["weapon", "damage", "properties"]),
    ("armor", &["armor", "ac", "stealth"]),
    ("skills", &["skill", "ability", "modifier"]),
    ("feats", &["feat", "prerequisite", "benefit"]),
];

/// Cell grid of a detected table. Row 0 is the header.
#[derive(Debug, Clone, PartialEq)]
pub struct TableGrid {
    pub rows: Vec<Vec<String>>,
}

impl TableGrid {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn header(&self) -> Option<&[String]> {
        self.rows.first().map(Vec::as_slice)
    }

    pub fn column_count(&self) -> usize {
        self.header().map_or(0, <[String]>::len)
    }

    /// Reject grids with no rows or a blank header.
    pub fn validate(&self, page_number: u32) -> Result<()> {
        let header = self.header().ok_or_else(|| RuleVaultError::TableExtraction {
            page: page_number,
            message: "table has no rows".into(),
        })?;
        if header.is_empty() || header.iter().all(|cell| cell.trim().is_empty()) {
            return Err(RuleVaultError::TableExtraction {
                page: page_number,
                message: "table has no header row".into(),
            });
        }
        Ok(())
    }

    /// Header row, `---` separator row, then data rows.
    pub fn to_markdown(&self) -> String {
        let Some(header) = self.header() else {
            return String::new();
        };

        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        lines.push(markdown_row(header));
        lines.push(format!("| {} |", vec!["---"; header.len()].join(" | ")));
        lines.extend(self.rows[1..].iter().map(|row| markdown_row(row)));
        lines.join("\n")
    }

    pub fn table_type(&self) -> &'static str {
        identify_table_type(self.header().unwrap_or_default())
    }
}

fn markdown_row(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}

/// Label a table by scanning its header cells for keyword sets.
pub fn identify_table_type(headers: &[String]) -> &'static str {
    let headers_text = headers
        .iter()
        .map(|h| h.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    TABLE_TYPES
        .iter()
        .find(|(_, words)| words.iter().any(|w| headers_text.contains(w)))
        .map_or("generic", |(name, _)| *name)
}

/// Find table candidates on a page, top to bottom.
pub fn detect_tables(page: &PageLayout) -> Vec<TableGrid> {
    let mut tables = Vec::new();
    let mut current: Vec<Vec<String>> = Vec::new();
    let mut prev_line: Option<TextLine> = None;

    for line in page.lines() {
        let cells = line.cells();
        let continues = cells.len() >= 2
            && current.first().is_some_and(|header| header.len() == cells.len())
            && prev_line.as_ref().is_some_and(|prev| !is_block_break(prev, &line));

        if !continues {
            flush(&mut current, &mut tables);
            if cells.len() >= 2 {
                current.push(cells);
            }
        } else {
            current.push(cells);
        }
        prev_line = Some(line);
    }
    flush(&mut current, &mut tables);

    tables
}

fn flush(current: &mut Vec<Vec<String>>, tables: &mut Vec<TableGrid>) {
    if current.len() >= MIN_TABLE_ROWS {
        tables.push(TableGrid::new(std::mem::take(current)));
    } else {
        current.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TextRun;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn add_row(page: &mut PageLayout, y: f32, cells: &[&str]) {
        for (i, cell) in cells.iter().enumerate() {
            page.runs
                .push(TextRun::new(*cell, 72.0 + 150.0 * i as f32, y, 8.0));
        }
    }

    #[test]
    fn markdown_has_header_and_separator() {
        let grid = TableGrid::new(vec![
            row(&["Level", "Bonus", "Features"]),
            row(&["1st", "+2", "Rage"]),
            row(&["2nd", "+2", "Reckless Attack"]),
        ]);
        let markdown = grid.to_markdown();
        assert!(markdown.contains("| Level | Bonus | Features |"));
        assert!(markdown.contains("| --- | --- | --- |"));
        assert!(markdown.contains("| 1st | +2 | Rage |"));
        assert_eq!(markdown.lines().count(), 4);
    }

    #[test]
    fn table_types_from_headers() {
        assert_eq!(identify_table_type(&row(&["Spell Name", "Level", "Casting Time"])), "spell_list");
        assert_eq!(identify_table_type(&row(&["Weapon", "Damage", "Properties"])), "weapons");
        assert_eq!(identify_table_type(&row(&["Armor", "AC", "Stealth"])), "armor");
        assert_eq!(identify_table_type(&row(&["Skill", "Ability"])), "skills");
        assert_eq!(identify_table_type(&row(&["Feat", "Prerequisite"])), "feats");
        assert_eq!(identify_table_type(&row(&["d6", "Trinket"])), "generic");
    }

    #[test]
    fn empty_grid_fails_validation() {
        let err = TableGrid::new(vec![]).validate(4).unwrap_err();
        assert!(matches!(err, RuleVaultError::TableExtraction { page: 4, .. }));

        let blank_header = TableGrid::new(vec![row(&["", " "]), row(&["a", "b"])]);
        assert!(blank_header.validate(4).is_err());
    }

    #[test]
    fn detects_aligned_rows_as_table() {
        let mut page = PageLayout::new(1);
        page.runs.push(TextRun::new("Some introductory prose line", 72.0, 760.0, 10.0));
        add_row(&mut page, 700.0, &["Weapon", "Damage", "Cost"]);
        add_row(&mut page, 690.0, &["Club", "1d4", "1 sp"]);
        add_row(&mut page, 680.0, &["Dagger", "1d4", "2 gp"]);

        let tables = detect_tables(&page);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows.len(), 3);
        assert_eq!(tables[0].column_count(), 3);
        assert_eq!(tables[0].table_type(), "weapons");
    }

    #[test]
    fn column_count_change_ends_table() {
        let mut page = PageLayout::new(1);
        add_row(&mut page, 700.0, &["Armor", "AC"]);
        add_row(&mut page, 690.0, &["Leather", "11"]);
        add_row(&mut page, 680.0, &["a", "b", "c"]);
        add_row(&mut page, 670.0, &["d", "e", "f"]);

        let tables = detect_tables(&page);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].column_count(), 2);
        assert_eq!(tables[1].column_count(), 3);
    }

    #[test]
    fn lone_gapped_line_is_not_a_table() {
        let mut page = PageLayout::new(1);
        add_row(&mut page, 700.0, &["Left", "Right"]);
        assert!(detect_tables(&page).is_empty());
    }
}

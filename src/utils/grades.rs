use scraper::{ElementRef, Html, Selector};
use crate::error::{GradeError, Result};
use crate::models::{DistributionRow, DistributionTable, GradeRow, GradeSnapshot, GRADE_BUCKETS};

pub const GRADES_TABLE_CLASS: &str = "PSLEVEL1GRIDWBO";
pub const DISTRIBUTION_TABLE_CLASS: &str = "PSLEVEL1GRID";

// Header rows skipped at the top of each table, by position.
const GRADE_HEADER_ROWS: usize = 2;
const DISTRIBUTION_HEADER_ROWS: usize = 1;

const GRADE_COLUMNS: usize = 6;
// A label cell followed by one count per bucket.
const DISTRIBUTION_COLUMNS: usize = 1 + GRADE_BUCKETS.len();

// Compiles a CSS selector, reporting a bad one as a parse error.
fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| GradeError::Parse(format!("bad selector {css}: {e}")))
}

// Tokenizes the body rows of the first `table.<class>` into trimmed cell text.
pub fn table_cells(html: &str, class: &str) -> Result<Vec<Vec<String>>> {
    let document = Html::parse_document(html);
    let table_selector = selector(&format!("table.{class}"))?;
    let tr_selector = selector("tr")?;
    let td_selector = selector("td")?;

    let table = document
        .select(&table_selector)
        .next()
        .ok_or_else(|| GradeError::Parse(format!("no table with class {class}")))?;

    // Rows and cells of nested tables belong to their own table.
    Ok(table
        .select(&tr_selector)
        .filter(|tr| nearest(*tr, "table").map(|t| t.id()) == Some(table.id()))
        .map(|tr| {
            tr.select(&td_selector)
                .filter(|td| nearest(*td, "tr").map(|r| r.id()) == Some(tr.id()))
                .map(|td| td.text().collect::<String>().trim().to_string())
                .collect()
        })
        .collect())
}

// Closest enclosing element with the given tag name.
fn nearest<'a>(el: ElementRef<'a>, tag: &str) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == tag)
}

// Drops the header rows, then every column past the sixth.
pub fn trim_grade_rows(rows: Vec<Vec<String>>) -> Result<Vec<Vec<String>>> {
    rows.into_iter()
        .skip(GRADE_HEADER_ROWS)
        .enumerate()
        .map(|(i, mut cells)| {
            if cells.len() < GRADE_COLUMNS {
                return Err(GradeError::Parse(format!(
                    "grade row {} has {} cells, expected at least {GRADE_COLUMNS}",
                    i + 1,
                    cells.len()
                )));
            }
            cells.truncate(GRADE_COLUMNS);
            Ok(cells)
        })
        .collect()
}

// Reads the grades table into a snapshot of six-column rows.
pub fn parse_grades(html: &str) -> Result<GradeSnapshot> {
    let rows = trim_grade_rows(table_cells(html, GRADES_TABLE_CLASS)?)?;
    Ok(GradeSnapshot {
        rows: rows
            .into_iter()
            .map(|cells| {
                let mut cells = cells.into_iter();
                let mut next = || cells.next().unwrap_or_default();
                GradeRow {
                    class: next(),
                    description: next(),
                    units: next(),
                    grading: next(),
                    letter_grade: next(),
                    grade_points: next(),
                }
            })
            .collect(),
    })
}

// Parses the distribution table and pairs its rows with the grade rows by position.
pub fn parse_distribution(html: &str, grades: &GradeSnapshot) -> Result<DistributionTable> {
    let rows: Vec<Vec<String>> = table_cells(html, DISTRIBUTION_TABLE_CLASS)?
        .into_iter()
        .skip(DISTRIBUTION_HEADER_ROWS)
        .collect();

    if rows.len() != grades.rows.len() {
        return Err(GradeError::Parse(format!(
            "distribution table has {} rows but grade table has {}",
            rows.len(),
            grades.rows.len()
        )));
    }

    let rows = rows
        .into_iter()
        .zip(&grades.rows)
        .enumerate()
        .map(|(i, (cells, grade))| {
            if cells.len() != DISTRIBUTION_COLUMNS {
                return Err(GradeError::Parse(format!(
                    "distribution row {} has {} cells, expected {DISTRIBUTION_COLUMNS}",
                    i + 1,
                    cells.len()
                )));
            }
            let mut counts = [0u32; 16];
            for (slot, (cell, bucket)) in counts.iter_mut().zip(cells[1..].iter().zip(GRADE_BUCKETS)) {
                *slot = parse_count(cell).ok_or_else(|| {
                    GradeError::Parse(format!("{} count for {} is not a number: \"{cell}\"", bucket, grade.class))
                })?;
            }
            Ok(DistributionRow { class: grade.class.clone(), counts })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DistributionTable { rows })
}

// Empty cells count as zero.
fn parse_count(cell: &str) -> Option<u32> {
    if cell.is_empty() {
        Some(0)
    } else {
        cell.parse().ok()
    }
}

// True when the (class code, letter grade) pairs differ, compared row by row in page order.
// A change of class code alone counts as a change, and so does moving a class to another
// row even when the letter grades line up. Description, units, grading and points are ignored.
pub fn grades_changed(previous: &GradeSnapshot, current: &GradeSnapshot) -> bool {
    let column = |s: &GradeSnapshot| {
        s.rows
            .iter()
            .map(|row| (row.class.clone(), row.letter_grade.clone()))
            .collect::<Vec<_>>()
    };
    column(previous) != column(current)
}

use std::fmt;

/// Letter-grade buckets of the distribution table, in column order.
pub const GRADE_BUCKETS: [&str; 16] = [
    "A+", "A", "A-", "B+", "B", "B-", "C+", "C", "C-", "D+", "D", "D-", "F", "FNS", "R", "NR",
];

pub const GRADE_HEADERS: [&str; 6] = [
    "Class", "Description", "Units", "Grading", "Letter Grade", "Grade Points",
];

// Secrets live for the process only; Debug never prints them.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A term offered by the portal, with its position in the term widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub label: String,
    pub index: usize,
}

impl Term {
    // Labels compare on normalized whitespace, ignoring case.
    pub fn matches(&self, label: &str) -> bool {
        normalize(&self.label).eq_ignore_ascii_case(&normalize(label))
    }
}

// Collapses runs of whitespace to single spaces.
fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeRow {
    pub class: String,
    pub description: String,
    pub units: String,
    pub grading: String,
    pub letter_grade: String,
    pub grade_points: String,
}

impl GradeRow {
    // Cells in table column order.
    pub fn cells(&self) -> [&str; 6] {
        [
            &self.class,
            &self.description,
            &self.units,
            &self.grading,
            &self.letter_grade,
            &self.grade_points,
        ]
    }
}

/// One poll cycle's grade rows, in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradeSnapshot {
    pub rows: Vec<GradeRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRow {
    pub class: String,
    /// Student counts, indexed like `GRADE_BUCKETS`.
    pub counts: [u32; 16],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionTable {
    pub rows: Vec<DistributionRow>,
}

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::domain::RotatingRule;

/// Granularity at which rotating rules change and dynamic selections are recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    Monthly,
    Quarterly,
}

impl PeriodKind {
    pub fn label(&self) -> &'static str {
        match self {
            PeriodKind::Monthly => "Monthly",
            PeriodKind::Quarterly => "Quarterly",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "monthly" | "month" => Some(Self::Monthly),
            "quarterly" | "quarter" => Some(Self::Quarterly),
            _ => None,
        }
    }
}

pub fn quarter_of(month: u32) -> u32 {
    (month.clamp(1, 12) - 1) / 3 + 1
}

/// Calendar position of "today", injected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodCursor {
    year: i32,
    month: u32,
    quarter: u32,
}

impl PeriodCursor {
    pub fn for_date(date: NaiveDate) -> Self {
        let month = date.month();
        Self {
            year: date.year(),
            month,
            quarter: quarter_of(month),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn quarter(&self) -> u32 {
        self.quarter
    }

    pub fn key(&self, kind: PeriodKind) -> PeriodKey {
        let index = match kind {
            PeriodKind::Monthly => self.month,
            PeriodKind::Quarterly => self.quarter,
        };
        PeriodKey {
            year: self.year,
            kind,
            index,
        }
    }
}

/// Identifies one concrete month or quarter, e.g. `2025-M07` or `2025-Q3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodKey {
    pub year: i32,
    pub kind: PeriodKind,
    pub index: u32,
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PeriodKind::Monthly => write!(f, "{}-M{:02}", self.year, self.index),
            PeriodKind::Quarterly => write!(f, "{}-Q{}", self.year, self.index),
        }
    }
}

/// Whether a rotating rule is offered during the cursor's period.
pub fn is_rotating_rule_active(rule: &RotatingRule, kind: PeriodKind, cursor: &PeriodCursor) -> bool {
    if !rule.is_rotating {
        return true;
    }

    match kind {
        PeriodKind::Monthly => rule.months.contains(&cursor.month()),
        PeriodKind::Quarterly => rule.quarters.contains(&cursor.quarter()),
    }
}

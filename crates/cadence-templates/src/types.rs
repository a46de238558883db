use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Symbolic cadence mapped to a fixed day count.
///
/// `Daily` doubles as the fallback when a stored frequency string fails
/// to parse (corrupt rows degrade instead of failing the load).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

impl Frequency {
    /// Days between successive due dates.
    pub fn days(&self) -> i64 {
        match self {
            Frequency::Daily => 1,
            Frequency::Weekly => 7,
            Frequency::Biweekly => 14,
            Frequency::Monthly => 30,
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "biweekly" => Ok(Frequency::Biweekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("unknown frequency: {other}")),
        }
    }
}

/// A persisted recurrence template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// UUIDv7 string, assigned at creation, immutable.
    pub id: String,
    /// Display label.
    pub name: String,
    /// Key of the base instance runs are cloned from.
    pub source_key: String,
    /// Cadence between occurrences.
    pub frequency: Frequency,
    /// Days before `next_due` at which a run may be materialized.
    pub lead_days: u32,
    /// Date of the next occurrence to materialize.
    pub next_due: NaiveDate,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// RFC3339 timestamp of the last edit.
    pub updated_at: String,
}

impl Template {
    /// First date at which the next occurrence may be materialized.
    pub fn lead_threshold(&self) -> NaiveDate {
        self.next_due - chrono::Duration::days(self.lead_days as i64)
    }
}

/// Raw form input for creating or updating a template. Everything is
/// unvalidated text/numbers; `TemplateStore` rejects bad input before
/// any state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateInput {
    pub name: String,
    pub source_key: String,
    /// One of `daily | weekly | biweekly | monthly`.
    pub frequency: String,
    /// Negative values are clamped to 0 rather than rejected.
    pub lead_days: i64,
    /// `YYYY-MM-DD`.
    pub next_due: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_day_counts() {
        assert_eq!(Frequency::Daily.days(), 1);
        assert_eq!(Frequency::Weekly.days(), 7);
        assert_eq!(Frequency::Biweekly.days(), 14);
        assert_eq!(Frequency::Monthly.days(), 30);
    }

    #[test]
    fn frequency_roundtrips_through_strings() {
        for f in [
            Frequency::Daily,
            Frequency::Weekly,
            Frequency::Biweekly,
            Frequency::Monthly,
        ] {
            assert_eq!(f.to_string().parse::<Frequency>().unwrap(), f);
        }
        assert!("fortnightly".parse::<Frequency>().is_err());
    }

    #[test]
    fn lead_threshold_subtracts_lead_days() {
        let t = Template {
            id: "t".into(),
            name: "T".into(),
            source_key: "s".into(),
            frequency: Frequency::Weekly,
            lead_days: 2,
            next_due: NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(t.lead_threshold(), NaiveDate::from_ymd_opt(2024, 1, 6).unwrap());
    }
}

//! Organisations, schemes, lots and lot ownership

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant that owns schemes and the default chart of accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organisation {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Organisation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Last day of a scheme's financial year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialYearEnd {
    pub month: u32,
    pub day: u32,
}

impl FinancialYearEnd {
    pub fn new(month: u32, day: u32) -> Result<Self, String> {
        // 2024 is a leap year, so 29 February is accepted
        if NaiveDate::from_ymd_opt(2024, month, day).is_none() {
            return Err(format!("Invalid financial year end: {:02}-{:02}", month, day));
        }
        Ok(Self { month, day })
    }

    /// Financial year end falling in the given calendar year
    pub fn in_year(&self, year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
            .or_else(|| NaiveDate::from_ymd_opt(year, self.month, self.day - 1))
    }
}

impl Default for FinancialYearEnd {
    fn default() -> Self {
        Self { month: 6, day: 30 }
    }
}

impl std::fmt::Display for FinancialYearEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

impl std::str::FromStr for FinancialYearEnd {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (month, day) = s
            .split_once('-')
            .ok_or_else(|| format!("Invalid financial year end: {}", s))?;
        let month = month
            .parse()
            .map_err(|_| format!("Invalid financial year end: {}", s))?;
        let day = day
            .parse()
            .map_err(|_| format!("Invalid financial year end: {}", s))?;
        Self::new(month, day)
    }
}

/// A managed property (strata plan)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheme {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub name: String,
    pub financial_year_end: FinancialYearEnd,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scheme {
    pub fn new(organisation_id: Uuid, name: impl Into<String>, financial_year_end: FinancialYearEnd) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organisation_id,
            name: name.into(),
            financial_year_end,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Mutable scheme metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeMetadata {
    pub name: Option<String>,
    pub financial_year_end: Option<FinancialYearEnd>,
}

/// Individually owned unit within a scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub id: Uuid,
    pub scheme_id: Uuid,
    pub lot_number: String,
    pub created_at: DateTime<Utc>,
}

impl Lot {
    pub fn new(scheme_id: Uuid, lot_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scheme_id,
            lot_number: lot_number.into(),
            created_at: Utc::now(),
        }
    }
}

/// Ownership record of a lot; the open record (no end date) is the current owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub id: Uuid,
    pub lot_id: Uuid,
    pub owner_name: String,
    pub ownership_start_date: NaiveDate,
    pub ownership_end_date: Option<NaiveDate>,
}

impl Ownership {
    pub fn new(lot_id: Uuid, owner_name: impl Into<String>, start: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            lot_id,
            owner_name: owner_name.into(),
            ownership_start_date: start,
            ownership_end_date: None,
        }
    }

    pub fn is_current(&self) -> bool {
        self.ownership_end_date.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_financial_year_end_parsing() {
        let fye: FinancialYearEnd = "06-30".parse().unwrap();
        assert_eq!(fye, FinancialYearEnd { month: 6, day: 30 });
        assert_eq!(fye.to_string(), "06-30");

        assert!("02-29".parse::<FinancialYearEnd>().is_ok());
        assert!("02-30".parse::<FinancialYearEnd>().is_err());
        assert!("13-01".parse::<FinancialYearEnd>().is_err());
        assert!("june".parse::<FinancialYearEnd>().is_err());
    }

    #[test]
    fn test_leap_day_year_end_in_common_year() {
        let fye = FinancialYearEnd::new(2, 29).unwrap();
        assert_eq!(fye.in_year(2023), NaiveDate::from_ymd_opt(2023, 2, 28));
        assert_eq!(fye.in_year(2024), NaiveDate::from_ymd_opt(2024, 2, 29));
    }
}

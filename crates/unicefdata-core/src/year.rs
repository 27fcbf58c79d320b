//! Year selection and year-spec parsing.
//!
//! A [`YearSelection`] is either a constraint applied to the query itself
//! ([`YearSelection::ExplicitSet`], [`YearSelection::Range`]) or a policy
//! resolved after retrieval against the years actually available
//! ([`YearSelection::Circa`], [`YearSelection::Latest`],
//! [`YearSelection::MostRecentN`]).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UnicefError};

/// Which years of each series a request wants.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum YearSelection {
    /// Every available year.
    #[default]
    All,
    /// Exactly these years.
    ExplicitSet(BTreeSet<i32>),
    /// Inclusive range of years.
    Range {
        /// First year, inclusive.
        start: i32,
        /// Last year, inclusive.
        end: i32,
    },
    /// The single available year closest to the target.
    Circa(i32),
    /// The most recent available year of each series.
    Latest,
    /// The `n` most recent available years of each series, newest first.
    MostRecentN(u32),
}

impl YearSelection {
    /// Parses year arguments the way the public request surface accepts them.
    ///
    /// `year` may be a single year, an inclusive `A:B` range or an `A,B,C` list.
    /// `circa` turns a single year into a nearest-year target. `latest` and
    /// `mrv` select among retrieved years and cannot be combined with a year
    /// argument or with each other.
    ///
    /// # Errors
    /// Returns [`UnicefError::Validation`] naming the offending token or the
    /// conflicting options.
    pub fn parse(year: Option<&str>, circa: bool, latest: bool, mrv: Option<u32>) -> Result<Self> {
        let year = year.map(str::trim).filter(|y| !y.is_empty());

        let mut modes = Vec::new();
        if circa {
            modes.push("circa");
        }
        if latest {
            modes.push("latest");
        }
        if mrv.is_some() {
            modes.push("mrv");
        }
        if year.is_some() && (latest || mrv.is_some()) {
            modes.push("year");
        }
        if modes.len() > 1 {
            return Err(UnicefError::validation(
                "year",
                format!("conflicting year options: {}", modes.join(", ")),
            ));
        }

        if latest {
            return Ok(Self::Latest);
        }
        if let Some(n) = mrv {
            if n == 0 {
                return Err(UnicefError::validation("mrv", "mrv must be at least 1"));
            }
            return Ok(Self::MostRecentN(n));
        }

        let Some(year) = year else {
            if circa {
                return Err(UnicefError::validation("year", "circa requires a single year"));
            }
            return Ok(Self::All);
        };

        let parsed = parse_year_arg(year)?;
        if circa {
            let target = match &parsed {
                Self::ExplicitSet(years) if years.len() == 1 => years.first().copied(),
                _ => None,
            };
            return target
                .map(Self::Circa)
                .ok_or_else(|| UnicefError::validation("year", "circa requires a single year"));
        }
        Ok(parsed)
    }

    /// Returns true if this selection is resolved after retrieval.
    #[must_use]
    pub const fn is_post_retrieval(&self) -> bool {
        matches!(self, Self::Circa(_) | Self::Latest | Self::MostRecentN(_))
    }

    /// Start/end period bounds to send with the query, if any.
    #[must_use]
    pub fn period_bounds(&self) -> Option<(i32, i32)> {
        match self {
            Self::ExplicitSet(years) => Some((*years.first()?, *years.last()?)),
            Self::Range { start, end } => Some((*start, *end)),
            _ => None,
        }
    }

    /// Returns true if `year` satisfies a query-constraining selection.
    ///
    /// Post-retrieval selections accept every year here.
    #[must_use]
    pub fn admits(&self, year: i32) -> bool {
        match self {
            Self::ExplicitSet(years) => years.contains(&year),
            Self::Range { start, end } => (*start..=*end).contains(&year),
            _ => true,
        }
    }

    /// The years a `wide` pivot should lay out as columns, when the
    /// selection names them up front.
    #[must_use]
    pub fn requested_years(&self) -> Option<Vec<i32>> {
        match self {
            Self::ExplicitSet(years) => Some(years.iter().copied().collect()),
            Self::Range { start, end } => Some((*start..=*end).collect()),
            _ => None,
        }
    }
}

/// Parses a year argument without mode flags.
fn parse_year_arg(arg: &str) -> Result<YearSelection> {
    if let Some((start, end)) = arg.split_once(':') {
        let start = parse_year_token(start)?;
        let end = parse_year_token(end)?;
        if start > end {
            return Err(UnicefError::validation(
                "year",
                format!("range start {start} is after end {end}"),
            ));
        }
        return Ok(YearSelection::Range { start, end });
    }

    let years = arg
        .split(',')
        .map(parse_year_token)
        .collect::<Result<BTreeSet<_>>>()?;
    Ok(YearSelection::ExplicitSet(years))
}

fn parse_year_token(token: &str) -> Result<i32> {
    let token = token.trim();
    match token.parse::<i32>() {
        Ok(year) if (1000..=9999).contains(&year) => Ok(year),
        _ => Err(UnicefError::validation(
            "year",
            format!("malformed year token '{token}'"),
        )),
    }
}

/// Canonical text form, accepted back by [`FromStr`].
impl fmt::Display for YearSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => Ok(()),
            Self::ExplicitSet(years) => {
                let parts: Vec<String> = years.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(","))
            }
            Self::Range { start, end } => write!(f, "{start}:{end}"),
            Self::Circa(year) => write!(f, "circa:{year}"),
            Self::Latest => write!(f, "latest"),
            Self::MostRecentN(n) => write!(f, "mrv:{n}"),
        }
    }
}

impl FromStr for YearSelection {
    type Err = UnicefError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::All);
        }
        if s.eq_ignore_ascii_case("latest") {
            return Self::parse(None, false, true, None);
        }
        if let Some(n) = s.strip_prefix("mrv:") {
            let n = n.trim().parse::<u32>().map_err(|_| {
                UnicefError::validation("mrv", format!("malformed mrv count '{n}'"))
            })?;
            return Self::parse(None, false, false, Some(n));
        }
        if let Some(target) = s.strip_prefix("circa:") {
            return Self::parse(Some(target), true, false, None);
        }
        Self::parse(Some(s), false, false, None)
    }
}

//! Small newtype indices for the problem dimensions in the data model: years, representative
//! days, intra-day instants and candidate SESS sites. Grouping them as distinct types (rather than
//! passing `usize` everywhere) stops a day index from being passed where a year index is expected,
//! the same way [`crate::id::HasID`]-style string IDs keep case-data entities apart from purely
//! positional indices elsewhere in this crate.
use std::fmt;

macro_rules! index_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub usize);

        impl $name {
            /// The zero-based position this index refers to.
            pub fn get(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<usize> for $name {
            fn from(val: usize) -> Self {
                Self(val)
            }
        }
    };
}

index_type!(YearIndex, "A zero-based index into the ordered list of milestone years `Y`.");
index_type!(DayIndex, "A zero-based index into the list of representative days `D`.");
index_type!(InstantIndex, "A zero-based index into the intra-day instants `T`.");
index_type!(SiteIndex, "A zero-based index into the candidate SESS sites `E`.");

/// Which operator's copy of a consensus quantity is being referred to.
///
/// Per the data model, every interface-PF and shared-ESS consensus quantity has exactly two
/// copies, one owned by the TSO and one by the DSO at that site. This is a fixed two-valued
/// ownership tag, not a per-site index: the DSO side of a given site's consensus record is always
/// produced by that site's own DSO subproblem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum Role {
    /// The transmission system operator.
    Tso,
    /// A distribution system operator.
    Dso,
}

/// Per-year and per-day weights from the data model (§3): `w_y` real years represented by a
/// milestone year, and `w_d` days/year represented by a representative day.
#[derive(Debug, Clone)]
pub struct Weights {
    /// `w_y` per milestone year, indexed by [`YearIndex`].
    pub year_weights: Vec<f64>,
    /// `w_d` per representative day, indexed by [`DayIndex`]. Must sum to at most 365.
    pub day_weights: Vec<f64>,
}

impl Weights {
    /// Number of milestone years.
    pub fn num_years(&self) -> usize {
        self.year_weights.len()
    }

    /// Number of representative days.
    pub fn num_days(&self) -> usize {
        self.day_weights.len()
    }

    /// The weight of a given year, i.e. the number of real years it represents.
    pub fn year_weight(&self, year: YearIndex) -> f64 {
        self.year_weights[year.get()]
    }

    /// The weight of a given representative day, in days/year.
    pub fn day_weight(&self, day: DayIndex) -> f64 {
        self.day_weights[day.get()]
    }

    /// The fraction of a year a representative day represents (`w_d / 365`).
    pub fn day_fraction(&self, day: DayIndex) -> f64 {
        self.day_weight(day) / 365.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_fraction() {
        let weights = Weights {
            year_weights: vec![1.0],
            day_weights: vec![91.25, 273.75],
        };
        assert!((weights.day_fraction(DayIndex(0)) - 0.25).abs() < 1e-9);
        assert!((weights.day_fraction(DayIndex(1)) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_index_display() {
        assert_eq!(YearIndex(3).to_string(), "3");
        assert_eq!(SiteIndex(0).get(), 0);
    }
}

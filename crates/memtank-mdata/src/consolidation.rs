//! Consolidation functions and the rollup series behind them

use std::fmt;
use std::str::FromStr;

use memtank_common::Error;

/// A series kept by every rollup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollupFn {
    Min,
    Max,
    Sum,
    Cnt,
    Lst,
}

impl RollupFn {
    pub const ALL: [Self; 5] = [Self::Min, Self::Max, Self::Sum, Self::Cnt, Self::Lst];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
            Self::Cnt => "cnt",
            Self::Lst => "lst",
        }
    }
}

/// How points are combined, by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consolidator {
    Avg,
    Sum,
    Min,
    Max,
    Cnt,
    Lst,
}

impl Consolidator {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Cnt => "cnt",
            Self::Lst => "lst",
        }
    }

    /// The stored rollup series that answers this consolidator directly.
    /// `Avg` has none; it is sum divided by cnt.
    pub const fn rollup_fn(&self) -> Option<RollupFn> {
        match self {
            Self::Avg => None,
            Self::Sum => Some(RollupFn::Sum),
            Self::Min => Some(RollupFn::Min),
            Self::Max => Some(RollupFn::Max),
            Self::Cnt => Some(RollupFn::Cnt),
            Self::Lst => Some(RollupFn::Lst),
        }
    }
}

impl FromStr for Consolidator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" | "average" => Ok(Self::Avg),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "cnt" | "count" => Ok(Self::Cnt),
            "lst" | "last" => Ok(Self::Lst),
            other => Err(Error::InvalidAggFunc(other.to_string())),
        }
    }
}

impl fmt::Display for Consolidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_consolidator() {
        assert_eq!("avg".parse::<Consolidator>().unwrap(), Consolidator::Avg);
        assert_eq!("average".parse::<Consolidator>().unwrap(), Consolidator::Avg);
        assert_eq!("count".parse::<Consolidator>().unwrap(), Consolidator::Cnt);
        assert_eq!("last".parse::<Consolidator>().unwrap(), Consolidator::Lst);

        let err = "median".parse::<Consolidator>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid aggregation func: median");
    }

    #[test]
    fn test_rollup_fn_mapping() {
        assert_eq!(Consolidator::Avg.rollup_fn(), None);
        assert_eq!(Consolidator::Max.rollup_fn(), Some(RollupFn::Max));
        for c in ["sum", "min", "max", "cnt", "lst"] {
            let parsed: Consolidator = c.parse().unwrap();
            assert_eq!(parsed.rollup_fn().unwrap().as_str(), c);
        }
    }
}

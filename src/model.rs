use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NargsError {
    #[error("Invalid nargs range - expected min <= max, but {min} > {max}.")]
    InvertedRange { min: usize, max: usize },

    #[error("Invalid nargs set - must contain at least one count.")]
    EmptySet,

    #[error("Invalid nargs step - must be at least 1.")]
    ZeroStep,

    #[error("Invalid nargs string '{0}' - expected one of '?', '*', '+', or an integer.")]
    UnknownToken(String),
}

#[derive(Debug, Clone)]
enum Allowed {
    /// Every `min + k * step` up to (and including) `max`.
    Stepped { step: usize },
    /// Any count of at least `min`.
    Unbounded,
    /// Exactly the counts in the set.
    Set(BTreeSet<usize>),
}

/// The number of values a parameter may consume.
///
/// `Nargs` normalizes the various ways an arity can be declared - an exact count, the
/// classic `?`/`*`/`+` tokens, a bounded range (optionally stepped), an explicit set of
/// counts, or the remainder sentinel - into a uniform representation.
///
/// ### Example
/// ```
/// use declarg::Nargs;
///
/// let optional: Nargs = "?".parse().unwrap();
/// assert_eq!(optional, Nargs::range(0, Some(1)).unwrap());
/// assert!(optional.satisfied(0));
/// assert!(optional.satisfied(1));
/// assert!(!optional.satisfied(2));
/// ```
#[derive(Debug, Clone)]
pub struct Nargs {
    min: usize,
    max: Option<usize>,
    allowed: Allowed,
    remainder: bool,
}

impl Nargs {
    /// Precisely `count` values.
    pub fn exactly(count: usize) -> Self {
        Self {
            min: count,
            max: Some(count),
            allowed: Allowed::Stepped { step: 1 },
            remainder: false,
        }
    }

    /// Zero or one value (the `?` token).
    pub fn optional() -> Self {
        Self::range(0, Some(1)).expect("internal error - 0 <= 1 must be a valid range")
    }

    /// Zero or more values (the `*` token).
    pub fn zero_or_more() -> Self {
        Self {
            min: 0,
            max: None,
            allowed: Allowed::Unbounded,
            remainder: false,
        }
    }

    /// One or more values (the `+` token).
    pub fn one_or_more() -> Self {
        Self {
            min: 1,
            max: None,
            allowed: Allowed::Unbounded,
            remainder: false,
        }
    }

    /// Every remaining token, verbatim - even tokens that look like options.
    pub fn remainder() -> Self {
        Self {
            min: 0,
            max: None,
            allowed: Allowed::Unbounded,
            remainder: true,
        }
    }

    /// Between `min` and `max` values, or `min` or more when `max` is `None`.
    pub fn range(min: usize, max: Option<usize>) -> Result<Self, NargsError> {
        match max {
            Some(max) if min > max => Err(NargsError::InvertedRange { min, max }),
            Some(max) => Ok(Self {
                min,
                max: Some(max),
                allowed: Allowed::Stepped { step: 1 },
                remainder: false,
            }),
            None => Ok(Self {
                min,
                max: None,
                allowed: Allowed::Unbounded,
                remainder: false,
            }),
        }
    }

    /// Every `min + k * step` count up to `max`.
    pub fn stepped(min: usize, max: usize, step: usize) -> Result<Self, NargsError> {
        if step == 0 {
            return Err(NargsError::ZeroStep);
        } else if min > max {
            return Err(NargsError::InvertedRange { min, max });
        }

        // Normalize the upper bound to the largest reachable count.
        let reachable_max = min + ((max - min) / step) * step;
        Ok(Self {
            min,
            max: Some(reachable_max),
            allowed: Allowed::Stepped { step },
            remainder: false,
        })
    }

    /// Exactly the counts in the given set.
    pub fn of_set(counts: impl IntoIterator<Item = usize>) -> Result<Self, NargsError> {
        let set: BTreeSet<usize> = counts.into_iter().collect();
        let (min, max) = match (set.first(), set.last()) {
            (Some(min), Some(max)) => (*min, *max),
            _ => return Err(NargsError::EmptySet),
        };

        Ok(Self {
            min,
            max: Some(max),
            allowed: Allowed::Set(set),
            remainder: false,
        })
    }

    pub fn min(&self) -> usize {
        self.min
    }

    /// The upper bound, or `None` when unbounded.
    pub fn max(&self) -> Option<usize> {
        self.max
    }

    /// Whether `count` is one of the allowed counts.
    pub fn contains(&self, count: usize) -> bool {
        match &self.allowed {
            Allowed::Unbounded => count >= self.min,
            Allowed::Stepped { step } => {
                let max = self.max.expect("internal error - stepped nargs must be bounded");
                self.min <= count && count <= max && (count - self.min) % step == 0
            }
            Allowed::Set(set) => set.contains(&count),
        }
    }

    /// Whether parsing may stop after `count` values.
    pub fn satisfied(&self, count: usize) -> bool {
        match self.max {
            None => count >= self.min,
            Some(_) => self.contains(count),
        }
    }

    /// Whether `count` values have reached the upper bound.  Always false when unbounded.
    pub fn max_reached(&self, count: usize) -> bool {
        match self.max {
            Some(max) => count >= max,
            None => false,
        }
    }

    /// Whether the arity spans more than one count.
    pub fn is_variable(&self) -> bool {
        self.max != Some(self.min)
    }

    pub fn is_remainder(&self) -> bool {
        self.remainder
    }

    fn iter_allowed(&self) -> impl Iterator<Item = usize> + '_ {
        let (stepped, set) = match &self.allowed {
            Allowed::Set(set) => (None, Some(set.iter().copied())),
            Allowed::Stepped { step } => {
                let max = self.max.expect("internal error - stepped nargs must be bounded");
                (Some((self.min..=max).step_by(*step)), None)
            }
            Allowed::Unbounded => {
                unreachable!("internal error - unbounded nargs cannot be enumerated")
            }
        };
        stepped.into_iter().flatten().chain(set.into_iter().flatten())
    }
}

impl PartialEq for Nargs {
    /// Semantic equality: differently-constructed specs are equal when their allowed
    /// count sets coincide.  A stepped range with step != 1 only equals a spec covering
    /// the identical counts.
    fn eq(&self, other: &Self) -> bool {
        if self.max.is_none() || other.max.is_none() {
            return self.max == other.max && self.min == other.min;
        }

        if self.min != other.min || self.max != other.max {
            return false;
        }

        match (&self.allowed, &other.allowed) {
            (Allowed::Stepped { step: a }, Allowed::Stepped { step: b }) => {
                // Bounds already match; equal-bound specs are identical when min == max.
                a == b || self.min == self.max.expect("internal error - bounded")
            }
            _ => {
                self.iter_allowed().count() == other.iter_allowed().count()
                    && self.iter_allowed().all(|count| other.contains(count))
            }
        }
    }
}

impl Eq for Nargs {}

impl Hash for Nargs {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Only the bounds participate, keeping the hash consistent with the
        // set-semantic equality.
        self.min.hash(state);
        self.max.hash(state);
    }
}

impl PartialEq<usize> for Nargs {
    fn eq(&self, other: &usize) -> bool {
        self.min == *other && self.max == Some(*other)
    }
}

impl FromStr for Nargs {
    type Err = NargsError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "?" => Ok(Self::optional()),
            "*" => Ok(Self::zero_or_more()),
            "+" => Ok(Self::one_or_more()),
            _ => match token.parse::<usize>() {
                Ok(count) => Ok(Self::exactly(count)),
                Err(_) => Err(NargsError::UnknownToken(token.to_string())),
            },
        }
    }
}

impl std::fmt::Display for Nargs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.allowed, self.max) {
            (_, None) => write!(f, "{} or more", self.min),
            (_, Some(max)) if self.min == max => write!(f, "{max}"),
            (Allowed::Set(set), _) => {
                let counts: Vec<String> = set.iter().map(|c| c.to_string()).collect();
                write!(f, "{{{}}}", counts.join(","))
            }
            (Allowed::Stepped { step }, Some(max)) if *step != 1 => {
                write!(f, "{} ~ {max} (step={step})", self.min)
            }
            (_, Some(max)) => write!(f, "{} ~ {max}", self.min),
        }
    }
}

//! Locator specifications and ordered fallback chains.
//!
//! A [`LocatorSpec`] is parsed exactly once, when it is constructed. Resolution
//! code only ever matches on the enum; it never re-inspects the raw string.
//!
//! # Prefix syntax
//!
//! | Input              | Strategy             |
//! |--------------------|----------------------|
//! | `css=button.save`  | [`LocatorSpec::Css`]   |
//! | `xpath=//h1`       | [`LocatorSpec::XPath`] |
//! | `text=Sign in`     | [`LocatorSpec::Text`]  |
//! | `role=button`      | [`LocatorSpec::Role`]  |
//! | `id=main-heading`  | [`LocatorSpec::Id`]    |
//! | `//div` or `(//a)[2]` | XPath (unprefixed) |
//! | anything else      | CSS (unprefixed)     |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::result::{TenazError, TenazResult};

/// Strategy tag of a [`LocatorSpec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// CSS selector
    Css,
    /// XPath expression
    XPath,
    /// Visible text match
    Text,
    /// ARIA role match
    Role,
    /// Element id match
    Id,
}

impl Strategy {
    /// Prefix used in the textual form
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::XPath => "xpath",
            Self::Text => "text",
            Self::Role => "role",
            Self::Id => "id",
        }
    }
}

/// One way of finding an element in the remote document.
///
/// Immutable once constructed; cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(
    tag = "strategy",
    content = "pattern",
    rename_all = "lowercase",
    try_from = "SpecRepr"
)]
pub enum LocatorSpec {
    /// CSS selector (e.g. `button.primary`)
    Css(String),
    /// XPath expression (e.g. `//h1[@id='title']`)
    XPath(String),
    /// Text content match (e.g. `Sign in`)
    Text(String),
    /// ARIA role (e.g. `button`)
    Role(String),
    /// Element id without the leading `#`
    Id(String),
}

impl LocatorSpec {
    /// CSS selector locator
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// XPath locator
    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }

    /// Text-content locator
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// ARIA role locator
    pub fn role(role: impl Into<String>) -> Self {
        Self::Role(role.into())
    }

    /// Element id locator
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    /// Parse the prefixed textual form.
    ///
    /// # Errors
    ///
    /// Returns [`TenazError::InvalidPolicy`] for empty patterns.
    pub fn parse(input: &str) -> TenazResult<Self> {
        let trimmed = input.trim();
        let spec = match trimmed.split_once('=') {
            Some((prefix, rest)) if is_prefix(prefix) => {
                let pattern = rest.trim().to_string();
                match prefix {
                    "css" => Self::Css(pattern),
                    "xpath" => Self::XPath(pattern),
                    "text" => Self::Text(pattern),
                    "role" => Self::Role(pattern),
                    _ => Self::Id(pattern.trim_start_matches('#').to_string()),
                }
            }
            _ if trimmed.starts_with('/') || trimmed.starts_with('(') => {
                Self::XPath(trimmed.to_string())
            }
            _ => Self::Css(trimmed.to_string()),
        };

        spec.validated()
    }

    /// Reject blank patterns
    fn validated(self) -> TenazResult<Self> {
        if self.pattern().trim().is_empty() {
            return Err(TenazError::InvalidPolicy {
                message: format!("empty {} locator pattern", self.strategy().prefix()),
            });
        }
        Ok(self)
    }

    /// Strategy tag
    #[must_use]
    pub const fn strategy(&self) -> Strategy {
        match self {
            Self::Css(_) => Strategy::Css,
            Self::XPath(_) => Strategy::XPath,
            Self::Text(_) => Strategy::Text,
            Self::Role(_) => Strategy::Role,
            Self::Id(_) => Strategy::Id,
        }
    }

    /// Raw pattern, without the strategy prefix
    #[must_use]
    pub fn pattern(&self) -> &str {
        match self {
            Self::Css(p) | Self::XPath(p) | Self::Text(p) | Self::Role(p) | Self::Id(p) => p,
        }
    }
}

/// Wire shape of [`LocatorSpec`], checked on the way in
#[derive(Deserialize)]
#[serde(tag = "strategy", content = "pattern", rename_all = "lowercase")]
enum SpecRepr {
    Css(String),
    XPath(String),
    Text(String),
    Role(String),
    Id(String),
}

impl TryFrom<SpecRepr> for LocatorSpec {
    type Error = TenazError;

    fn try_from(repr: SpecRepr) -> Result<Self, Self::Error> {
        let spec = match repr {
            SpecRepr::Css(p) => Self::Css(p),
            SpecRepr::XPath(p) => Self::XPath(p),
            SpecRepr::Text(p) => Self::Text(p),
            SpecRepr::Role(p) => Self::Role(p),
            SpecRepr::Id(p) => Self::Id(p),
        };
        spec.validated()
    }
}

fn is_prefix(candidate: &str) -> bool {
    matches!(candidate, "css" | "xpath" | "text" | "role" | "id")
}

impl fmt::Display for LocatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy().prefix(), self.pattern())
    }
}

impl FromStr for LocatorSpec {
    type Err = TenazError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Ordered, non-empty list of locators: primary first, then fallbacks.
///
/// Resolution walks the list in order and commits to the first entry that
/// resolves. Later entries are never consulted once one succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<LocatorSpec>", into = "Vec<LocatorSpec>")]
pub struct LocatorChain {
    specs: Vec<LocatorSpec>,
}

impl LocatorChain {
    /// Chain with a single primary locator
    #[must_use]
    pub fn new(primary: LocatorSpec) -> Self {
        Self {
            specs: vec![primary],
        }
    }

    /// Append a fallback
    #[must_use]
    pub fn or(mut self, fallback: LocatorSpec) -> Self {
        self.specs.push(fallback);
        self
    }

    /// Build a chain from any sequence of specs.
    ///
    /// # Errors
    ///
    /// Returns [`TenazError::InvalidPolicy`] if the sequence is empty.
    pub fn try_from_iter(specs: impl IntoIterator<Item = LocatorSpec>) -> TenazResult<Self> {
        let specs: Vec<LocatorSpec> = specs.into_iter().collect();
        if specs.is_empty() {
            return Err(TenazError::InvalidPolicy {
                message: "locator chain must contain at least one locator".to_string(),
            });
        }
        Ok(Self { specs })
    }

    /// Parse every string with [`LocatorSpec::parse`] and build a chain.
    ///
    /// # Errors
    ///
    /// Returns [`TenazError::InvalidPolicy`] for an empty list or any empty pattern.
    pub fn parse_all<S: AsRef<str>>(inputs: &[S]) -> TenazResult<Self> {
        let specs = inputs
            .iter()
            .map(|s| LocatorSpec::parse(s.as_ref()))
            .collect::<TenazResult<Vec<_>>>()?;
        Self::try_from_iter(specs)
    }

    /// The primary locator
    #[must_use]
    pub fn primary(&self) -> &LocatorSpec {
        &self.specs[0]
    }

    /// Fallbacks, in the order they are tried
    #[must_use]
    pub fn fallbacks(&self) -> &[LocatorSpec] {
        &self.specs[1..]
    }

    /// All locators in resolution order
    #[must_use]
    pub fn specs(&self) -> &[LocatorSpec] {
        &self.specs
    }

    /// Number of locators in the chain
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Always false
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Iterate in resolution order
    pub fn iter(&self) -> std::slice::Iter<'_, LocatorSpec> {
        self.specs.iter()
    }
}

impl From<LocatorSpec> for LocatorChain {
    fn from(spec: LocatorSpec) -> Self {
        Self::new(spec)
    }
}

impl TryFrom<Vec<LocatorSpec>> for LocatorChain {
    type Error = TenazError;

    fn try_from(specs: Vec<LocatorSpec>) -> Result<Self, Self::Error> {
        Self::try_from_iter(specs)
    }
}

impl From<LocatorChain> for Vec<LocatorSpec> {
    fn from(chain: LocatorChain) -> Self {
        chain.specs
    }
}

impl<'a> IntoIterator for &'a LocatorChain {
    type Item = &'a LocatorSpec;
    type IntoIter = std::slice::Iter<'a, LocatorSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.specs.iter()
    }
}

impl fmt::Display for LocatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, spec) in self.specs.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{spec}")?;
        }
        write!(f, "]")
    }
}

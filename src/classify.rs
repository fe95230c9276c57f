//! Filename classifier — pure pattern rules, no state.
//!
//! Maps a downloaded file's name to the category used for the materialized
//! copy's clean name:
//! - a run of 7 digits → `Faktura` (invoice numbers)
//! - "inköp"/"inkop"   → `Order` (purchase confirmations)
//! - everything else   → `Orderbekraftelse` (the default)
//!
//! A separate predicate, [`Classifier::matches_criteria`], decides whether a
//! filename triggers the watch pipeline at all. Externally requested attaches
//! bypass that predicate but still get a category.

use regex::Regex;

/// Document category derived from a filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Faktura,
    Order,
    Orderbekraftelse,
}

impl Category {
    /// Human-readable label used in materialized file names.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Faktura => "Faktura",
            Category::Order => "Order",
            Category::Orderbekraftelse => "Orderbekräftelse",
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::Orderbekraftelse
    }
}

/// Compiled filename rules. Total and deterministic: `classify` always
/// returns a category, so callers can enumerate filename → category pairs.
#[derive(Debug, Clone)]
pub struct Classifier {
    seven_digits: Regex,
    inkop: Regex,
    orderbekraftelse: Regex,
}

impl Classifier {
    pub fn new() -> Self {
        // The patterns cannot fail to compile; they are fixed literals.
        Self {
            seven_digits: Regex::new(r"\d{7}").unwrap(),
            inkop: Regex::new(r"(?i)ink[öo]p").unwrap(),
            orderbekraftelse: Regex::new(r"(?i)orderbekr").unwrap(),
        }
    }

    /// Map a filename to its category. Rule order matters: digits win over
    /// "inköp", and the default covers everything else.
    pub fn classify(&self, filename: &str) -> Category {
        if self.seven_digits.is_match(filename) {
            Category::Faktura
        } else if self.inkop.is_match(filename) {
            Category::Order
        } else {
            Category::Orderbekraftelse
        }
    }

    /// Whether a filename matches the naming criterion that triggers the
    /// watch pipeline. Files that match none of the rules are ignored by the
    /// watcher (but can still be attached via an explicit request).
    pub fn matches_criteria(&self, filename: &str) -> bool {
        self.orderbekraftelse.is_match(filename)
            || self.inkop.is_match(filename)
            || self.seven_digits.is_match(filename)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

//! Human-readable decision rules from a fitted classification tree.
//!
//! Every root-to-leaf path becomes one [`DecisionRule`]. Split features are
//! resolved back to their semantic feature through the transformer's
//! [`FeatureOrigin`]s: indicator splits read as `plan IS gold` /
//! `plan IS NOT gold`, numeric splits as `age ≤ 37 years` / `age > 37 years`
//! with the threshold mapped back to raw units when the feature was scaled.
//!
//! Rules come back sorted by supporting samples, largest first. Because
//! they are leaves of one tree, exactly one rule matches any input vector
//! and their sample counts add up to the training rows.

use crate::model::{DecisionTree, TreeNode};
use crate::transform::FeatureOrigin;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Display unit of a numeric feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Years,
    Currency,
    Count,
    CalendarYear,
    CalendarMonth,
    Generic,
}

impl Unit {
    /// Guess a unit from a feature name.
    pub fn infer(feature: &str) -> Self {
        let name = feature.to_lowercase();
        if name == "age" || name.ends_with("_age") || name.starts_with("age_") || name.contains("tenure") {
            Self::Years
        } else if ["premium", "amount", "price", "cost", "salary"]
            .iter()
            .any(|k| name.contains(k))
        {
            Self::Currency
        } else if ["members", "count", "num_", "number_of", "dependents"]
            .iter()
            .any(|k| name.contains(k))
        {
            Self::Count
        } else if name.contains("year") {
            Self::CalendarYear
        } else if name.contains("month") {
            Self::CalendarMonth
        } else {
            Self::Generic
        }
    }

    pub fn format(self, value: f64) -> String {
        let decimals = if self == Self::Generic { 2 } else { 0 };
        self.render(value, decimals)
    }

    /// Text for a split threshold that keeps both branches honest.
    ///
    /// Tree thresholds sit halfway between observed values, so whole-valued
    /// data splits at `x.5`. Showing the floor there reads correctly on
    /// both sides (`≤ 37` / `> 37` for 37.5). Other fractional thresholds
    /// keep one decimal instead of being rounded to a whole number.
    pub fn format_threshold(self, threshold: f64) -> String {
        if self == Self::Generic {
            return self.format(threshold);
        }
        let fraction = threshold - threshold.floor();
        if fraction == 0.0 || fraction == 0.5 {
            self.render(threshold.floor(), 0)
        } else {
            self.render(threshold, 1)
        }
    }

    fn render(self, value: f64, decimals: usize) -> String {
        match self {
            Self::Years => format!("{value:.decimals$} years"),
            Self::Currency => format!("${value:.decimals$}"),
            Self::Count | Self::CalendarYear | Self::CalendarMonth | Self::Generic => {
                format!("{value:.decimals$}")
            }
        }
    }
}

/// Unit overrides and display labels applied while extracting rules.
#[derive(Debug, Clone, Default)]
pub struct RuleFormat {
    pub units: BTreeMap<String, Unit>,
    pub labels: BTreeMap<String, String>,
}

impl RuleFormat {
    pub fn unit_for(&self, feature: &str) -> Unit {
        self.units
            .get(feature)
            .copied()
            .unwrap_or_else(|| Unit::infer(feature))
    }

    fn label_for(&self, feature: &str) -> String {
        self.labels
            .get(feature)
            .cloned()
            .unwrap_or_else(|| feature.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Subject {
    Numeric {
        feature: String,
        unit: Unit,
        /// Threshold in raw (unscaled) units.
        raw_threshold: f64,
    },
    Indicator {
        feature: String,
        value: String,
    },
}

/// One split decision on a rule's path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Encoded feature index tested.
    pub index: usize,
    /// Encoded-space threshold.
    pub threshold: f64,
    /// True for the `<= threshold` branch.
    pub left: bool,
    pub subject: Subject,
}

impl Condition {
    pub fn matches(&self, x: &[f64]) -> bool {
        let value = x.get(self.index).copied().unwrap_or(f64::NAN);
        (value <= self.threshold) == self.left
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Subject::Numeric {
                feature,
                unit,
                raw_threshold,
            } => {
                let op = if self.left { "≤" } else { ">" };
                write!(f, "{feature} {op} {}", unit.format_threshold(*raw_threshold))
            }
            Subject::Indicator { feature, value } => {
                let op = if self.left { "IS NOT" } else { "IS" };
                write!(f, "{feature} {op} {value}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRule {
    pub conditions: Vec<Condition>,
    pub class: u8,
    pub samples: usize,
    /// Share of renewals among the leaf's training rows.
    pub probability: f64,
}

impl DecisionRule {
    pub fn matches(&self, x: &[f64]) -> bool {
        self.conditions.iter().all(|c| c.matches(x))
    }

    pub fn outcome(&self) -> &'static str {
        if self.class == 1 {
            "Renewed"
        } else {
            "Not renewed"
        }
    }
}

impl fmt::Display for DecisionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conditions.is_empty() {
            write!(f, "ALWAYS")?;
        } else {
            write!(f, "IF ")?;
            for (i, c) in self.conditions.iter().enumerate() {
                if i > 0 {
                    write!(f, " AND ")?;
                }
                write!(f, "{c}")?;
            }
        }
        write!(f, " THEN {} (samples: {})", self.outcome(), self.samples)
    }
}

fn branch_subject(
    feature: usize,
    threshold: f64,
    origins: &[FeatureOrigin],
    format: &RuleFormat,
) -> Subject {
    match origins.get(feature) {
        Some(FeatureOrigin::Indicator { feature, value }) => Subject::Indicator {
            feature: format.label_for(feature),
            value: value.clone(),
        },
        Some(FeatureOrigin::Numeric { feature, scaling }) => Subject::Numeric {
            feature: format.label_for(feature),
            unit: format.unit_for(feature),
            raw_threshold: scaling.map_or(threshold, |s| s.unscale(threshold)),
        },
        None => {
            let name = format!("feature_{feature}");
            Subject::Numeric {
                unit: format.unit_for(&name),
                feature: name,
                raw_threshold: threshold,
            }
        }
    }
}

fn walk(
    node: &TreeNode,
    path: &[Condition],
    origins: &[FeatureOrigin],
    format: &RuleFormat,
) -> Vec<DecisionRule> {
    match node {
        TreeNode::Leaf(leaf) => vec![DecisionRule {
            conditions: path.to_vec(),
            class: leaf.class,
            samples: leaf.n_samples,
            probability: leaf.probability(),
        }],
        TreeNode::Split(split) => {
            let subject = branch_subject(split.feature, split.threshold, origins, format);
            let branch = |left: bool| {
                let mut extended = path.to_vec();
                extended.push(Condition {
                    index: split.feature,
                    threshold: split.threshold,
                    left,
                    subject: subject.clone(),
                });
                extended
            };

            let mut rules = walk(&split.left, &branch(true), origins, format);
            rules.extend(walk(&split.right, &branch(false), origins, format));
            rules
        }
    }
}

/// Extract every leaf rule, sorted by samples descending (stable).
pub fn extract_rules(
    tree: &DecisionTree,
    origins: &[FeatureOrigin],
    format: &RuleFormat,
) -> Vec<DecisionRule> {
    let mut rules = walk(tree.root(), &[], origins, format);
    rules.sort_by(|a, b| b.samples.cmp(&a.samples));
    rules
}

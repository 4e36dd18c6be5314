//! Demographic eligibility filters.
//!
//! A [`SchemeFilter`] is a conjunction of [`AxisPredicate`]s, one per
//! profile attribute the user supplied. Each predicate passes a scheme when
//! the scheme does not restrict that axis at all, or when its allow-list
//! names the user's value or one of the axis' wildcard values. Axes the
//! profile leaves out add no predicate.

use crate::models::{SchemeFilters, UserProfile};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterAxis {
    State,
    Gender,
    Caste,
}

impl FilterAxis {
    pub const ALL: [FilterAxis; 3] = [FilterAxis::State, FilterAxis::Gender, FilterAxis::Caste];

    /// Values that, when listed by a scheme, admit everyone on this axis.
    pub fn wildcards(self) -> &'static [&'static str] {
        match self {
            Self::State => &["Pan-India"],
            Self::Gender => &["All"],
            Self::Caste => &["General", "All"],
        }
    }

    /// Payload field name used by the stores.
    pub fn field(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Gender => "gender",
            Self::Caste => "caste",
        }
    }

    pub fn allowed<'a>(self, filters: &'a SchemeFilters) -> &'a [String] {
        match self {
            Self::State => &filters.state,
            Self::Gender => &filters.gender,
            Self::Caste => &filters.caste,
        }
    }

    pub fn profile_value(self, profile: &UserProfile) -> Option<&str> {
        let value = match self {
            Self::State => profile.state.as_deref(),
            Self::Gender => profile.gender.as_deref(),
            Self::Caste => profile.social_category.as_deref(),
        };
        value.map(str::trim).filter(|value| !value.is_empty())
    }

    fn is_wildcard(self, value: &str) -> bool {
        self.wildcards().iter().any(|wildcard| *wildcard == value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisPredicate {
    pub axis: FilterAxis,
    /// The user's value followed by the axis wildcards.
    pub accepted: Vec<String>,
}

impl AxisPredicate {
    pub fn new(axis: FilterAxis, value: &str) -> Self {
        let mut accepted = vec![value.trim().to_string()];
        accepted.extend(axis.wildcards().iter().map(|wildcard| (*wildcard).to_string()));
        Self { axis, accepted }
    }

    pub fn matches(&self, filters: &SchemeFilters) -> bool {
        let allowed = self.axis.allowed(filters);
        allowed.is_empty()
            || allowed
                .iter()
                .any(|value| self.accepted.iter().any(|accepted| accepted == value.trim()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeFilter {
    predicates: Vec<AxisPredicate>,
}

impl SchemeFilter {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn from_profile(profile: &UserProfile) -> Self {
        FilterAxis::ALL
            .into_iter()
            .fold(Self::unrestricted(), |filter, axis| {
                filter.with_profile_axis(axis, profile)
            })
    }

    /// Adds the predicate for `axis` unless the profile leaves it unset or
    /// names the axis wildcard itself.
    pub fn with_profile_axis(self, axis: FilterAxis, profile: &UserProfile) -> Self {
        match axis.profile_value(profile) {
            Some(value) if !axis.is_wildcard(value) => self.and(AxisPredicate::new(axis, value)),
            _ => self,
        }
    }

    pub fn and(mut self, predicate: AxisPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn predicates(&self) -> &[AxisPredicate] {
        &self.predicates
    }

    pub fn is_unrestricted(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(&self, filters: &SchemeFilters) -> bool {
        self.predicates.iter().all(|predicate| predicate.matches(filters))
    }
}

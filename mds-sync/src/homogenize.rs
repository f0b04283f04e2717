//! Value homogenization: pure, type-targeted normalizers composed into a
//! `CompositeHomogenizer`, used wherever values must compare equal
//! regardless of superficial formatting. Each homogenizer is the
//! identity on values outside its target type.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use mds_core::domain::FieldValue;

/// A pure normalization function for one value type.
pub trait Homogenizer: Send + Sync {
    fn homogenize(&self, value: FieldValue) -> FieldValue;
}

/// Lowercases text values.
pub struct CaseFoldHomogenizer;

impl Homogenizer for CaseFoldHomogenizer {
    fn homogenize(&self, value: FieldValue) -> FieldValue {
        match value {
            FieldValue::Text(s) => FieldValue::Text(s.to_lowercase()),
            other => other,
        }
    }
}

/// Strips leading and trailing whitespace from text values.
pub struct TrimHomogenizer;

impl Homogenizer for TrimHomogenizer {
    fn homogenize(&self, value: FieldValue) -> FieldValue {
        match value {
            FieldValue::Text(s) => FieldValue::Text(s.trim().to_string()),
            other => other,
        }
    }
}

/// Truncates timestamps to midnight UTC so values differing only in
/// time-of-day compare equal.
pub struct DateOnlyHomogenizer;

impl Homogenizer for DateOnlyHomogenizer {
    fn homogenize(&self, value: FieldValue) -> FieldValue {
        match value {
            FieldValue::Timestamp(t) => {
                let midnight = t
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
                    .unwrap_or(t);
                FieldValue::Timestamp(midnight)
            }
            other => other,
        }
    }
}

/// Applies every registered homogenizer in order.
pub struct CompositeHomogenizer {
    parts: Vec<Arc<dyn Homogenizer>>,
}

impl CompositeHomogenizer {
    pub fn new(parts: Vec<Arc<dyn Homogenizer>>) -> Self {
        CompositeHomogenizer { parts }
    }

    /// The standard chain: trim, case-fold, date-only.
    pub fn standard() -> Self {
        CompositeHomogenizer::new(vec![
            Arc::new(TrimHomogenizer),
            Arc::new(CaseFoldHomogenizer),
            Arc::new(DateOnlyHomogenizer),
        ])
    }

    pub fn homogenize(&self, value: FieldValue) -> FieldValue {
        self.parts
            .iter()
            .fold(value, |acc, part| part.homogenize(acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn case_fold_lowercases_text() {
        let out = CaseFoldHomogenizer.homogenize(FieldValue::from("Blue Moon"));
        assert_eq!(out, FieldValue::from("blue moon"));
    }

    #[test]
    fn unsupported_types_pass_through_unchanged() {
        assert_eq!(
            CaseFoldHomogenizer.homogenize(FieldValue::Integer(7)),
            FieldValue::Integer(7)
        );
        assert_eq!(
            TrimHomogenizer.homogenize(FieldValue::Bool(true)),
            FieldValue::Bool(true)
        );
        assert_eq!(
            DateOnlyHomogenizer.homogenize(FieldValue::from("  text  ")),
            FieldValue::from("  text  ")
        );
        assert_eq!(
            CaseFoldHomogenizer.homogenize(FieldValue::Null),
            FieldValue::Null
        );
    }

    #[test]
    fn date_only_strips_time_of_day() {
        let stamp = Utc.with_ymd_and_hms(2024, 3, 14, 15, 9, 26).unwrap();
        let midnight = Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap();
        assert_eq!(
            DateOnlyHomogenizer.homogenize(FieldValue::Timestamp(stamp)),
            FieldValue::Timestamp(midnight)
        );
    }

    #[test]
    fn composite_applies_all_parts() {
        let composite = CompositeHomogenizer::standard();
        assert_eq!(
            composite.homogenize(FieldValue::from("  MiXeD Case  ")),
            FieldValue::from("mixed case")
        );
    }
}

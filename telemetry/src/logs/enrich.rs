//! Correlation enrichment.
//!
//! Copies the active activity's fields onto a log record, gated per field by
//! [`ActivityTrackingOptions`].

use crate::error::ParseValueError;
use crate::models::{Activity, Correlation};
use bitflags::bitflags;
use opentelemetry::trace::{SpanId, TraceId};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

bitflags! {
    /// Which activity fields are copied onto log records.
    ///
    /// Defaults to all five.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ActivityTrackingOptions: u8 {
        /// The span id.
        const SPAN_ID = 1;
        /// The trace id.
        const TRACE_ID = 1 << 1;
        /// The parent span id.
        const PARENT_ID = 1 << 2;
        /// Propagated baggage.
        const BAGGAGE = 1 << 3;
        /// Activity tags.
        const TAGS = 1 << 4;
    }
}

const NAMES: [(&str, ActivityTrackingOptions); 5] = [
    ("SpanId", ActivityTrackingOptions::SPAN_ID),
    ("TraceId", ActivityTrackingOptions::TRACE_ID),
    ("ParentId", ActivityTrackingOptions::PARENT_ID),
    ("Baggage", ActivityTrackingOptions::BAGGAGE),
    ("Tags", ActivityTrackingOptions::TAGS),
];

impl Default for ActivityTrackingOptions {
    fn default() -> Self {
        Self::all()
    }
}

impl FromStr for ActivityTrackingOptions {
    type Err = ParseValueError;

    /// Parses a comma-separated list such as `"TraceId, SpanId"`. `None`
    /// turns every field off.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .try_fold(Self::empty(), |options, name| {
                if name.eq_ignore_ascii_case("none") {
                    return Ok(options);
                }
                NAMES
                    .iter()
                    .find(|(known, _)| known.eq_ignore_ascii_case(name))
                    .map(|(_, flag)| options | *flag)
                    .ok_or(ParseValueError {
                        expected: "SpanId, TraceId, ParentId, Baggage, Tags, None",
                    })
            })
    }
}

impl fmt::Display for ActivityTrackingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        f.write_str(&names.join(", "))
    }
}

impl Serialize for ActivityTrackingOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Builds the correlation fields for a record.
///
/// With no activity, or with every option off, the result is empty.
#[must_use]
pub fn correlate(activity: Option<&Activity>, options: ActivityTrackingOptions) -> Correlation {
    let Some(activity) = activity else {
        return Correlation::default();
    };

    let trace_id = activity.trace_id();
    let span_id = activity.span_id();

    Correlation {
        trace_id: (options.contains(ActivityTrackingOptions::TRACE_ID)
            && trace_id != TraceId::INVALID)
            .then(|| trace_id.to_string()),
        span_id: (options.contains(ActivityTrackingOptions::SPAN_ID) && span_id != SpanId::INVALID)
            .then(|| span_id.to_string()),
        parent_id: activity
            .parent_span_id()
            .filter(|_| options.contains(ActivityTrackingOptions::PARENT_ID))
            .map(|id| id.to_string()),
        baggage: if options.contains(ActivityTrackingOptions::BAGGAGE) {
            activity.baggage()
        } else {
            Default::default()
        },
        tags: if options.contains(ActivityTrackingOptions::TAGS) {
            activity.tags()
        } else {
            Default::default()
        },
        sampled: activity.is_sampled(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActivitySource;
    use opentelemetry::baggage::BaggageExt;
    use opentelemetry::trace::{
        SpanContext, TraceContextExt, TraceFlags, TraceState, Tracer, TracerProvider as _,
    };
    use opentelemetry::{Context, KeyValue};
    use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};

    fn activity() -> Activity {
        let remote = SpanContext::new(
            TraceId::from_hex("5759e988bd862e3fe1be46a994272793").unwrap(),
            SpanId::from_hex("53995c3f42cd8ad8").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let parent_id = remote.span_id();
        let parent = Context::new()
            .with_remote_span_context(remote)
            .with_baggage(vec![KeyValue::new("tenant", "acme")]);
        let provider = SdkTracerProvider::builder().build();
        let span = provider.tracer("enrich-tests").start_with_context("op", &parent);
        let activity = Activity::new(
            "op",
            ActivitySource::Internal,
            parent.with_span(span),
            Some(parent_id),
        );
        activity.set_tag("order.id", "o-42");
        activity
    }

    #[test]
    fn test_defaults_to_all_fields() {
        assert_eq!(ActivityTrackingOptions::default(), ActivityTrackingOptions::all());
        assert_eq!(
            ActivityTrackingOptions::default().to_string(),
            "SpanId, TraceId, ParentId, Baggage, Tags"
        );
    }

    #[test]
    fn test_parse_names() {
        let parsed: ActivityTrackingOptions = "traceid, SpanId".parse().unwrap();
        assert_eq!(parsed, ActivityTrackingOptions::TRACE_ID | ActivityTrackingOptions::SPAN_ID);
        assert!("None".parse::<ActivityTrackingOptions>().unwrap().is_empty());
        assert!("SpanId, Everything".parse::<ActivityTrackingOptions>().is_err());
    }

    #[test]
    fn test_no_activity_gives_empty_correlation() {
        assert!(correlate(None, ActivityTrackingOptions::all()).is_empty());
    }

    #[test]
    fn test_all_fields_copied() {
        let activity = activity();
        let correlation = correlate(Some(&activity), ActivityTrackingOptions::all());

        assert_eq!(correlation.trace_id.as_deref(), Some("5759e988bd862e3fe1be46a994272793"));
        assert_eq!(correlation.span_id, Some(activity.span_id().to_string()));
        assert_eq!(correlation.parent_id.as_deref(), Some("53995c3f42cd8ad8"));
        assert_eq!(correlation.baggage.get("tenant").map(String::as_str), Some("acme"));
        assert_eq!(correlation.tags.get("order.id").map(String::as_str), Some("o-42"));
    }

    #[test]
    fn test_sampled_flag_follows_the_span() {
        assert!(correlate(Some(&activity()), ActivityTrackingOptions::all()).sampled);

        let provider = SdkTracerProvider::builder().with_sampler(Sampler::AlwaysOff).build();
        let span = provider.tracer("enrich-tests").start("dropped");
        let dropped = Activity::new(
            "dropped",
            ActivitySource::Internal,
            Context::new().with_span(span),
            None,
        );

        let correlation = correlate(Some(&dropped), ActivityTrackingOptions::all());
        assert!(correlation.trace_id.is_some());
        assert!(!correlation.sampled);
    }

    #[test]
    fn test_toggling_one_flag_changes_only_that_field() {
        let activity = activity();
        let full = correlate(Some(&activity), ActivityTrackingOptions::all());

        for (_, flag) in NAMES {
            let reduced = correlate(Some(&activity), ActivityTrackingOptions::all() - flag);
            let mut expected = full.clone();
            if flag == ActivityTrackingOptions::SPAN_ID {
                expected.span_id = None;
            } else if flag == ActivityTrackingOptions::TRACE_ID {
                expected.trace_id = None;
            } else if flag == ActivityTrackingOptions::PARENT_ID {
                expected.parent_id = None;
            } else if flag == ActivityTrackingOptions::BAGGAGE {
                expected.baggage.clear();
            } else {
                expected.tags.clear();
            }
            assert_eq!(reduced, expected, "{flag:?}");
        }
    }
}

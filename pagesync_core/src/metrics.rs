//! Static registry of the insight series pulled for pages and posts.
//!
//! Each descriptor names the Graph metric, its aggregation period, the table
//! its points are reconciled into and a pure parser from the raw `value` of a
//! point to the stored field-set.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Parsed metric columns; absent sub-keys are `None`.
pub type InsightFields = BTreeMap<String, Option<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Lifetime,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Lifetime => "lifetime",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "day" => Ok(Self::Day),
            "lifetime" => Ok(Self::Lifetime),
            other => Err(Error::payload(format!("unknown insight period '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Page,
    Post,
}

#[derive(Clone, Copy)]
pub struct MetricDescriptor {
    pub metric: &'static str,
    pub period: Period,
    pub scope: Scope,
    pub table: &'static str,
    parser: fn(&Value) -> InsightFields,
}

impl MetricDescriptor {
    pub fn parse(&self, raw: &Value) -> InsightFields {
        (self.parser)(raw)
    }
}

impl fmt::Debug for MetricDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricDescriptor")
            .field("metric", &self.metric)
            .field("period", &self.period)
            .field("scope", &self.scope)
            .field("table", &self.table)
            .finish()
    }
}

const fn daily(metric: &'static str, table: &'static str) -> MetricDescriptor {
    MetricDescriptor {
        metric,
        period: Period::Day,
        scope: Scope::Page,
        table,
        parser: parse_scalar,
    }
}

pub static PAGE_METRICS: [MetricDescriptor; 13] = [
    daily("page_post_engagements", "pages_daily_page_post_engagements"),
    daily(
        "page_posts_impressions_nonviral_unique",
        "pages_daily_unique_page_posts_impressions_nonviral",
    ),
    daily(
        "page_posts_impressions_organic_unique",
        "pages_daily_unique_page_posts_impressions_organic",
    ),
    daily(
        "page_posts_impressions_paid_unique",
        "pages_daily_unique_page_posts_impressions_paid",
    ),
    daily(
        "page_posts_impressions_unique",
        "pages_daily_unique_page_posts_impressions",
    ),
    daily(
        "page_posts_impressions_viral_unique",
        "pages_daily_unique_page_posts_impressions_viral",
    ),
    daily(
        "page_video_views_autoplayed",
        "pages_daily_page_video_views_autoplayed",
    ),
    daily(
        "page_video_views_click_to_play",
        "pages_daily_page_video_views_click_to_play",
    ),
    daily("page_video_views", "pages_daily_page_video_views"),
    daily("page_video_views_organic", "pages_daily_page_video_views_organic"),
    daily("page_video_views_paid", "pages_daily_page_video_views_paid"),
    daily("page_video_views_unique", "pages_daily_unique_page_video_views"),
    daily("page_video_view_time", "pages_daily_page_video_view_time"),
];

pub static POST_METRICS: [MetricDescriptor; 3] = [
    MetricDescriptor {
        metric: "post_activity_by_action_type_unique",
        period: Period::Lifetime,
        scope: Scope::Post,
        table: "pages_life_time_unique_post_activity_by_action_type",
        parser: parse_activity_by_action_type,
    },
    MetricDescriptor {
        metric: "post_clicks_by_type_unique",
        period: Period::Lifetime,
        scope: Scope::Post,
        table: "pages_life_time_unique_post_clicks_by_type",
        parser: parse_clicks_by_type,
    },
    MetricDescriptor {
        metric: "post_reactions_by_type_total",
        period: Period::Lifetime,
        scope: Scope::Post,
        table: "pages_life_time_post_reactions_by_type_total",
        parser: parse_reactions_by_type,
    },
];

pub fn descriptor(metric: &str) -> Option<&'static MetricDescriptor> {
    PAGE_METRICS
        .iter()
        .chain(POST_METRICS.iter())
        .find(|d| d.metric == metric)
}

pub fn all_tables() -> impl Iterator<Item = &'static str> {
    PAGE_METRICS
        .iter()
        .chain(POST_METRICS.iter())
        .map(|d| d.table)
}

fn parse_scalar(raw: &Value) -> InsightFields {
    InsightFields::from([("value".to_string(), raw.as_f64())])
}

/// Picks `(column, source key)` pairs out of a `{key: number}` mapping.
fn parse_breakdown(raw: &Value, columns: &[(&str, &str)]) -> InsightFields {
    columns
        .iter()
        .map(|(column, key)| {
            let v = raw.get(*key).and_then(Value::as_f64);
            (column.to_string(), v)
        })
        .collect()
}

fn parse_activity_by_action_type(raw: &Value) -> InsightFields {
    parse_breakdown(
        raw,
        &[("shares", "share"), ("likes", "like"), ("comments", "comment")],
    )
}

fn parse_clicks_by_type(raw: &Value) -> InsightFields {
    parse_breakdown(
        raw,
        &[
            ("link_clicks", "link clicks"),
            ("photo_views", "photo view"),
            ("video_plays", "video play"),
            ("other_clicks", "other clicks"),
        ],
    )
}

fn parse_reactions_by_type(raw: &Value) -> InsightFields {
    parse_breakdown(
        raw,
        &[("likes", "like"), ("angers", "anger"), ("loves", "love")],
    )
}

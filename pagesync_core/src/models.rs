//! Entity field-sets and their mapping from Graph payloads.
//!
//! Entities are plain structs assembled from key groups (`PageKey`,
//! `PostKey`). Mapping is total over each declared schema: an absent or
//! mistyped optional source field becomes `None`. Only identity fields are
//! required.

use crate::metrics::{InsightFields, MetricDescriptor, Period};
use crate::store::Record;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Graph timestamps look like `2021-03-04T10:00:00+0000`.
pub const GRAPH_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

const PHONE_NUMBER_MAX_LEN: usize = 19;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageKey {
    pub page_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostKey {
    pub page_id: String,
    pub post_id: String,
}

impl PostKey {
    /// Splits a compound `{page_id}_{post_id}` id.
    pub fn parse(compound: &str) -> Result<Self> {
        match compound.split_once('_') {
            Some((page_id, post_id)) if !page_id.is_empty() && !post_id.is_empty() => Ok(Self {
                page_id: page_id.to_string(),
                post_id: post_id.to_string(),
            }),
            _ => Err(Error::payload(format!(
                "post id '{compound}' is not of the form page_post"
            ))),
        }
    }

    pub fn compound(&self) -> String {
        format!("{}_{}", self.page_id, self.post_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub name: String,
    pub about: Option<String>,
    pub affiliation: Option<String>,
    pub app_id: Option<String>,
    pub artists_we_like: Option<String>,
    pub bio: Option<String>,
    pub birthday: Option<String>,
    pub booking_agent: Option<String>,
    pub built: Option<String>,
    pub can_check_in: Option<bool>,
    pub can_post: Option<bool>,
    pub category: Option<String>,
    pub category_list: Option<Value>,
    pub check_ins: Option<i64>,
    pub contact_address: Option<Value>,
    pub current_location: Option<String>,
    pub description: Option<String>,
    pub directed_by: Option<String>,
    pub emails: Option<Value>,
    pub hours: Option<Value>,
    pub link: Option<String>,
    pub location: Option<Value>,
    pub mission: Option<String>,
    pub username: Option<String>,
    pub were_here_count: Option<i64>,
    pub whatsapp_number: Option<String>,
}

impl Page {
    pub const TABLE: &'static str = "pages_page";

    pub fn from_payload(data: &Value) -> Result<Self> {
        let p = Fields(data);
        Ok(Self {
            id: p.required_str("id")?,
            name: p.required_str("name")?,
            about: p.str("about"),
            affiliation: p.str("affiliation"),
            app_id: p.str("app_id"),
            artists_we_like: p.str("artists_we_like"),
            bio: p.str("bio"),
            birthday: p.str("birthday"),
            booking_agent: p.str("booking_agent"),
            built: p.str("built"),
            can_check_in: p.bool("can_checkin"),
            can_post: p.bool("can_post"),
            category: p.str("category"),
            category_list: p.json("category_list"),
            check_ins: p.int("checkins"),
            contact_address: p.json("contact_address"),
            current_location: p.str("current_location"),
            description: p.str("description"),
            directed_by: p.str("directed_by"),
            emails: p.json("emails"),
            hours: p.json("hours"),
            link: p.str("link"),
            location: p.json("location"),
            mission: p.str("mission"),
            username: p.str("username"),
            were_here_count: p.int("were_here_count"),
            whatsapp_number: p.str("whatsapp_number"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagePost {
    pub id: String,
    #[serde(flatten)]
    pub key: PostKey,
    pub created_time: DateTime<Utc>,
    pub eligible_for_promotion: Option<bool>,
    pub expired: Option<bool>,
    pub full_picture: Option<String>,
    pub hidden: Option<bool>,
    pub message: Option<String>,
    pub popular: Option<bool>,
    pub published: Option<bool>,
    pub privacy: Option<Value>,
    pub promotable_id: Option<String>,
    pub shares_count: Option<i64>,
    pub status_type: Option<String>,
    pub story: Option<String>,
    pub updated_time: Option<DateTime<Utc>>,
}

impl PagePost {
    pub const TABLE: &'static str = "pages_post";

    pub fn from_payload(data: &Value) -> Result<Self> {
        let p = Fields(data);
        let id = p.required_str("id")?;
        let key = PostKey::parse(&id)?;
        let created_time = parse_graph_time(&p.required_str("created_time")?)?;
        // `shares` arrives as `{"count": n}`.
        let shares_count = data
            .get("shares")
            .and_then(|s| s.get("count").or(Some(s)))
            .and_then(Value::as_i64);
        Ok(Self {
            id,
            key,
            created_time,
            eligible_for_promotion: p.bool("is_eligible_for_promotion"),
            expired: p.bool("is_expired"),
            full_picture: p.str("full_picture"),
            hidden: p.bool("is_hidden"),
            message: p.str("message"),
            popular: p.bool("is_popular"),
            published: p.bool("is_published"),
            privacy: p.json("privacy"),
            promotable_id: p.str("promotable_id"),
            shares_count,
            status_type: p.str("status_type"),
            story: p.str("story"),
            updated_time: p
                .str("updated_time")
                .and_then(|s| parse_graph_time(&s).ok()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagePostAttachment {
    #[serde(flatten)]
    pub key: PostKey,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub target: Option<Value>,
}

impl PagePostAttachment {
    pub const TABLE: &'static str = "pages_post_attachment";

    pub fn from_payload(key: PostKey, data: &Value) -> Result<Self> {
        let p = Fields(data);
        Ok(Self {
            key,
            kind: p.required_str("type")?,
            url: p.str("url"),
            title: p.str("title"),
            description: p.str("description"),
            target: p.json("target"),
        })
    }
}

/// One dated point of a page-level series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInsight {
    #[serde(flatten)]
    pub key: PageKey,
    pub period: Period,
    pub date: String,
    pub values: InsightFields,
}

/// The cumulative value of a post-level series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostInsight {
    #[serde(flatten)]
    pub key: PostKey,
    pub period: Period,
    pub values: InsightFields,
}

/// An insight response: `{"period": .., "values": [{"value": .., "end_time": ..}]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightSeries {
    pub period: Period,
    pub points: Vec<InsightPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsightPoint {
    pub end_time: Option<String>,
    pub fields: InsightFields,
}

impl InsightSeries {
    pub fn from_payload(descriptor: &MetricDescriptor, data: &Value) -> Result<Self> {
        let period: Period = Fields(data).required_str("period")?.parse()?;
        let values = data
            .get("values")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::payload("insight without values array"))?;
        let points = values
            .iter()
            .map(|v| InsightPoint {
                end_time: v.get("end_time").and_then(Value::as_str).map(str::to_string),
                fields: descriptor.parse(v.get("value").unwrap_or(&Value::Null)),
            })
            .collect();
        Ok(Self { period, points })
    }

    pub fn page_points(&self, page_id: &str) -> Result<Vec<PageInsight>> {
        self.points
            .iter()
            .map(|point| {
                let date = point
                    .end_time
                    .clone()
                    .ok_or_else(|| Error::payload("dated insight value without end_time"))?;
                Ok(PageInsight {
                    key: PageKey {
                        page_id: page_id.to_string(),
                    },
                    period: self.period,
                    date,
                    values: point.fields.clone(),
                })
            })
            .collect()
    }

    pub fn post_points(&self, key: &PostKey) -> Vec<PostInsight> {
        self.points
            .iter()
            .map(|point| PostInsight {
                key: key.clone(),
                period: self.period,
                values: point.fields.clone(),
            })
            .collect()
    }
}

pub fn parse_graph_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(s, GRAPH_TIME_FORMAT)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::payload(format!("bad graph timestamp '{s}': {e}")))
}

pub fn non_negative(field: &str, value: Option<i64>) -> Result<()> {
    match value {
        Some(v) if v < 0 => Err(Error::Validation(format!("{field} is negative: {v}"))),
        _ => Ok(()),
    }
}

pub fn phone_number(field: &str, value: Option<&str>) -> Result<()> {
    let Some(v) = value else { return Ok(()) };
    let digits = v.strip_prefix('+').unwrap_or(v);
    let shaped = !digits.is_empty()
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')'))
        && digits.chars().any(|c| c.is_ascii_digit());
    if v.len() > PHONE_NUMBER_MAX_LEN || !shaped {
        return Err(Error::Validation(format!(
            "{field} is not a phone number: {v}"
        )));
    }
    Ok(())
}

impl Record for Page {
    type Key = String;

    fn key(&self) -> Self::Key {
        self.id.clone()
    }

    fn validate(&self) -> Result<()> {
        non_negative("check_ins", self.check_ins)?;
        non_negative("were_here_count", self.were_here_count)?;
        phone_number("whatsapp_number", self.whatsapp_number.as_deref())
    }
}

impl Record for PagePost {
    type Key = String;

    fn key(&self) -> Self::Key {
        self.id.clone()
    }

    fn validate(&self) -> Result<()> {
        non_negative("shares_count", self.shares_count)
    }
}

impl Record for PagePostAttachment {
    /// Attachments have no id of their own; the full tuple is the key.
    type Key = PagePostAttachment;

    fn key(&self) -> Self::Key {
        self.clone()
    }
}

impl Record for PageInsight {
    type Key = (String, Period, String);

    fn key(&self) -> Self::Key {
        (self.key.page_id.clone(), self.period, self.date.clone())
    }
}

impl Record for PostInsight {
    type Key = (String, String, Period);

    fn key(&self) -> Self::Key {
        (
            self.key.page_id.clone(),
            self.key.post_id.clone(),
            self.period,
        )
    }
}

/// Typed accessors over a JSON object payload.
struct Fields<'a>(&'a Value);

impl Fields<'_> {
    fn required_str(&self, key: &str) -> Result<String> {
        self.str(key)
            .ok_or_else(|| Error::payload(format!("missing string field '{key}'")))
    }

    fn str(&self, key: &str) -> Option<String> {
        self.0.get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    fn int(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    fn json(&self, key: &str) -> Option<Value> {
        self.0.get(key).filter(|v| !v.is_null()).cloned()
    }
}

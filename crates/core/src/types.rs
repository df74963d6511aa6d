use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Kind of customer-journey event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TouchpointType {
    AdClick,
    Call,
    WebsiteVisit,
    Booking,
    Custom,
}

/// UTM parameters captured with a click or landing-page visit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UtmParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Identifiers used to stitch touchpoints from different channels into
/// one customer's journey.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrelationKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_id: Option<String>,
}

impl CorrelationKey {
    /// Normalised key: phone digits, else lowercased email, else click id.
    pub fn resolve(&self) -> Option<String> {
        if let Some(phone) = &self.phone {
            let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                return Some(format!("phone:{digits}"));
            }
        }
        if let Some(email) = &self.email {
            let email = email.trim().to_lowercase();
            if !email.is_empty() {
                return Some(format!("email:{email}"));
            }
        }
        self.click_id
            .as_ref()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(|id| format!("click:{id}"))
    }
}

/// A single recorded marketing or customer-journey event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Touchpoint {
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(rename = "type")]
    pub touchpoint_type: TouchpointType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_id: Option<String>,
    #[serde(default)]
    pub utm: UtmParams,
    #[serde(default)]
    pub correlation: CorrelationKey,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Touchpoint {
    pub fn new(
        channel_id: impl Into<String>,
        touchpoint_type: TouchpointType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            campaign_id: None,
            touchpoint_type,
            timestamp,
            click_id: None,
            utm: UtmParams::default(),
            correlation: CorrelationKey::default(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation: CorrelationKey) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn is_booking(&self) -> bool {
        self.touchpoint_type == TouchpointType::Booking
    }
}

/// Touchpoints for one booking, ascending by timestamp.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "Vec<Touchpoint>", into = "Vec<Touchpoint>")]
pub struct Journey {
    touchpoints: Vec<Touchpoint>,
}

impl Journey {
    /// Builds a journey, ordering touchpoints by timestamp. Ties keep their
    /// input order.
    pub fn new(mut touchpoints: Vec<Touchpoint>) -> Self {
        touchpoints.sort_by_key(|t| t.timestamp);
        Self { touchpoints }
    }

    pub fn touchpoints(&self) -> &[Touchpoint] {
        &self.touchpoints
    }

    pub fn len(&self) -> usize {
        self.touchpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.touchpoints.is_empty()
    }

    pub fn first(&self) -> Option<&Touchpoint> {
        self.touchpoints.first()
    }

    pub fn last(&self) -> Option<&Touchpoint> {
        self.touchpoints.last()
    }

    /// The terminal booking event, when the journey ends in one and has at
    /// least one marketing touch before it.
    pub fn terminal_booking(&self) -> Option<&Touchpoint> {
        match self.touchpoints.last() {
            Some(last) if last.is_booking() && self.touchpoints.len() > 1 => Some(last),
            _ => None,
        }
    }

    /// Number of leading touchpoints that may receive credit. A terminal
    /// booking event never does.
    pub fn credit_eligible_len(&self) -> usize {
        if self.terminal_booking().is_some() {
            self.touchpoints.len() - 1
        } else {
            self.touchpoints.len()
        }
    }
}

impl From<Vec<Touchpoint>> for Journey {
    fn from(touchpoints: Vec<Touchpoint>) -> Self {
        Self::new(touchpoints)
    }
}

impl From<Journey> for Vec<Touchpoint> {
    fn from(journey: Journey) -> Self {
        journey.touchpoints
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    /// Only realised bookings carry attributable revenue.
    pub fn is_attributable(self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// A booking and the journey that led to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub booking_id: Uuid,
    pub revenue: f64,
    pub status: BookingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booked_at: Option<DateTime<Utc>>,
    pub journey: Journey,
}

impl Booking {
    /// Instant the booking happened: `booked_at`, else the terminal booking
    /// touch, else the last touch.
    pub fn conversion_time(&self) -> Option<DateTime<Utc>> {
        self.booked_at
            .or_else(|| self.journey.terminal_booking().map(|t| t.timestamp))
            .or_else(|| self.journey.last().map(|t| t.timestamp))
    }
}

/// Counters from [`assemble_journeys`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssemblyReport {
    pub journeys: usize,
    pub touchpoints: usize,
    pub uncorrelated: usize,
}

/// Groups raw touchpoints into journeys by correlation key, each ordered by
/// timestamp. Touchpoints with no usable key are dropped and counted.
pub fn assemble_journeys(
    touchpoints: impl IntoIterator<Item = Touchpoint>,
) -> (BTreeMap<String, Journey>, AssemblyReport) {
    let mut groups: BTreeMap<String, Vec<Touchpoint>> = BTreeMap::new();
    let mut report = AssemblyReport::default();

    for tp in touchpoints {
        match tp.correlation.resolve() {
            Some(key) => {
                report.touchpoints += 1;
                groups.entry(key).or_default().push(tp);
            }
            None => report.uncorrelated += 1,
        }
    }

    let journeys: BTreeMap<String, Journey> = groups
        .into_iter()
        .map(|(key, tps)| (key, Journey::new(tps)))
        .collect();
    report.journeys = journeys.len();
    (journeys, report)
}

//! Channel roll-ups of attributed revenue, model comparison, and ROAS.

use std::collections::{BTreeMap, HashMap};

use campaign_core::error::AttributionOutcome;
use campaign_core::types::Journey;
use serde::{Deserialize, Serialize};

use crate::attribution::{attribute, AttributionSettings, ModelKind};

/// Credit accumulated by one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelCredit {
    pub revenue: f64,
    /// Journeys in which the channel received a non-zero share.
    pub bookings: u64,
    /// Touchpoints the channel owned, credited or not.
    pub touches: u64,
}

pub type ChannelBreakdown = BTreeMap<String, ChannelCredit>;

/// Sums attributed revenue per channel. Each item is a journey, its
/// revenue and the fractions returned by [`attribute`] for it.
pub fn aggregate_by_channel<'a, I>(results: I) -> ChannelBreakdown
where
    I: IntoIterator<Item = (&'a Journey, f64, &'a [f64])>,
{
    let mut channels = ChannelBreakdown::new();

    for (journey, revenue, fractions) in results {
        let mut credited: Vec<&str> = Vec::new();
        for (tp, fraction) in journey.touchpoints().iter().zip(fractions) {
            let entry = channels.entry(tp.channel_id.clone()).or_default();
            entry.touches += 1;
            entry.revenue += revenue * fraction;
            if *fraction > 0.0 && !credited.contains(&tp.channel_id.as_str()) {
                credited.push(&tp.channel_id);
                entry.bookings += 1;
            }
        }
    }

    channels
}

/// Runs every configured model over the same journeys and returns the
/// channel breakdowns side by side. Each model is an independent pass.
pub fn compare_models(
    journeys: &[(Journey, f64)],
    settings: &AttributionSettings,
) -> AttributionOutcome<BTreeMap<ModelKind, ChannelBreakdown>> {
    let mut comparison = BTreeMap::new();

    for model in settings.models() {
        let fractions = journeys
            .iter()
            .map(|(journey, revenue)| attribute(journey, *revenue, &model))
            .collect::<AttributionOutcome<Vec<_>>>()?;

        let breakdown = aggregate_by_channel(
            journeys
                .iter()
                .zip(&fractions)
                .map(|((journey, revenue), f)| (journey, *revenue, f.as_slice())),
        );
        comparison.insert(model.kind(), breakdown);
    }

    Ok(comparison)
}

/// Return on ad spend for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRoas {
    pub spend: f64,
    pub revenue: f64,
    /// `revenue / spend` (0.0 when spend is zero).
    pub roas: f64,
    /// `(revenue - spend) / spend * 100` (0.0 when spend is zero).
    pub roi_percent: f64,
    /// `spend / bookings` (0.0 without bookings).
    pub cost_per_booking: f64,
}

/// Joins attributed revenue with ad spend. Channels present in either input
/// appear in the output.
pub fn channel_roas(
    credits: &ChannelBreakdown,
    spend: &HashMap<String, f64>,
) -> BTreeMap<String, ChannelRoas> {
    let mut channels: Vec<&String> = credits.keys().chain(spend.keys()).collect();
    channels.sort();
    channels.dedup();

    channels
        .into_iter()
        .map(|channel| {
            let credit = credits.get(channel).cloned().unwrap_or_default();
            let spend = spend.get(channel).copied().unwrap_or(0.0);
            let (roas, roi_percent) = if spend > 0.0 {
                (credit.revenue / spend, (credit.revenue - spend) / spend * 100.0)
            } else {
                (0.0, 0.0)
            };
            let cost_per_booking = if credit.bookings > 0 {
                spend / credit.bookings as f64
            } else {
                0.0
            };
            (
                channel.clone(),
                ChannelRoas {
                    spend,
                    revenue: credit.revenue,
                    roas,
                    roi_percent,
                    cost_per_booking,
                },
            )
        })
        .collect()
}

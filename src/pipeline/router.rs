//! # Stage: Route
//!
//! ## Responsibility
//! Decide which investigation branch handles a channel.
//!
//! ## Guarantees
//! - Known channels resolve from a static table with no model call
//! - Unknown channels get one fast-tier classification call
//! - Never fails: any classifier error or unrecognised answer yields `paid_media`
//!
//! ## NOT Responsible For
//! - Running the investigation itself

use std::sync::Arc;

use tracing::{debug, warn};

use super::prompts;
use crate::model::ChannelCategory;
use crate::ports::text::TextGenerator;

const PAID_MEDIA: &[&str] = &[
    "google_search",
    "google_pmax",
    "google_display",
    "google_youtube",
    "meta_ads",
    "tiktok_ads",
    "linkedin_ads",
    "programmatic",
    "affiliate",
];

const INFLUENCER: &[&str] = &["influencer_campaigns", "influencer"];

const OFFLINE: &[&str] = &["direct_mail", "tv", "radio", "ooh", "events", "podcast"];

/// Table lookup; `None` for channels the table does not know.
pub fn static_category(channel: &str) -> Option<ChannelCategory> {
    let c = channel.trim().to_lowercase();
    if PAID_MEDIA.contains(&c.as_str()) {
        Some(ChannelCategory::PaidMedia)
    } else if INFLUENCER.contains(&c.as_str()) {
        Some(ChannelCategory::Influencer)
    } else if OFFLINE.contains(&c.as_str()) {
        Some(ChannelCategory::Offline)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Table,
    Classifier,
    /// Classifier failed; defaulted to paid media.
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDecision {
    pub category: ChannelCategory,
    pub source: RouteSource,
}

pub struct Router {
    classifier: Arc<dyn TextGenerator>,
}

impl Router {
    pub fn new(classifier: Arc<dyn TextGenerator>) -> Self {
        Self { classifier }
    }

    pub async fn route(&self, channel: &str) -> RouteDecision {
        if let Some(category) = static_category(channel) {
            return RouteDecision { category, source: RouteSource::Table };
        }
        match self.classifier.complete(prompts::ROUTER_SYSTEM, &prompts::router_prompt(channel)).await {
            Ok(answer) => {
                let category = parse_category(&answer);
                debug!(channel, answer = %answer.trim(), %category, "channel classified");
                RouteDecision { category, source: RouteSource::Classifier }
            }
            Err(e) => {
                warn!(error = %e, channel, "channel classifier unavailable; routing to paid_media");
                RouteDecision { category: ChannelCategory::PaidMedia, source: RouteSource::Default }
            }
        }
    }
}

/// `INFLUENCER` / `OFFLINE` anywhere in the answer; everything else is paid media.
pub fn parse_category(answer: &str) -> ChannelCategory {
    let a = answer.to_uppercase();
    if a.contains("INFLUENCER") {
        ChannelCategory::Influencer
    } else if a.contains("OFFLINE") {
        ChannelCategory::Offline
    } else {
        ChannelCategory::PaidMedia
    }
}

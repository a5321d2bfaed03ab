//! # Stage: Investigate
//!
//! ## Responsibility
//! Assemble the evidence for the selected anomaly from every data source, then
//! have the fast tier condense it into an analyst summary. One implementation
//! serves all three branches; the branch decides which channel notes apply.
//!
//! ## Guarantees
//! - Every source is read "as of" `window.end`; nothing later is fetched
//! - Market and strategy lookups run concurrently and are joined before return
//! - A failing source contributes an "unavailable" line, never an error
//! - A failing model call keeps the raw evidence as the summary and marks
//!   the delta degraded
//!
//! ## NOT Responsible For
//! - Historical incidents (retrieve_context)
//! - Judging the cause (explain)

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};

use super::prompts;
use crate::model::{AnalysisWindow, Anomaly, ChannelCategory, MetricPoint};
use crate::ports::sources::{MarketSource, MetricStore, StrategySource};
use crate::ports::text::TextGenerator;

/// Relative change below which a metric reads as flat.
const TREND_THRESHOLD_PCT: f64 = 5.0;
/// Points averaged as "recent" in the performance summary.
const RECENT_POINTS: usize = 3;
const TREND_POINTS: usize = 5;
const TOP_CAMPAIGNS: usize = 5;

/// Read-only data sources the investigators draw from.
#[derive(Clone)]
pub struct EvidenceSources {
    pub store: Arc<dyn MetricStore>,
    pub market: Arc<dyn MarketSource>,
    pub strategy: Arc<dyn StrategySource>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Investigation {
    pub evidence: String,
    pub summary: String,
    pub degraded: bool,
}

pub struct Investigator {
    sources: EvidenceSources,
    generator: Arc<dyn TextGenerator>,
    metrics: Vec<String>,
    lookback_days: i64,
}

impl Investigator {
    pub fn new(sources: EvidenceSources, generator: Arc<dyn TextGenerator>, metrics: Vec<String>, lookback_days: i64) -> Self {
        Self { sources, generator, metrics, lookback_days: lookback_days.max(1) }
    }

    pub async fn investigate(&self, anomaly: &Anomaly, category: ChannelCategory, window: &AnalysisWindow) -> Investigation {
        let evidence = self.gather(anomaly, category, window).await;
        let prompt = prompts::investigator_prompt(anomaly, category, &evidence);
        match self.generator.complete(prompts::INVESTIGATOR_SYSTEM, &prompt).await {
            Ok(summary) if !summary.trim().is_empty() => Investigation { evidence, summary, degraded: false },
            Ok(_) => {
                warn!(channel = %anomaly.channel, "empty investigation summary; keeping raw evidence");
                Investigation { summary: evidence.clone(), evidence, degraded: true }
            }
            Err(e) => {
                warn!(error = %e, channel = %anomaly.channel, "investigation summary unavailable; keeping raw evidence");
                Investigation { summary: evidence.clone(), evidence, degraded: true }
            }
        }
    }

    /// Raw evidence text for `anomaly`, bounded to `window.end`.
    pub async fn gather(&self, anomaly: &Anomaly, category: ChannelCategory, window: &AnalysisWindow) -> String {
        let channel = anomaly.channel.as_str();
        let as_of = window.end;
        let (competitors, trend, saturation, attribution) = tokio::join!(
            self.sources.market.competitor_signals(channel, window),
            self.sources.market.market_trend(as_of, TREND_POINTS),
            self.sources.strategy.saturation(channel, as_of),
            self.sources.strategy.attribution(channel, as_of),
        );

        let mut out = String::new();
        let _ = writeln!(out, "## Performance (last {} days to {as_of})", self.lookback_days);
        out.push_str(&self.performance_summary(channel, window));

        let _ = writeln!(out, "\n## Campaign Breakdown ({window})");
        match self.sources.store.campaign_breakdown(channel, window) {
            Ok(mut rows) if !rows.is_empty() => {
                rows.sort_by(|a, b| b.spend.total_cmp(&a.spend));
                for r in rows.iter().take(TOP_CAMPAIGNS) {
                    let cpa = r.cpa().map(|v| format!("{v:.2}")).unwrap_or_else(|| "n/a".into());
                    let roas = r.roas().map(|v| format!("{v:.2}")).unwrap_or_else(|| "n/a".into());
                    let _ = writeln!(out, "- {}: spend {:.0}, conversions {:.0}, CPA {cpa}, ROAS {roas}", r.campaign, r.spend, r.conversions);
                }
            }
            Ok(_) => out.push_str("- no campaign rows in window\n"),
            Err(e) => {
                debug!(error = %e, channel, "campaign breakdown unavailable");
                out.push_str("- campaign data unavailable\n");
            }
        }

        out.push_str("\n## Competitor Signals\n");
        match competitors {
            Ok(signals) if !signals.is_empty() => {
                for s in &signals {
                    let _ = writeln!(out, "- {} {}: {} (magnitude {:.2})", s.date, s.competitor, s.signal, s.magnitude);
                }
            }
            Ok(_) => out.push_str("- none recorded in window\n"),
            Err(e) => {
                debug!(error = %e, channel, "competitor signals unavailable");
                out.push_str("- competitor data unavailable\n");
            }
        }

        out.push_str("\n## Market Interest Trend\n");
        match trend {
            Ok(points) if !points.is_empty() => {
                let series: Vec<String> = points.iter().map(|p| format!("{} {:.0}", p.date, p.interest)).collect();
                let _ = writeln!(out, "- {}", series.join(", "));
            }
            Ok(_) => out.push_str("- no trend data\n"),
            Err(e) => {
                debug!(error = %e, "market trend unavailable");
                out.push_str("- trend data unavailable\n");
            }
        }

        let _ = writeln!(out, "\n## Strategy Context (as of {as_of})");
        match saturation {
            Ok(Some(s)) => {
                let _ = writeln!(
                    out,
                    "- Saturation: spend {:.0}/day vs saturation point {:.0}/day, marginal ROAS {:.2}, recommendation {}",
                    s.current_daily_spend, s.saturation_point_daily, s.marginal_roas, s.recommendation
                );
            }
            Ok(None) => out.push_str("- Saturation: no signal\n"),
            Err(e) => {
                debug!(error = %e, channel, "saturation signal unavailable");
                out.push_str("- Saturation: unavailable\n");
            }
        }
        match attribution {
            Ok(Some(a)) => {
                let _ = writeln!(
                    out,
                    "- Attribution: platform ROAS {:.2}, MMM ROAS {:.2}, MTA ROAS {:.2}",
                    a.platform_roas, a.mmm_roas, a.mta_roas
                );
            }
            Ok(None) => out.push_str("- Attribution: no comparison\n"),
            Err(e) => {
                debug!(error = %e, channel, "attribution comparison unavailable");
                out.push_str("- Attribution: unavailable\n");
            }
        }

        out.push_str("\n## Channel Notes\n");
        for note in channel_notes(category, channel) {
            let _ = writeln!(out, "- {note}");
        }
        out
    }

    fn performance_summary(&self, channel: &str, window: &AnalysisWindow) -> String {
        let start = window.end - Duration::days(self.lookback_days - 1);
        let mut out = String::new();
        for metric in &self.metrics {
            let line = match self.sources.store.get_series(channel, metric, Some(start), window.end) {
                Ok(series) => trend_line(metric, &series.points),
                Err(e) => {
                    debug!(error = %e, channel, metric = %metric, "series unavailable for evidence");
                    format!("{metric}: unavailable")
                }
            };
            let _ = writeln!(out, "- {line}");
        }
        out
    }
}

/// `"cpa: 72.10 ↑ (+48.2% vs prior 11 days)"`. Recent = last three points.
pub fn trend_line(metric: &str, points: &[MetricPoint]) -> String {
    if points.is_empty() {
        return format!("{metric}: no data");
    }
    if points.len() <= RECENT_POINTS {
        let latest = points[points.len() - 1].value;
        return format!("{metric}: {latest:.2} (insufficient history)");
    }
    let split = points.len() - RECENT_POINTS;
    let mean = |p: &[MetricPoint]| p.iter().map(|x| x.value).sum::<f64>() / p.len() as f64;
    let prior = mean(&points[..split]);
    let recent = mean(&points[split..]);
    let change = if prior == 0.0 { 0.0 } else { (recent - prior) / prior * 100.0 };
    let arrow = if change > TREND_THRESHOLD_PCT {
        "↑"
    } else if change < -TREND_THRESHOLD_PCT {
        "↓"
    } else {
        "→"
    };
    format!("{metric}: {recent:.2} {arrow} ({change:+.1}% vs prior {split} days)")
}

/// Domain considerations for the branch; offline channels get their own.
pub fn channel_notes(category: ChannelCategory, channel: &str) -> Vec<&'static str> {
    match category {
        ChannelCategory::PaidMedia => vec![
            "Check auction dynamics: impression share lost to rank or budget, CPC inflation",
            "Check recent bid strategy, audience or creative changes",
            "Check conversion tracking health and attribution window changes",
        ],
        ChannelCategory::Influencer => vec![
            "Check creator posting cadence against contracted deliverables",
            "Check engagement quality for bot or fraud patterns",
            "Check promo-code and affiliate-link attribution",
        ],
        ChannelCategory::Offline => {
            let mut notes = vec!["Offline channels have no programmatic bid or budget API; remedies go through vendors"];
            notes.push(match channel {
                "tv" => "TV: check spot preemptions, GRP delivery versus plan, and make-good status",
                "radio" => "Radio: check station delivery, daypart mix and preempted spots",
                "podcast" => "Podcast: check download verification, ad placement and host-read delivery",
                "direct_mail" => "Direct mail: check drop dates, postal delivery delays and list quality",
                "ooh" => "Out-of-home: check placement verification, posting dates and audience estimates",
                "events" => "Events: check attendance against forecast and lead capture completeness",
                _ => "Check vendor delivery reports and measurement methodology",
            });
            notes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, MetricSeries, Severity};
    use crate::ports::snapshot::{Snapshot, SnapshotStore};
    use crate::ports::sources::{SaturationSignal, SpendRecommendation};
    use crate::ports::text::ScriptedGenerator;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn pts(values: &[f64]) -> Vec<MetricPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricPoint::new(d("2025-01-01") + Duration::days(i as i64), *v))
            .collect()
    }

    fn anomaly(channel: &str) -> Anomaly {
        Anomaly {
            id: Anomaly::derive_id(channel, "cpa", d("2025-01-15")),
            channel: channel.into(),
            metric: "cpa".into(),
            current_value: 75.0,
            expected_value: 45.0,
            deviation_pct: 66.7,
            z_score: 6.0,
            severity: Severity::Critical,
            direction: Direction::Spike,
            detected_at: d("2025-01-15"),
            analysis_window: AnalysisWindow::new(d("2025-01-01"), d("2025-01-15")).unwrap(),
        }
    }

    fn sources() -> EvidenceSources {
        let mut snap = Snapshot::default();
        snap.push_series(&MetricSeries::new("meta_ads", "cpa", pts(&[40.0; 15])));
        snap.saturation.push(SaturationSignal {
            date: d("2025-01-14"),
            channel: "meta_ads".into(),
            saturation_point_daily: 5_000.0,
            current_daily_spend: 5_200.0,
            marginal_roas: 0.9,
            recommendation: SpendRecommendation::Maintain,
        });
        snap.saturation.push(SaturationSignal {
            date: d("2025-01-20"),
            channel: "meta_ads".into(),
            saturation_point_daily: 1.0,
            current_daily_spend: 1.0,
            marginal_roas: 9.9,
            recommendation: SpendRecommendation::Scale,
        });
        let store = Arc::new(SnapshotStore::new(snap));
        EvidenceSources { store: store.clone(), market: store.clone(), strategy: store }
    }

    fn investigator(gen: Arc<ScriptedGenerator>) -> Investigator {
        Investigator::new(sources(), gen, vec!["cpa".into(), "roas".into()], 14)
    }

    // -- trend_line -----------------------------------------------------------

    #[test]
    fn test_trend_line_arrows() {
        assert!(trend_line("cpa", &pts(&[10.0, 10.0, 10.0, 20.0, 20.0, 20.0])).contains("↑"));
        assert!(trend_line("cpa", &pts(&[20.0, 20.0, 20.0, 10.0, 10.0, 10.0])).contains("↓"));
        assert!(trend_line("cpa", &pts(&[10.0, 10.0, 10.0, 10.2, 10.2, 10.2])).contains("→"));
    }

    #[test]
    fn test_trend_line_short_series() {
        assert_eq!(trend_line("cpa", &[]), "cpa: no data");
        assert!(trend_line("cpa", &pts(&[1.0, 2.0])).contains("insufficient history"));
    }

    #[test]
    fn test_offline_notes_are_channel_specific() {
        let notes = channel_notes(ChannelCategory::Offline, "tv");
        assert!(notes.iter().any(|n| n.contains("preemptions")));
        assert!(channel_notes(ChannelCategory::PaidMedia, "meta_ads").iter().all(|n| !n.contains("vendor")));
    }

    // -- gather / investigate -------------------------------------------------

    #[tokio::test]
    async fn test_evidence_never_reads_past_window_end() {
        let a = anomaly("meta_ads");
        let evidence = investigator(Arc::new(ScriptedGenerator::failing()))
            .gather(&a, ChannelCategory::PaidMedia, &a.analysis_window)
            .await;
        assert!(evidence.contains("marginal ROAS 0.90"), "{evidence}");
        assert!(!evidence.contains("9.90"), "{evidence}");
        assert!(evidence.contains("roas: no data") || evidence.contains("roas: unavailable"), "{evidence}");
    }

    #[tokio::test]
    async fn test_summary_failure_keeps_raw_evidence() {
        let a = anomaly("meta_ads");
        let inv = investigator(Arc::new(ScriptedGenerator::failing()))
            .investigate(&a, ChannelCategory::PaidMedia, &a.analysis_window)
            .await;
        assert!(inv.degraded);
        assert_eq!(inv.summary, inv.evidence);
    }

    #[tokio::test]
    async fn test_summary_comes_from_fast_tier() {
        let gen = Arc::new(ScriptedGenerator::new().with_rule("INVESTIGATION SUMMARY", "- CPC up 30% on brand terms"));
        let a = anomaly("meta_ads");
        let inv = investigator(gen.clone()).investigate(&a, ChannelCategory::PaidMedia, &a.analysis_window).await;
        assert!(!inv.degraded);
        assert_eq!(inv.summary, "- CPC up 30% on brand terms");
        assert_eq!(gen.calls(), 1);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::audit::{AuditEntry, AuditEvent};
use crate::core::{
    Config, ConsensusConfig, ConsensusEvent, EngineError, EngineMetrics, EngineResult, EventBus,
};
use crate::market::AssetContext;
use crate::sources::{Opinion, OpinionSource, Recommendation, SourceKind, SourceRegistry};
use crate::tournament::{WeightBook, WeightSnapshot};

const MIN_RESPONDENTS: usize = 2;

/// Upstream trading signal routed through the source pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub context: AssetContext,
    /// -100 to 100.
    pub overall_signal: f64,
    /// 0 to 1.
    pub confidence: f64,
    pub position_size: f64,
}

impl Signal {
    pub fn new(context: AssetContext, overall_signal: f64, confidence: f64) -> Self {
        Self {
            context,
            overall_signal: overall_signal.clamp(-100.0, 100.0),
            confidence: confidence.clamp(0.0, 1.0),
            position_size: 0.0,
        }
    }

    pub fn with_position_size(mut self, position_size: f64) -> Self {
        self.position_size = position_size.max(0.0);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContributingOpinion {
    pub source_id: String,
    /// Renormalized over the respondents of this decision.
    pub weight: f64,
    pub recommendation: Recommendation,
    pub raw_score: f64,
    pub confidence: f64,
    pub rationale: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub decision_id: Uuid,
    pub asset: String,
    pub original_signal: f64,
    pub consensus_signal: f64,
    pub blended_score: f64,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub agreement_count: usize,
    pub agreement_fraction: f64,
    pub respondent_count: usize,
    pub has_consensus: bool,
    pub bypassed: bool,
    /// Confidence fell below the review threshold.
    pub requires_review: bool,
    pub contributing_opinions: Vec<ContributingOpinion>,
    pub audit: Vec<AuditEntry>,
    pub timestamp: DateTime<Utc>,
}

impl ConsensusResult {
    /// Result that carries the original signal through untouched.
    fn passthrough(signal: &Signal, bypassed: bool, audit: Vec<AuditEntry>) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            asset: signal.context.asset.clone(),
            original_signal: signal.overall_signal,
            consensus_signal: signal.overall_signal,
            blended_score: signal.overall_signal,
            recommendation: Recommendation::from_score(signal.overall_signal),
            confidence: signal.confidence,
            agreement_count: 0,
            agreement_fraction: 0.0,
            respondent_count: 0,
            has_consensus: false,
            bypassed,
            requires_review: false,
            contributing_opinions: Vec::new(),
            audit,
            timestamp: Utc::now(),
        }
    }

    pub fn summary(&self) -> String {
        if self.bypassed {
            return format!(
                "{} {} (bypassed at confidence {:.2})",
                self.asset, self.recommendation, self.confidence
            );
        }
        format!(
            "{} {} blended={:.1} consensus={:.1} agreement={:.0}% ({}/{}) confidence={:.2}{}",
            self.asset,
            self.recommendation,
            self.blended_score,
            self.consensus_signal,
            self.agreement_fraction * 100.0,
            self.agreement_count,
            self.respondent_count,
            self.confidence,
            if self.requires_review { " [review]" } else { "" }
        )
    }

    pub fn exclusions(&self) -> impl Iterator<Item = &AuditEntry> {
        self.audit.iter().filter(|entry| entry.is_exclusion())
    }
}

fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Weighted blend of the source pool's opinions with the upstream signal.
pub struct ConsensusEngine {
    config: ConsensusConfig,
    source_timeout: Duration,
    initial_weight: f64,
    registry: Arc<SourceRegistry>,
    weights: Arc<WeightBook>,
    metrics: Arc<EngineMetrics>,
    event_bus: Option<Arc<EventBus>>,
}

impl ConsensusEngine {
    pub fn new(
        config: &Config,
        registry: Arc<SourceRegistry>,
        weights: Arc<WeightBook>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            config: config.consensus.clone(),
            source_timeout: config.tournament.source_timeout(),
            initial_weight: config.tournament.initial_weight,
            registry,
            weights,
            metrics,
            event_bus: None,
        }
    }

    /// Engine with its own registry, weight book and metrics.
    pub fn from_config(config: &Config) -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        Self::new(
            config,
            Arc::new(SourceRegistry::with_metrics(metrics.clone())),
            Arc::new(WeightBook::new(config.tournament.min_weight)),
            metrics,
        )
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn weights(&self) -> &Arc<WeightBook> {
        &self.weights
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn event_bus(&self) -> Option<&Arc<EventBus>> {
        self.event_bus.as_ref()
    }

    pub fn source_timeout(&self) -> Duration {
        self.source_timeout
    }

    /// Registers a source and gives it the configured initial weight.
    pub async fn register_source(&self, kind: SourceKind, source: Arc<dyn OpinionSource>) -> EngineResult<()> {
        let id = source.profile().id.clone();
        self.registry.register(kind, source).await?;

        if let Err(err) = self.weights.register(&id, self.initial_weight).await {
            self.registry.remove(&id).await;
            return Err(err);
        }
        Ok(())
    }

    pub async fn remove_source(&self, source_id: &str) -> EngineResult<bool> {
        let removed = self.registry.remove(source_id).await.is_some();
        self.weights.remove(source_id).await?;
        Ok(removed)
    }

    pub async fn process_signal(&self, signal: Signal) -> ConsensusResult {
        self.metrics.increment_signals_processed();

        let mut result = if signal.confidence >= self.config.bypass_consensus_threshold {
            self.metrics.increment_bypassed();
            tracing::info!(
                "⚡ {} bypasses consensus at confidence {:.2}",
                signal.context.asset,
                signal.confidence
            );
            let audit = vec![AuditEntry::now(AuditEvent::Bypassed {
                confidence: signal.confidence,
                threshold: self.config.bypass_consensus_threshold,
            })];
            ConsensusResult::passthrough(&signal, true, audit)
        } else if !self.config.covers(&signal.context.asset) {
            tracing::debug!("{} is outside the consensus policy", signal.context.asset);
            let audit = vec![AuditEntry::now(AuditEvent::OutsidePolicy {
                asset: signal.context.asset.clone(),
            })];
            ConsensusResult::passthrough(&signal, false, audit)
        } else {
            self.deliberate(&signal).await
        };
        result.requires_review = result.confidence < self.config.review_confidence_threshold;

        if let Some(bus) = &self.event_bus {
            bus.publish(ConsensusEvent::ConsensusComputed(Box::new(result.clone())));
        }
        result
    }

    async fn deliberate(&self, signal: &Signal) -> ConsensusResult {
        let context = Arc::new(signal.context.clone());
        let asset = context.asset.clone();
        let mut audit = Vec::new();

        let collection = self.registry.collect(context, self.source_timeout).await;

        for failure in &collection.failures {
            audit.push(AuditEntry::now(AuditEvent::SourceExcluded {
                source_id: failure.source_id.clone(),
                reason: failure.error.to_string(),
                timed_out: failure.timed_out(),
            }));
            if let Some(bus) = &self.event_bus {
                bus.publish(ConsensusEvent::SourceExcluded {
                    source_id: failure.source_id.clone(),
                    asset: asset.clone(),
                    reason: failure.error.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        let snapshot = self.weights.snapshot().await;
        let respondents = Self::weigh(
            collection.opinions,
            &snapshot,
            self.config.vote_confidence_threshold,
            &mut audit,
        );

        let mut result = ConsensusResult {
            decision_id: Uuid::new_v4(),
            asset,
            original_signal: signal.overall_signal,
            consensus_signal: 0.0,
            blended_score: 0.0,
            recommendation: Recommendation::Neutral,
            confidence: 0.0,
            agreement_count: 0,
            agreement_fraction: 0.0,
            respondent_count: respondents.len(),
            has_consensus: false,
            bypassed: false,
            requires_review: false,
            contributing_opinions: Vec::new(),
            audit: Vec::new(),
            timestamp: Utc::now(),
        };

        if respondents.is_empty() {
            let err = EngineError::InsufficientData {
                respondents: 0,
                required: MIN_RESPONDENTS,
            };
            tracing::warn!("🔇 {}: {}, falling back to neutral", result.asset, err);
            audit.push(AuditEntry::now(AuditEvent::InsufficientRespondents {
                respondents: 0,
                required: MIN_RESPONDENTS,
            }));
            self.metrics.increment_degraded();
            result.audit = audit;
            return result;
        }

        let consensus_signal: f64 = respondents.iter().map(|(o, w)| w * o.raw_score).sum();
        let consensus_sign = sign(consensus_signal);
        let (agreement_count, agreement_fraction) = respondents
            .iter()
            .filter(|(o, _)| sign(o.raw_score) == consensus_sign)
            .fold((0usize, 0.0f64), |(n, f), (_, w)| (n + 1, f + w));

        result.consensus_signal = consensus_signal;
        result.agreement_count = agreement_count;
        result.agreement_fraction = agreement_fraction;
        result.contributing_opinions =
            Self::contributors(&respondents, self.config.max_discussion_points);

        if respondents.len() < MIN_RESPONDENTS {
            audit.push(AuditEntry::now(AuditEvent::InsufficientRespondents {
                respondents: respondents.len(),
                required: MIN_RESPONDENTS,
            }));
        } else if agreement_fraction < self.config.consensus_threshold {
            audit.push(AuditEntry::now(AuditEvent::NoConsensus {
                agreement_fraction,
                threshold: self.config.consensus_threshold,
            }));
        } else {
            let r = self.config.signal_blend_ratio;
            let blended = (signal.overall_signal * r + consensus_signal * (1.0 - r)).clamp(-100.0, 100.0);
            let mean_confidence =
                respondents.iter().map(|(o, _)| o.confidence).sum::<f64>() / respondents.len() as f64;

            result.has_consensus = true;
            result.blended_score = blended;
            result.recommendation = Recommendation::from_score(blended);
            result.confidence = ((agreement_fraction + mean_confidence) / 2.0).clamp(0.0, 1.0);

            audit.push(AuditEntry::now(AuditEvent::ConsensusReached {
                agreement_fraction,
                weight_version: snapshot.version,
            }));
            self.metrics.increment_consensus_declared();
            tracing::info!("🤝 {}", result.summary());
            result.audit = audit;
            return result;
        }

        self.metrics.increment_degraded();
        tracing::info!("🤷 No consensus: {}", result.summary());
        result.audit = audit;
        result
    }

    /// Pairs each voting opinion with its share of the voters' total weight.
    fn weigh(
        opinions: Vec<Opinion>,
        snapshot: &WeightSnapshot,
        vote_threshold: f64,
        audit: &mut Vec<AuditEntry>,
    ) -> Vec<(Opinion, f64)> {
        let mut weighted = Vec::with_capacity(opinions.len());
        for opinion in opinions {
            if opinion.confidence < vote_threshold {
                tracing::debug!(
                    "🔕 {} abstains at confidence {:.2}",
                    opinion.source_id,
                    opinion.confidence
                );
                audit.push(AuditEntry::now(AuditEvent::BelowVoteThreshold {
                    source_id: opinion.source_id,
                    confidence: opinion.confidence,
                    threshold: vote_threshold,
                }));
                continue;
            }
            match snapshot.weight(&opinion.source_id).filter(|w| *w > 0.0) {
                Some(weight) => weighted.push((opinion, weight)),
                None => audit.push(AuditEntry::now(AuditEvent::Unweighted {
                    source_id: opinion.source_id,
                    weight_version: snapshot.version,
                })),
            }
        }

        let total: f64 = weighted.iter().map(|(_, w)| w).sum();
        for (_, weight) in weighted.iter_mut() {
            *weight /= total;
        }
        weighted
    }

    fn contributors(respondents: &[(Opinion, f64)], limit: usize) -> Vec<ContributingOpinion> {
        let mut ranked: Vec<&(Opinion, f64)> = respondents.iter().collect();
        ranked.sort_by(|(a, wa), (b, wb)| {
            wb.total_cmp(wa).then_with(|| a.source_id.cmp(&b.source_id))
        });

        ranked
            .into_iter()
            .take(limit)
            .map(|(opinion, weight)| ContributingOpinion {
                source_id: opinion.source_id.clone(),
                weight: *weight,
                recommendation: opinion.recommendation,
                raw_score: opinion.raw_score,
                confidence: opinion.confidence,
                rationale: opinion.rationale.clone(),
            })
            .collect()
    }
}

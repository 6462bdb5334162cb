use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{
    BiasDamping, InnovationAssessor, Opinion, OpinionSource, RegulatoryAssessor, SourceProfile,
    ValueAssessor,
};
use crate::core::{EngineError, EngineMetrics, EngineResult};
use crate::market::AssetContext;

/// Variant tag carried by every registered source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Value,
    Regulatory,
    Innovation,
    /// Supplied by the embedding application.
    External,
}

impl SourceKind {
    pub const BUILTIN: [SourceKind; 3] =
        [SourceKind::Value, SourceKind::Regulatory, SourceKind::Innovation];

    /// Instantiates a built-in variant. `External` has no built-in implementation.
    pub fn build(self, damping: BiasDamping) -> Option<Arc<dyn OpinionSource>> {
        match self {
            SourceKind::Value => Some(Arc::new(ValueAssessor::new(damping))),
            SourceKind::Regulatory => Some(Arc::new(RegulatoryAssessor::new(damping))),
            SourceKind::Innovation => Some(Arc::new(InnovationAssessor::new(damping))),
            SourceKind::External => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Value => write!(f, "value"),
            SourceKind::Regulatory => write!(f, "regulatory"),
            SourceKind::Innovation => write!(f, "innovation"),
            SourceKind::External => write!(f, "external"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "value" => Ok(SourceKind::Value),
            "regulatory" => Ok(SourceKind::Regulatory),
            "innovation" => Ok(SourceKind::Innovation),
            "external" => Ok(SourceKind::External),
            other => Err(EngineError::config(format!("unknown source kind '{}'", other))),
        }
    }
}

struct Entry {
    kind: SourceKind,
    source: Arc<dyn OpinionSource>,
}

#[derive(Debug, Clone)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: EngineError,
}

impl SourceFailure {
    pub fn timed_out(&self) -> bool {
        matches!(self.error, EngineError::Timeout { .. })
    }
}

/// Result of one fan-out: valid opinions plus the sources excluded from it.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub opinions: Vec<Opinion>,
    pub failures: Vec<SourceFailure>,
}

/// Id-keyed pool of opinion sources. Iteration order is the id order.
pub struct SourceRegistry {
    sources: RwLock<BTreeMap<String, Entry>>,
    metrics: Arc<EngineMetrics>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(EngineMetrics::new()))
    }

    pub fn with_metrics(metrics: Arc<EngineMetrics>) -> Self {
        Self {
            sources: RwLock::new(BTreeMap::new()),
            metrics,
        }
    }

    pub async fn register(&self, kind: SourceKind, source: Arc<dyn OpinionSource>) -> EngineResult<()> {
        let id = source.profile().id.clone();
        if id.trim().is_empty() {
            return Err(EngineError::config("source id must not be empty"));
        }

        let mut sources = self.sources.write().await;
        if sources.contains_key(&id) {
            return Err(EngineError::config(format!("source '{}' is already registered", id)));
        }

        tracing::info!("➕ Registered {} source '{}'", kind, id);
        sources.insert(id, Entry { kind, source });
        Ok(())
    }

    pub async fn remove(&self, source_id: &str) -> Option<Arc<dyn OpinionSource>> {
        let removed = self.sources.write().await.remove(source_id);
        if removed.is_some() {
            tracing::info!("➖ Removed source '{}'", source_id);
        }
        removed.map(|entry| entry.source)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.sources.read().await.keys().cloned().collect()
    }

    pub async fn profile(&self, source_id: &str) -> Option<SourceProfile> {
        self.sources
            .read()
            .await
            .get(source_id)
            .map(|entry| entry.source.profile().clone())
    }

    pub async fn kind(&self, source_id: &str) -> Option<SourceKind> {
        self.sources.read().await.get(source_id).map(|entry| entry.kind)
    }

    pub async fn len(&self) -> usize {
        self.sources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sources.read().await.is_empty()
    }

    /// Evaluates every registered source concurrently, each on its own task
    /// under `budget`. A source that errors, panics, overruns, or hands back an
    /// invalid opinion is reported in `failures` and nothing else is affected.
    pub async fn collect(&self, context: Arc<AssetContext>, budget: Duration) -> Collection {
        let sources: Vec<(String, Arc<dyn OpinionSource>)> = self
            .sources
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.source.clone()))
            .collect();

        let tasks = sources.into_iter().map(|(id, source)| {
            let context = context.clone();
            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let outcome = tokio::time::timeout(budget, source.evaluate(&context)).await;
                (outcome, started.elapsed())
            });
            async move { (id, handle.await) }
        });

        let mut collection = Collection::default();

        for (source_id, joined) in join_all(tasks).await {
            let result = match joined {
                Ok((Ok(evaluated), elapsed)) => {
                    self.metrics.record_evaluation_latency(elapsed);
                    evaluated.and_then(|opinion| Self::accept(&source_id, &context.asset, opinion))
                }
                Ok((Err(_), _)) => Err(EngineError::Timeout {
                    source_id: source_id.clone(),
                    budget,
                }),
                Err(join_error) => Err(EngineError::source(
                    &source_id,
                    format!("evaluation task aborted: {}", join_error),
                )),
            };

            match result {
                Ok(opinion) => collection.opinions.push(opinion),
                Err(error) => {
                    tracing::warn!("⚠️ Excluding source '{}' for {}: {}", source_id, context.asset, error);
                    let failure = SourceFailure { source_id, error };
                    self.metrics.increment_excluded(failure.timed_out());
                    collection.failures.push(failure);
                }
            }
        }

        collection
    }

    fn accept(source_id: &str, asset: &str, opinion: Opinion) -> EngineResult<Opinion> {
        if opinion.source_id != source_id {
            return Err(EngineError::source(
                source_id,
                format!("opinion attributed to '{}'", opinion.source_id),
            ));
        }
        if opinion.asset != asset {
            return Err(EngineError::source(
                source_id,
                format!("opinion is about {} instead of {}", opinion.asset, asset),
            ));
        }
        opinion.validate()?;
        Ok(opinion)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

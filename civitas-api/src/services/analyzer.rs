//! Incident photo analysis
//!
//! `CannedAnalyzer` stands in for a real vision model: it picks a taxonomy
//! entry and a canned summary at random, keeping any valid hint the citizen
//! supplied.

use async_trait::async_trait;
use civitas_common::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Mutex;

/// Category the reporter suggested, by code
#[derive(Debug, Clone, Default)]
pub struct CategoryHint {
    pub category_code: Option<String>,
    pub subcategory_code: Option<String>,
}

/// Known (category_code, subcategory_code) pairs
pub type Taxonomy = [(String, String)];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub category_code: Option<String>,
    pub subcategory_code: Option<String>,
    pub summary: String,
    /// Model confidence in [0, 1]
    pub confidence: f64,
}

#[async_trait]
pub trait IncidentAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        image: &[u8],
        hint: &CategoryHint,
        taxonomy: &Taxonomy,
    ) -> Result<Analysis>;
}

const SUMMARIES: &[&str] = &[
    "The photo shows {} affecting the public way.",
    "Visible {} that may put pedestrians at risk.",
    "Image suggests {}; on-site inspection recommended.",
    "Reported condition consistent with {}.",
    "Damage compatible with {} detected near the reported location.",
];

pub const MIN_CONFIDENCE: f64 = 0.55;
pub const MAX_CONFIDENCE: f64 = 0.99;

/// Randomised stub analyzer
pub struct CannedAnalyzer {
    rng: Mutex<StdRng>,
}

impl CannedAnalyzer {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic analyzer for tests
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn pick(&self, hint: &CategoryHint, taxonomy: &Taxonomy) -> Analysis {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let by_subcategory = hint
            .subcategory_code
            .as_deref()
            .and_then(|code| taxonomy.iter().find(|(_, sub)| sub == code));

        let chosen = match by_subcategory {
            Some(pair) => Some(pair),
            None => {
                let within: Vec<&(String, String)> = match hint.category_code.as_deref() {
                    Some(code) if taxonomy.iter().any(|(cat, _)| cat == code) => {
                        taxonomy.iter().filter(|(cat, _)| cat == code).collect()
                    }
                    _ => taxonomy.iter().collect(),
                };
                within.choose(&mut *rng).copied()
            }
        };

        let label = chosen
            .map(|(_, sub)| sub.replace('_', " "))
            .unwrap_or_else(|| "an infrastructure problem".to_string());
        let template = SUMMARIES.choose(&mut *rng).copied().unwrap_or("{}");
        let confidence: f64 = rng.gen_range(MIN_CONFIDENCE..=MAX_CONFIDENCE);

        Analysis {
            category_code: chosen.map(|(cat, _)| cat.clone()),
            subcategory_code: chosen.map(|(_, sub)| sub.clone()),
            summary: template.replace("{}", &label),
            confidence: (confidence * 100.0).round() / 100.0,
        }
    }
}

impl Default for CannedAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IncidentAnalyzer for CannedAnalyzer {
    async fn analyze(
        &self,
        image: &[u8],
        hint: &CategoryHint,
        taxonomy: &Taxonomy,
    ) -> Result<Analysis> {
        let analysis = self.pick(hint, taxonomy);
        tracing::debug!(
            image_bytes = image.len(),
            category = ?analysis.category_code,
            confidence = analysis.confidence,
            "Canned analysis produced"
        );
        Ok(analysis)
    }
}

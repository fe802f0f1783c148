//! ETA Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout the ETA system:
//! - Extraction models (concepts, entities, sources, extraction types)
//! - Common error types
//! - Data-access traits for the extraction store and hit-count services
//! - Configuration management
//! - Store implementations (PostgreSQL, in-memory)

pub mod config;
pub mod memory;
pub mod store;
pub mod words;

pub use config::{
    AppConfig, ConfigError, DatabaseConfig, EvaluationConfig, GraphWalkConfig, LoggingConfig,
    PmiConfig, ReportConfig, SearchConfig, SweepParameter, VotingConfig,
};
pub use memory::{Dataset, MemoryStore};
pub use store::PgExtractionStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for ETA operations
#[derive(Error, Debug)]
pub enum EtaError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Data access error: {0}")]
    DataAccess(String),

    #[error("Hit count error: {0}")]
    HitCount(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for EtaError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for EtaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EtaError>;

// ============================================================================
// Identifiers
// ============================================================================

/// Numeric id of a concept
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptId(pub i64);

/// Numeric id of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

/// Numeric id of a source (web page)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub i64);

/// Identifier of the extraction pattern/method that produced an (entity, source) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionType(pub i32);

macro_rules! impl_display {
    ($($ty:ty),*) => {
        $(impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        })*
    };
}

impl_display!(ConceptId, EntityId, SourceId, ExtractionType);

// ============================================================================
// Extraction Models
// ============================================================================

/// A named category of entities (e.g. "City", "Movie")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    pub name: String,
}

impl Concept {
    /// Create a new concept
    pub fn new(id: ConceptId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Singular form of the concept name
    pub fn singular(&self) -> &str {
        &self.name
    }

    /// Plural form of the concept name
    pub fn plural(&self) -> String {
        words::to_plural(&self.name)
    }
}

/// Role of an entity within one evaluation iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityRole {
    #[default]
    Unclassified,
    Training,
    Testing,
    Seed,
}

impl std::fmt::Display for EntityRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unclassified => write!(f, "unclassified"),
            Self::Training => write!(f, "training"),
            Self::Testing => write!(f, "testing"),
            Self::Seed => write!(f, "seed"),
        }
    }
}

/// An extracted instance of a concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,

    pub name: String,

    /// Concept this entity was extracted for
    pub concept_id: ConceptId,

    /// Ground-truth label (1.0 = correct, 0.0 = incorrect, or continuous)
    #[serde(default)]
    pub label: f64,

    /// Trust score assigned by the voting engines
    #[serde(default)]
    pub trust: f64,

    /// Sources the entity was extracted from
    #[serde(default)]
    pub sources: BTreeSet<SourceId>,

    /// Extraction types that produced the entity
    #[serde(default)]
    pub extraction_types: BTreeSet<ExtractionType>,

    /// Total number of (source, extraction type) occurrences
    #[serde(default)]
    pub extraction_count: u32,

    #[serde(default)]
    pub role: EntityRole,
}

impl Entity {
    /// Create a new entity without any extractions
    pub fn new(id: EntityId, name: impl Into<String>, concept_id: ConceptId) -> Self {
        Self {
            id,
            name: name.into(),
            concept_id,
            label: 0.0,
            trust: 0.0,
            sources: BTreeSet::new(),
            extraction_types: BTreeSet::new(),
            extraction_count: 0,
            role: EntityRole::Unclassified,
        }
    }

    /// Set the ground-truth label
    pub fn with_label(mut self, label: f64) -> Self {
        self.label = label;
        self
    }

    /// Set the voting trust
    pub fn with_trust(mut self, trust: f64) -> Self {
        self.trust = trust;
        self
    }

    /// Record one extraction of this entity from a source
    pub fn with_extraction(mut self, source: SourceId, extraction_type: ExtractionType) -> Self {
        self.sources.insert(source);
        self.extraction_types.insert(extraction_type);
        self.extraction_count += 1;
        self
    }

    /// Whether the ground truth marks the entity as correct
    pub fn is_positive(&self) -> bool {
        self.label >= 1.0
    }
}

/// A web page an entity was extracted from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub url: String,

    /// Trust propagated from the entities the source hosts
    #[serde(default)]
    pub entity_trust: f64,
}

impl Source {
    /// Create a new untrusted source
    pub fn new(id: SourceId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            entity_trust: 0.0,
        }
    }
}

/// One row of the entity-source-extraction type relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extraction {
    pub entity_id: EntityId,
    pub source_id: SourceId,
    pub extraction_type: ExtractionType,
}

// ============================================================================
// Traits
// ============================================================================

/// Precomputed PMI values keyed by (entity, discriminator id)
pub type BenchmarkPmis = HashMap<(EntityId, u32), f64>;

/// Access to the store holding extracted entities and their provenance
#[async_trait]
pub trait ExtractionStore: Send + Sync {
    /// Load all concepts
    async fn load_concepts(&self) -> Result<Vec<Concept>>;

    /// Load the entities of a concept with labels, sources and extraction types populated
    async fn load_entities(&self, concept: ConceptId) -> Result<Vec<Entity>>;

    /// Sources an entity was extracted from
    async fn sources_for_entity(&self, entity: EntityId) -> Result<BTreeSet<SourceId>>;

    /// Extraction types that produced an entity
    async fn extraction_types_for_entity(
        &self,
        entity: EntityId,
    ) -> Result<BTreeSet<ExtractionType>>;

    /// Entities extracted from a source (across all concepts)
    async fn entities_for_source(&self, source: SourceId) -> Result<BTreeSet<EntityId>>;

    /// Extraction types used on a source for entities of a concept
    async fn extraction_types_for_source(
        &self,
        source: SourceId,
        concept: ConceptId,
    ) -> Result<BTreeSet<ExtractionType>>;

    /// Sources on which an extraction type found entities of a concept
    async fn sources_for_extraction_type(
        &self,
        extraction_type: ExtractionType,
        concept: ConceptId,
    ) -> Result<BTreeSet<SourceId>>;

    /// Entities of a concept found by an extraction type
    async fn entities_for_extraction_type(
        &self,
        extraction_type: ExtractionType,
        concept: ConceptId,
    ) -> Result<BTreeSet<EntityId>>;

    /// Current voting trust of an entity
    async fn entity_trust(&self, entity: EntityId) -> Result<f64>;

    /// Current entity trust of a source
    async fn source_trust(&self, source: SourceId) -> Result<f64>;

    /// Set the voting trust of an entity (idempotent)
    async fn set_entity_trust(&self, entity: EntityId, trust: f64) -> Result<()>;

    /// Set the entity trust of a source (idempotent)
    async fn set_source_trust(&self, source: SourceId, trust: f64) -> Result<()>;

    /// Precomputed PMI values for benchmarking
    async fn benchmark_pmis(&self) -> Result<BenchmarkPmis>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Trait for search-engine hit count retrieval
#[async_trait]
pub trait HitCountService: Send + Sync {
    /// Number of hits for a query string; zero means "no signal"
    async fn hit_count(&self, query: &str) -> Result<u64>;

    /// Get service name for logging
    fn name(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_builder() {
        let entity = Entity::new(EntityId(1), "London", ConceptId(7))
            .with_label(1.0)
            .with_extraction(SourceId(10), ExtractionType(1))
            .with_extraction(SourceId(11), ExtractionType(1))
            .with_extraction(SourceId(11), ExtractionType(3));

        assert!(entity.is_positive());
        assert_eq!(entity.sources.len(), 2);
        assert_eq!(entity.extraction_types.len(), 2);
        assert_eq!(entity.extraction_count, 3);
        assert_eq!(entity.role, EntityRole::Unclassified);
    }

    #[test]
    fn test_concept_plural() {
        let concept = Concept::new(ConceptId(1), "City");
        assert_eq!(concept.singular(), "City");
        assert_eq!(concept.plural(), "Cities");
    }

    #[test]
    fn test_config_error_conversion() {
        let err: EtaError = ConfigError::MissingRequired("DATABASE_URL".to_string()).into();
        assert!(matches!(err, EtaError::Configuration(_)));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&EntityId(42)).unwrap();
        assert_eq!(json, "42");
        assert_eq!(EntityId(42).to_string(), "42");
    }
}

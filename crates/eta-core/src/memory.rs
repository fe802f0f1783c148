//! In-memory extraction store
//!
//! Backs the CLI when a JSON dataset is given instead of a database, and
//! every test that needs a store. State lives behind a `tokio::sync::RwLock`
//! so voting passes can mutate trust through a shared reference.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio::sync::RwLock;

use crate::{
    BenchmarkPmis, Concept, ConceptId, Entity, EntityId, EtaError, Extraction, ExtractionStore,
    ExtractionType, Result, Source, SourceId,
};

/// Precomputed PMI value of one (entity, discriminator) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkPmi {
    pub entity_id: EntityId,
    pub discriminator: u32,
    pub pmi: f64,
}

/// Serialized form of a complete extraction data set
///
/// Entity `sources`, `extraction_types` and `extraction_count` are derived
/// from `extractions` when the dataset is loaded into a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Dataset {
    pub concepts: Vec<Concept>,
    pub entities: Vec<Entity>,
    pub sources: Vec<Source>,
    pub extractions: Vec<Extraction>,
    pub benchmark_pmis: Vec<BenchmarkPmi>,
}

impl Dataset {
    /// Create an empty dataset
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a dataset from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let dataset = serde_json::from_str(&content)?;
        Ok(dataset)
    }

    /// Add a concept
    pub fn with_concept(mut self, id: i64, name: &str) -> Self {
        self.concepts.push(Concept::new(ConceptId(id), name));
        self
    }

    /// Add a labelled entity
    pub fn with_entity(mut self, id: i64, name: &str, concept: i64, label: f64) -> Self {
        self.entities
            .push(Entity::new(EntityId(id), name, ConceptId(concept)).with_label(label));
        self
    }

    /// Add a source
    pub fn with_source(mut self, id: i64, url: &str) -> Self {
        self.sources.push(Source::new(SourceId(id), url));
        self
    }

    /// Add an extraction of `entity` from `source` by `extraction_type`
    pub fn with_extraction(mut self, entity: i64, source: i64, extraction_type: i32) -> Self {
        self.extractions.push(Extraction {
            entity_id: EntityId(entity),
            source_id: SourceId(source),
            extraction_type: ExtractionType(extraction_type),
        });
        self
    }

    /// Add a benchmark PMI value
    pub fn with_benchmark_pmi(mut self, entity: i64, discriminator: u32, pmi: f64) -> Self {
        self.benchmark_pmis.push(BenchmarkPmi {
            entity_id: EntityId(entity),
            discriminator,
            pmi,
        });
        self
    }
}

#[derive(Debug, Default)]
struct Inner {
    concepts: Vec<Concept>,
    entities: BTreeMap<EntityId, Entity>,
    sources: BTreeMap<SourceId, Source>,
    extractions: Vec<Extraction>,
    benchmark: BenchmarkPmis,
}

impl Inner {
    fn concept_of(&self, entity: EntityId) -> Option<ConceptId> {
        self.entities.get(&entity).map(|e| e.concept_id)
    }

    fn extractions_in(&self, concept: ConceptId) -> impl Iterator<Item = &Extraction> {
        self.extractions
            .iter()
            .filter(move |x| self.concept_of(x.entity_id) == Some(concept))
    }
}

/// Extraction store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a dataset, checking that every extraction references
    /// a known entity and source
    pub fn from_dataset(dataset: Dataset) -> Result<Self> {
        let mut entities: BTreeMap<EntityId, Entity> = BTreeMap::new();
        for mut entity in dataset.entities {
            entity.sources.clear();
            entity.extraction_types.clear();
            entity.extraction_count = 0;
            entities.insert(entity.id, entity);
        }

        let sources: BTreeMap<SourceId, Source> =
            dataset.sources.into_iter().map(|s| (s.id, s)).collect();

        for extraction in &dataset.extractions {
            if !sources.contains_key(&extraction.source_id) {
                return Err(EtaError::NotFound(format!(
                    "source {} referenced by extraction of entity {}",
                    extraction.source_id, extraction.entity_id
                )));
            }
            let entity = entities.get_mut(&extraction.entity_id).ok_or_else(|| {
                EtaError::NotFound(format!(
                    "entity {} referenced by extraction",
                    extraction.entity_id
                ))
            })?;
            entity.sources.insert(extraction.source_id);
            entity.extraction_types.insert(extraction.extraction_type);
            entity.extraction_count += 1;
        }

        let benchmark = dataset
            .benchmark_pmis
            .into_iter()
            .map(|b| ((b.entity_id, b.discriminator), b.pmi))
            .collect();

        tracing::debug!(
            concepts = dataset.concepts.len(),
            entities = entities.len(),
            sources = sources.len(),
            extractions = dataset.extractions.len(),
            "Loaded in-memory dataset"
        );

        Ok(Self {
            inner: RwLock::new(Inner {
                concepts: dataset.concepts,
                entities,
                sources,
                extractions: dataset.extractions,
                benchmark,
            }),
        })
    }

    /// Load a store from a JSON dataset file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_dataset(Dataset::from_file(path)?)
    }

    /// Snapshot of a single entity
    pub async fn entity(&self, id: EntityId) -> Option<Entity> {
        self.inner.read().await.entities.get(&id).cloned()
    }

    /// Snapshot of a single source
    pub async fn source(&self, id: SourceId) -> Option<Source> {
        self.inner.read().await.sources.get(&id).cloned()
    }

    /// Find an entity by name
    pub async fn entity_by_name(&self, name: &str) -> Option<Entity> {
        self.inner
            .read()
            .await
            .entities
            .values()
            .find(|e| e.name == name)
            .cloned()
    }

    /// Reset every entity and source trust to zero
    pub async fn reset_trust(&self) {
        let mut inner = self.inner.write().await;
        inner.entities.values_mut().for_each(|e| e.trust = 0.0);
        inner.sources.values_mut().for_each(|s| s.entity_trust = 0.0);
    }
}

#[async_trait]
impl ExtractionStore for MemoryStore {
    async fn load_concepts(&self) -> Result<Vec<Concept>> {
        Ok(self.inner.read().await.concepts.clone())
    }

    async fn load_entities(&self, concept: ConceptId) -> Result<Vec<Entity>> {
        Ok(self
            .inner
            .read()
            .await
            .entities
            .values()
            .filter(|e| e.concept_id == concept)
            .cloned()
            .collect())
    }

    async fn sources_for_entity(&self, entity: EntityId) -> Result<BTreeSet<SourceId>> {
        let inner = self.inner.read().await;
        inner
            .entities
            .get(&entity)
            .map(|e| e.sources.clone())
            .ok_or_else(|| EtaError::NotFound(format!("entity {entity}")))
    }

    async fn extraction_types_for_entity(
        &self,
        entity: EntityId,
    ) -> Result<BTreeSet<ExtractionType>> {
        let inner = self.inner.read().await;
        inner
            .entities
            .get(&entity)
            .map(|e| e.extraction_types.clone())
            .ok_or_else(|| EtaError::NotFound(format!("entity {entity}")))
    }

    async fn entities_for_source(&self, source: SourceId) -> Result<BTreeSet<EntityId>> {
        Ok(self
            .inner
            .read()
            .await
            .extractions
            .iter()
            .filter(|x| x.source_id == source)
            .map(|x| x.entity_id)
            .collect())
    }

    async fn extraction_types_for_source(
        &self,
        source: SourceId,
        concept: ConceptId,
    ) -> Result<BTreeSet<ExtractionType>> {
        let inner = self.inner.read().await;
        Ok(inner
            .extractions_in(concept)
            .filter(|x| x.source_id == source)
            .map(|x| x.extraction_type)
            .collect())
    }

    async fn sources_for_extraction_type(
        &self,
        extraction_type: ExtractionType,
        concept: ConceptId,
    ) -> Result<BTreeSet<SourceId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .extractions_in(concept)
            .filter(|x| x.extraction_type == extraction_type)
            .map(|x| x.source_id)
            .collect())
    }

    async fn entities_for_extraction_type(
        &self,
        extraction_type: ExtractionType,
        concept: ConceptId,
    ) -> Result<BTreeSet<EntityId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .extractions_in(concept)
            .filter(|x| x.extraction_type == extraction_type)
            .map(|x| x.entity_id)
            .collect())
    }

    async fn entity_trust(&self, entity: EntityId) -> Result<f64> {
        let inner = self.inner.read().await;
        inner
            .entities
            .get(&entity)
            .map(|e| e.trust)
            .ok_or_else(|| EtaError::NotFound(format!("entity {entity}")))
    }

    async fn source_trust(&self, source: SourceId) -> Result<f64> {
        let inner = self.inner.read().await;
        inner
            .sources
            .get(&source)
            .map(|s| s.entity_trust)
            .ok_or_else(|| EtaError::NotFound(format!("source {source}")))
    }

    async fn set_entity_trust(&self, entity: EntityId, trust: f64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .entities
            .get_mut(&entity)
            .ok_or_else(|| EtaError::NotFound(format!("entity {entity}")))?;
        record.trust = trust;
        Ok(())
    }

    async fn set_source_trust(&self, source: SourceId, trust: f64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .sources
            .get_mut(&source)
            .ok_or_else(|| EtaError::NotFound(format!("source {source}")))?;
        record.entity_trust = trust;
        Ok(())
    }

    async fn benchmark_pmis(&self) -> Result<BenchmarkPmis> {
        Ok(self.inner.read().await.benchmark.clone())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

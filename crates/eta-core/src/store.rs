//! PostgreSQL extraction store
//!
//! Reads concepts, entities and their provenance from the extraction
//! database and persists the trust values written by the voting engines.
//!
//! Expected tables:
//! - `concepts(id, name)`
//! - `entities(id, name, concept_id, label, trust)`
//! - `sources(id, url, entity_trust)`
//! - `entities_sources(entity_id, source_id, extraction_type)`
//! - `benchmark_pmis(entity_id, discriminator, pmi)`

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::{BTreeSet, HashMap};

use crate::{
    BenchmarkPmis, Concept, ConceptId, DatabaseConfig, Entity, EntityId, EtaError,
    ExtractionStore, ExtractionType, Result, SourceId,
};

/// Schema used by [`PgExtractionStore::ensure_schema`]
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS concepts (
    id BIGINT PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS entities (
    id BIGINT PRIMARY KEY,
    name TEXT NOT NULL,
    concept_id BIGINT NOT NULL REFERENCES concepts(id),
    label DOUBLE PRECISION NOT NULL DEFAULT 0,
    trust DOUBLE PRECISION NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS sources (
    id BIGINT PRIMARY KEY,
    url TEXT NOT NULL,
    entity_trust DOUBLE PRECISION NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS entities_sources (
    entity_id BIGINT NOT NULL REFERENCES entities(id),
    source_id BIGINT NOT NULL REFERENCES sources(id),
    extraction_type INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS entities_sources_entity_idx ON entities_sources(entity_id);
CREATE INDEX IF NOT EXISTS entities_sources_source_idx ON entities_sources(source_id);
CREATE TABLE IF NOT EXISTS benchmark_pmis (
    entity_id BIGINT NOT NULL REFERENCES entities(id),
    discriminator INTEGER NOT NULL,
    pmi DOUBLE PRECISION NOT NULL,
    PRIMARY KEY (entity_id, discriminator)
);
"#;

/// PostgreSQL extraction store
pub struct PgExtractionStore {
    pool: PgPool,
}

impl PgExtractionStore {
    /// Create a new store connection
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres_pool_size)
            .connect(&config.postgres_url)
            .await
            .map_err(|e| EtaError::DataAccess(format!("PostgreSQL connection failed: {e}")))?;

        tracing::info!(pool_size = config.postgres_pool_size, "Connected to extraction store");
        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the extraction tables if they are missing
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| EtaError::DataAccess(format!("Failed to create schema: {e}")))?;
        Ok(())
    }

    async fn id_set(&self, sql: &str, first: i64, second: Option<i64>) -> Result<Vec<i64>> {
        let mut query = sqlx::query_as::<_, (i64,)>(sql).bind(first);
        if let Some(second) = second {
            query = query.bind(second);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EtaError::DataAccess(format!("Query failed: {e}")))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

/// Concept row from database
#[derive(Debug, FromRow)]
struct ConceptRow {
    id: i64,
    name: String,
}

impl From<ConceptRow> for Concept {
    fn from(row: ConceptRow) -> Self {
        Concept::new(ConceptId(row.id), row.name)
    }
}

/// Entity row from database
#[derive(Debug, FromRow)]
struct EntityRow {
    id: i64,
    name: String,
    concept_id: i64,
    label: f64,
    trust: f64,
}

impl From<EntityRow> for Entity {
    fn from(row: EntityRow) -> Self {
        Entity::new(EntityId(row.id), row.name, ConceptId(row.concept_id))
            .with_label(row.label)
            .with_trust(row.trust)
    }
}

/// Provenance row from database
#[derive(Debug, FromRow)]
struct ProvenanceRow {
    entity_id: i64,
    source_id: i64,
    extraction_type: i32,
}

#[async_trait]
impl ExtractionStore for PgExtractionStore {
    async fn load_concepts(&self) -> Result<Vec<Concept>> {
        let rows: Vec<ConceptRow> = sqlx::query_as("SELECT id, name FROM concepts ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EtaError::DataAccess(format!("Failed to load concepts: {e}")))?;

        Ok(rows.into_iter().map(Concept::from).collect())
    }

    async fn load_entities(&self, concept: ConceptId) -> Result<Vec<Entity>> {
        let rows: Vec<EntityRow> = sqlx::query_as(
            r#"
            SELECT id, name, concept_id, label, trust
            FROM entities
            WHERE concept_id = $1
            ORDER BY id
            "#,
        )
        .bind(concept.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EtaError::DataAccess(format!("Failed to load entities: {e}")))?;

        let provenance: Vec<ProvenanceRow> = sqlx::query_as(
            r#"
            SELECT es.entity_id, es.source_id, es.extraction_type
            FROM entities_sources es
            JOIN entities e ON e.id = es.entity_id
            WHERE e.concept_id = $1
            "#,
        )
        .bind(concept.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EtaError::DataAccess(format!("Failed to load provenance: {e}")))?;

        let mut entities: Vec<Entity> = rows.into_iter().map(Entity::from).collect();
        let index: HashMap<EntityId, usize> =
            entities.iter().enumerate().map(|(i, e)| (e.id, i)).collect();

        for row in provenance {
            if let Some(&i) = index.get(&EntityId(row.entity_id)) {
                let entity = &mut entities[i];
                entity.sources.insert(SourceId(row.source_id));
                entity
                    .extraction_types
                    .insert(ExtractionType(row.extraction_type));
                entity.extraction_count += 1;
            }
        }

        Ok(entities)
    }

    async fn sources_for_entity(&self, entity: EntityId) -> Result<BTreeSet<SourceId>> {
        let ids = self
            .id_set(
                "SELECT DISTINCT source_id FROM entities_sources WHERE entity_id = $1",
                entity.0,
                None,
            )
            .await?;
        Ok(ids.into_iter().map(SourceId).collect())
    }

    async fn extraction_types_for_entity(
        &self,
        entity: EntityId,
    ) -> Result<BTreeSet<ExtractionType>> {
        let rows: Vec<(i32,)> = sqlx::query_as(
            "SELECT DISTINCT extraction_type FROM entities_sources WHERE entity_id = $1",
        )
        .bind(entity.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EtaError::DataAccess(format!("Failed to load extraction types: {e}")))?;

        Ok(rows.into_iter().map(|(t,)| ExtractionType(t)).collect())
    }

    async fn entities_for_source(&self, source: SourceId) -> Result<BTreeSet<EntityId>> {
        let ids = self
            .id_set(
                "SELECT DISTINCT entity_id FROM entities_sources WHERE source_id = $1",
                source.0,
                None,
            )
            .await?;
        Ok(ids.into_iter().map(EntityId).collect())
    }

    async fn extraction_types_for_source(
        &self,
        source: SourceId,
        concept: ConceptId,
    ) -> Result<BTreeSet<ExtractionType>> {
        let rows: Vec<(i32,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT es.extraction_type
            FROM entities_sources es
            JOIN entities e ON e.id = es.entity_id
            WHERE es.source_id = $1 AND e.concept_id = $2
            "#,
        )
        .bind(source.0)
        .bind(concept.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EtaError::DataAccess(format!("Failed to load extraction types: {e}")))?;

        Ok(rows.into_iter().map(|(t,)| ExtractionType(t)).collect())
    }

    async fn sources_for_extraction_type(
        &self,
        extraction_type: ExtractionType,
        concept: ConceptId,
    ) -> Result<BTreeSet<SourceId>> {
        let ids = self
            .id_set(
                r#"
                SELECT DISTINCT es.source_id
                FROM entities_sources es
                JOIN entities e ON e.id = es.entity_id
                WHERE es.extraction_type = $1 AND e.concept_id = $2
                "#,
                i64::from(extraction_type.0),
                Some(concept.0),
            )
            .await?;
        Ok(ids.into_iter().map(SourceId).collect())
    }

    async fn entities_for_extraction_type(
        &self,
        extraction_type: ExtractionType,
        concept: ConceptId,
    ) -> Result<BTreeSet<EntityId>> {
        let ids = self
            .id_set(
                r#"
                SELECT DISTINCT es.entity_id
                FROM entities_sources es
                JOIN entities e ON e.id = es.entity_id
                WHERE es.extraction_type = $1 AND e.concept_id = $2
                "#,
                i64::from(extraction_type.0),
                Some(concept.0),
            )
            .await?;
        Ok(ids.into_iter().map(EntityId).collect())
    }

    async fn entity_trust(&self, entity: EntityId) -> Result<f64> {
        let row: Option<(f64,)> = sqlx::query_as("SELECT trust FROM entities WHERE id = $1")
            .bind(entity.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EtaError::DataAccess(format!("Failed to read entity trust: {e}")))?;

        row.map(|(t,)| t)
            .ok_or_else(|| EtaError::NotFound(format!("entity {entity}")))
    }

    async fn source_trust(&self, source: SourceId) -> Result<f64> {
        let row: Option<(f64,)> =
            sqlx::query_as("SELECT entity_trust FROM sources WHERE id = $1")
                .bind(source.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| EtaError::DataAccess(format!("Failed to read source trust: {e}")))?;

        row.map(|(t,)| t)
            .ok_or_else(|| EtaError::NotFound(format!("source {source}")))
    }

    async fn set_entity_trust(&self, entity: EntityId, trust: f64) -> Result<()> {
        let result = sqlx::query("UPDATE entities SET trust = $2 WHERE id = $1")
            .bind(entity.0)
            .bind(trust)
            .execute(&self.pool)
            .await
            .map_err(|e| EtaError::DataAccess(format!("Failed to update entity trust: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(EtaError::NotFound(format!("entity {entity}")));
        }
        Ok(())
    }

    async fn set_source_trust(&self, source: SourceId, trust: f64) -> Result<()> {
        let result = sqlx::query("UPDATE sources SET entity_trust = $2 WHERE id = $1")
            .bind(source.0)
            .bind(trust)
            .execute(&self.pool)
            .await
            .map_err(|e| EtaError::DataAccess(format!("Failed to update source trust: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(EtaError::NotFound(format!("source {source}")));
        }
        Ok(())
    }

    async fn benchmark_pmis(&self) -> Result<BenchmarkPmis> {
        let rows: Vec<(i64, i32, f64)> =
            sqlx::query_as("SELECT entity_id, discriminator, pmi FROM benchmark_pmis")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| EtaError::DataAccess(format!("Failed to load benchmark PMIs: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(entity, discriminator, pmi)| ((EntityId(entity), discriminator as u32), pmi))
            .collect())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_row_conversion() {
        let row = EntityRow {
            id: 4,
            name: "Paris".to_string(),
            concept_id: 1,
            label: 1.0,
            trust: 0.0,
        };
        let entity = Entity::from(row);
        assert_eq!(entity.id, EntityId(4));
        assert!(entity.is_positive());
        assert!(entity.sources.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL instance (DATABASE_URL)"]
    async fn test_round_trip_trust() {
        let config = crate::AppConfig::from_env().unwrap();
        let store = PgExtractionStore::new(&config.database).await.unwrap();
        store.ensure_schema().await.unwrap();

        let concepts = store.load_concepts().await.unwrap();
        if let Some(concept) = concepts.first() {
            let entities = store.load_entities(concept.id).await.unwrap();
            if let Some(entity) = entities.first() {
                store.set_entity_trust(entity.id, 1.0).await.unwrap();
                assert_eq!(store.entity_trust(entity.id).await.unwrap(), 1.0);
            }
        }
    }
}

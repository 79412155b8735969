//! Entity catalog reader.
//!
//! Read-only view of the animals under monitoring, indexed by internal id and
//! by source-system id so raw readings can reference either.

use std::collections::HashMap;

use sqlx::PgPool;

use crate::{Entity, ScoringConfig};

// ---

#[derive(Debug, Default)]
pub struct EntityCatalog {
    by_id: HashMap<String, Entity>,
    by_external_id: HashMap<String, String>,
}

impl EntityCatalog {
    /// Build a catalog, normalizing species names to trimmed lower case.
    pub fn new(entities: Vec<Entity>) -> Self {
        // ---
        let mut catalog = Self::default();
        for mut entity in entities {
            entity.species = normalize_species(entity.species.as_deref());
            if let Some(external_id) = &entity.external_id {
                catalog
                    .by_external_id
                    .insert(external_id.clone(), entity.entity_id.clone());
            }
            catalog.by_id.insert(entity.entity_id.clone(), entity);
        }
        catalog
    }

    /// Load every entity from the `entities` table.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        // ---
        let entities: Vec<Entity> = sqlx::query_as(
            r#"
            SELECT entity_id, external_id, species, breed, age_months
            FROM entities
            "#,
        )
        .fetch_all(pool)
        .await?;

        tracing::debug!(count = entities.len(), "Loaded entity catalog");
        Ok(Self::new(entities))
    }

    pub fn get(&self, entity_id: &str) -> Option<&Entity> {
        self.by_id.get(entity_id)
    }

    /// Resolve a raw reading's entity reference. Internal ids win over
    /// external ids when both match.
    pub fn resolve(&self, entity_ref: &str) -> Option<&Entity> {
        self.by_id.get(entity_ref).or_else(|| {
            self.by_external_id
                .get(entity_ref)
                .and_then(|id| self.by_id.get(id))
        })
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Entities whose species has no entry in the scoring table. They are
    /// scored with the neutral policy.
    pub fn unrecognized_species<'a>(
        &'a self,
        scoring: &'a ScoringConfig,
    ) -> impl Iterator<Item = &'a Entity> + 'a {
        self.by_id
            .values()
            .filter(move |e| scoring.policy(e.species.as_deref()).is_none())
    }
}

fn normalize_species(species: Option<&str>) -> Option<String> {
    species
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

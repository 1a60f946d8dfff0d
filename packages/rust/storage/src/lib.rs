//! Canonical store adapter over libSQL.
//!
//! The [`Store`] struct wraps a libSQL database holding the four canonical
//! entity collections (works, persons, affiliations, sources) as JSON
//! documents, plus the index tables the resolver depends on: external
//! identifiers, normalized names, work participants, and an FTS5 table for
//! free-text lookup. Derived artifacts (co-authorship networks, top words)
//! live in their own tables; their presence is the completion marker.
//!
//! **Access rules:**
//! - One [`Store`] per worker: call [`Store::session`] to obtain an
//!   independent connection before moving work into a task. Sessions are
//!   never shared across concurrent execution contexts.
//! - Writes to entity documents go through [`Store::update_fields`]
//!   (partial, per-field) — whole-document replacement is reserved for
//!   first insertion.

mod migrations;

use std::path::Path;
use std::sync::Arc;

use libsql::{Connection, Database, params};
use serde::de::DeserializeOwned;

use bibgraph_shared::normalize::normalize;
use bibgraph_shared::{
    Affiliation, BibgraphError, EntityKind, ExternalId, NetworkArtifact, Person, Result, Source,
    TopWords, Work, WorkAuthor,
};

/// Maximum serialized size of a network artifact document, in bytes.
/// Larger artifacts are rejected with [`BibgraphError::Oversized`].
pub const MAX_ARTIFACT_BYTES: usize = 16 * 1024 * 1024;

/// Primary store handle wrapping a libSQL database.
pub struct Store {
    db: Arc<Database>,
    conn: Connection,
}

impl Store {
    /// Open or create a database at `path` and run pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BibgraphError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| BibgraphError::Store(e.to_string()))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// A new session over the same database, with its own connection.
    /// Each worker takes one; connections are not shared across tasks.
    pub fn session(&self) -> Result<Store> {
        let conn = self
            .db
            .connect()
            .map_err(|e| BibgraphError::Store(e.to_string()))?;
        Ok(Store {
            db: Arc::clone(&self.db),
            conn,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        BibgraphError::Store(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Entity insertion
    // -----------------------------------------------------------------------

    /// Insert a new work and maintain its index rows.
    pub async fn insert_work(&self, work: &Work) -> Result<()> {
        let doc = to_doc(work)?;
        self.conn
            .execute(
                "INSERT INTO works (id, doc, author_count) VALUES (?1, ?2, ?3)",
                params![work.id.as_str(), doc.as_str(), work.author_count as i64],
            )
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;

        self.index_external_ids(EntityKind::Work, &work.id, &work.external_ids)
            .await?;
        self.index_work_participants(&work.id, &work.authors)
            .await?;
        for title in &work.titles {
            self.index_fts(EntityKind::Work, &work.id, &title.title)
                .await?;
        }
        Ok(())
    }

    /// Insert a new person and maintain its index rows.
    pub async fn insert_person(&self, person: &Person) -> Result<()> {
        let doc = to_doc(person)?;
        self.insert_doc(EntityKind::Person, &person.id, &doc).await?;
        self.index_external_ids(EntityKind::Person, &person.id, &person.external_ids)
            .await?;
        self.index_name(EntityKind::Person, &person.id, &person.full_name)
            .await?;
        Ok(())
    }

    /// Insert a new affiliation and maintain its index rows.
    pub async fn insert_affiliation(&self, aff: &Affiliation) -> Result<()> {
        let doc = to_doc(aff)?;
        self.insert_doc(EntityKind::Affiliation, &aff.id, &doc).await?;
        self.index_external_ids(EntityKind::Affiliation, &aff.id, &aff.external_ids)
            .await?;
        for name in &aff.names {
            self.index_name(EntityKind::Affiliation, &aff.id, &name.name)
                .await?;
        }
        Ok(())
    }

    /// Insert a new publication source and maintain its index rows.
    pub async fn insert_source(&self, source: &Source) -> Result<()> {
        let doc = to_doc(source)?;
        self.insert_doc(EntityKind::Source, &source.id, &doc).await?;
        self.index_external_ids(EntityKind::Source, &source.id, &source.external_ids)
            .await?;
        for name in &source.names {
            self.index_name(EntityKind::Source, &source.id, &name.name)
                .await?;
        }
        Ok(())
    }

    async fn insert_doc(&self, kind: EntityKind, id: &str, doc: &str) -> Result<()> {
        let sql = format!("INSERT INTO {} (id, doc) VALUES (?1, ?2)", kind.collection());
        self.conn
            .execute(&sql, params![id, doc])
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Index maintenance
    // -----------------------------------------------------------------------

    /// Record external identifiers for strong-key lookup. Existing rows are
    /// kept (`INSERT OR IGNORE`), so re-indexing after a merge is safe.
    pub async fn index_external_ids(
        &self,
        kind: EntityKind,
        entity_id: &str,
        ids: &[ExternalId],
    ) -> Result<()> {
        for ext in ids {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO external_id_index (kind, source, ext_id, entity_id)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        kind.collection(),
                        ext.source.as_str(),
                        ext.id.as_str(),
                        entity_id
                    ],
                )
                .await
                .map_err(|e| BibgraphError::Store(e.to_string()))?;
        }
        Ok(())
    }

    /// Record a display name for exact normalized lookup and free text.
    pub async fn index_name(&self, kind: EntityKind, entity_id: &str, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Ok(());
        }
        self.conn
            .execute(
                "INSERT OR IGNORE INTO name_index (kind, name_norm, entity_id) VALUES (?1, ?2, ?3)",
                params![kind.collection(), normalize(name), entity_id],
            )
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;
        self.index_fts(kind, entity_id, name).await
    }

    /// Record a work title for free-text lookup (titles are not display
    /// names, so they skip the exact-name index).
    pub async fn index_work_title(&self, work_id: &str, title: &str) -> Result<()> {
        self.index_fts(EntityKind::Work, work_id, title).await
    }

    async fn index_fts(&self, kind: EntityKind, entity_id: &str, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        self.conn
            .execute(
                "INSERT INTO name_fts (kind, entity_id, name) VALUES (?1, ?2, ?3)",
                params![kind.collection(), entity_id, text],
            )
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;
        Ok(())
    }

    /// Record the resolved participant ids of a work's author list.
    /// Unresolved (empty) ids are skipped.
    pub async fn index_work_participants(
        &self,
        work_id: &str,
        authors: &[WorkAuthor],
    ) -> Result<()> {
        for author in authors {
            if !author.id.is_empty() {
                self.conn
                    .execute(
                        "INSERT OR IGNORE INTO work_participants (work_id, person_id, affiliation_id)
                         VALUES (?1, ?2, '')",
                        params![work_id, author.id.as_str()],
                    )
                    .await
                    .map_err(|e| BibgraphError::Store(e.to_string()))?;
            }
            for aff in &author.affiliations {
                if aff.id.is_empty() {
                    continue;
                }
                self.conn
                    .execute(
                        "INSERT OR IGNORE INTO work_participants (work_id, person_id, affiliation_id)
                         VALUES (?1, '', ?2)",
                        params![work_id, aff.id.as_str()],
                    )
                    .await
                    .map_err(|e| BibgraphError::Store(e.to_string()))?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Entity lookup
    // -----------------------------------------------------------------------

    /// Get a work by id.
    pub async fn get_work(&self, id: &str) -> Result<Option<Work>> {
        self.get_doc(EntityKind::Work, id).await
    }

    /// Get a person by id.
    pub async fn get_person(&self, id: &str) -> Result<Option<Person>> {
        self.get_doc(EntityKind::Person, id).await
    }

    /// Get an affiliation by id.
    pub async fn get_affiliation(&self, id: &str) -> Result<Option<Affiliation>> {
        self.get_doc(EntityKind::Affiliation, id).await
    }

    /// Get a publication source by id.
    pub async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        self.get_doc(EntityKind::Source, id).await
    }

    async fn get_doc<T: DeserializeOwned>(&self, kind: EntityKind, id: &str) -> Result<Option<T>> {
        let sql = format!("SELECT doc FROM {} WHERE id = ?1", kind.collection());
        let mut rows = self
            .conn
            .query(&sql, params![id])
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_doc(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(BibgraphError::Store(e.to_string())),
        }
    }

    /// Find the entity of `kind` carrying external identifier `ext_id`
    /// under any source. Returns the entity id.
    pub async fn find_id_by_external_id(
        &self,
        kind: EntityKind,
        ext_id: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_id FROM external_id_index WHERE kind = ?1 AND ext_id = ?2 LIMIT 1",
                params![kind.collection(), ext_id],
            )
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| BibgraphError::Store(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(BibgraphError::Store(e.to_string())),
        }
    }

    /// Like [`Store::find_id_by_external_id`] but restricted to one
    /// identifier source (e.g. prefer the curated provider's group codes).
    pub async fn find_id_by_source_external_id(
        &self,
        kind: EntityKind,
        source: &str,
        ext_id: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_id FROM external_id_index
                 WHERE kind = ?1 AND source = ?2 AND ext_id = ?3 LIMIT 1",
                params![kind.collection(), source, ext_id],
            )
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| BibgraphError::Store(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(BibgraphError::Store(e.to_string())),
        }
    }

    /// Find a work by any of its external identifiers.
    pub async fn find_work_by_external_id(&self, ext_id: &str) -> Result<Option<Work>> {
        match self.find_id_by_external_id(EntityKind::Work, ext_id).await? {
            Some(id) => self.get_work(&id).await,
            None => Ok(None),
        }
    }

    /// Find a person by any of their external identifiers.
    pub async fn find_person_by_external_id(&self, ext_id: &str) -> Result<Option<Person>> {
        match self
            .find_id_by_external_id(EntityKind::Person, ext_id)
            .await?
        {
            Some(id) => self.get_person(&id).await,
            None => Ok(None),
        }
    }

    /// Find an affiliation by any of its external identifiers.
    pub async fn find_affiliation_by_external_id(
        &self,
        ext_id: &str,
    ) -> Result<Option<Affiliation>> {
        match self
            .find_id_by_external_id(EntityKind::Affiliation, ext_id)
            .await?
        {
            Some(id) => self.get_affiliation(&id).await,
            None => Ok(None),
        }
    }

    /// Find a publication source by any of its external identifiers.
    pub async fn find_source_by_external_id(&self, ext_id: &str) -> Result<Option<Source>> {
        match self
            .find_id_by_external_id(EntityKind::Source, ext_id)
            .await?
        {
            Some(id) => self.get_source(&id).await,
            None => Ok(None),
        }
    }

    /// Find a person by exact normalized full name.
    pub async fn find_person_by_full_name(&self, name: &str) -> Result<Option<Person>> {
        match self.find_id_by_name(EntityKind::Person, name).await? {
            Some(id) => self.get_person(&id).await,
            None => Ok(None),
        }
    }

    /// Find an affiliation by exact normalized name.
    pub async fn find_affiliation_by_name(&self, name: &str) -> Result<Option<Affiliation>> {
        match self.find_id_by_name(EntityKind::Affiliation, name).await? {
            Some(id) => self.get_affiliation(&id).await,
            None => Ok(None),
        }
    }

    async fn find_id_by_name(&self, kind: EntityKind, name: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_id FROM name_index WHERE kind = ?1 AND name_norm = ?2 LIMIT 1",
                params![kind.collection(), normalize(name)],
            )
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| BibgraphError::Store(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(BibgraphError::Store(e.to_string())),
        }
    }

    /// Free-text search over display names and titles of `kind`.
    /// Returns `(entity_id, matched text)` pairs.
    pub async fn search_by_name(
        &self,
        kind: EntityKind,
        query: &str,
        limit: u32,
    ) -> Result<Vec<(String, String)>> {
        let match_expr = format!("name : \"{}\"", query.replace('"', " "));
        let mut rows = self
            .conn
            .query(
                "SELECT entity_id, name FROM name_fts
                 WHERE name_fts MATCH ?1 AND kind = ?2 LIMIT ?3",
                params![match_expr.as_str(), kind.collection(), limit],
            )
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push((
                row.get::<String>(0)
                    .map_err(|e| BibgraphError::Store(e.to_string()))?,
                row.get::<String>(1)
                    .map_err(|e| BibgraphError::Store(e.to_string()))?,
            ));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Partial field updates
    // -----------------------------------------------------------------------

    /// Update only the named top-level fields of an entity document.
    /// Values must already be serialized JSON. Never replaces the whole
    /// document, to minimize lost-update risk against concurrent writers.
    pub async fn update_fields(
        &self,
        kind: EntityKind,
        id: &str,
        fields: &[(&str, serde_json::Value)],
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET doc = json_set(doc, ?1, json(?2)) WHERE id = ?3",
            kind.collection()
        );
        for (field, value) in fields {
            let path = format!("$.{field}");
            let encoded = value.to_string();
            self.conn
                .execute(&sql, params![path.as_str(), encoded.as_str(), id])
                .await
                .map_err(|e| BibgraphError::Store(e.to_string()))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Nested-field predicates (json_each over documents)
    // -----------------------------------------------------------------------

    /// Whether `person_id`'s affiliation history contains `aff_id`.
    pub async fn person_has_affiliation(&self, person_id: &str, aff_id: &str) -> Result<bool> {
        self.nested_id_exists(
            "persons",
            "$.affiliations",
            person_id,
            aff_id,
        )
        .await
    }

    /// Whether affiliation `aff_id` has a relation to `relation_id`.
    pub async fn affiliation_has_relation(&self, aff_id: &str, relation_id: &str) -> Result<bool> {
        self.nested_id_exists("affiliations", "$.relations", aff_id, relation_id)
            .await
    }

    async fn nested_id_exists(
        &self,
        table: &str,
        array_path: &str,
        entity_id: &str,
        nested_id: &str,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM {table}, json_each({table}.doc, '{array_path}')
             WHERE {table}.id = ?1 AND json_extract(json_each.value, '$.id') = ?2 LIMIT 1"
        );
        let mut rows = self
            .conn
            .query(&sql, params![entity_id, nested_id])
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;
        match rows.next().await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => Err(BibgraphError::Store(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Work scans (network builder, top words, cleaning)
    // -----------------------------------------------------------------------

    /// Works where `person_id` appears as a resolved author, capped by
    /// `max_authors`.
    pub async fn works_for_person(&self, person_id: &str, max_authors: usize) -> Result<Vec<Work>> {
        self.participant_works("person_id", person_id, Some(max_authors), None)
            .await
    }

    /// Works where `aff_id` appears as an author affiliation, capped by
    /// `max_authors`.
    pub async fn works_for_affiliation(
        &self,
        aff_id: &str,
        max_authors: usize,
    ) -> Result<Vec<Work>> {
        self.participant_works("affiliation_id", aff_id, Some(max_authors), None)
            .await
    }

    /// Works where `person_id` participates and `excluded` does not.
    pub async fn works_for_person_excluding(
        &self,
        person_id: &str,
        excluded: &str,
        max_authors: usize,
    ) -> Result<Vec<Work>> {
        self.participant_works("person_id", person_id, Some(max_authors), Some(excluded))
            .await
    }

    /// Works where `aff_id` participates and `excluded` does not.
    pub async fn works_for_affiliation_excluding(
        &self,
        aff_id: &str,
        excluded: &str,
        max_authors: usize,
    ) -> Result<Vec<Work>> {
        self.participant_works("affiliation_id", aff_id, Some(max_authors), Some(excluded))
            .await
    }

    /// All works where `person_id` appears as a resolved author (no cap).
    pub async fn works_with_author(&self, person_id: &str) -> Result<Vec<Work>> {
        self.participant_works("person_id", person_id, None, None)
            .await
    }

    /// All works where `aff_id` appears as an author affiliation (no cap).
    pub async fn works_with_affiliation(&self, aff_id: &str) -> Result<Vec<Work>> {
        self.participant_works("affiliation_id", aff_id, None, None)
            .await
    }

    async fn participant_works(
        &self,
        column: &str,
        id: &str,
        max_authors: Option<usize>,
        excluded: Option<&str>,
    ) -> Result<Vec<Work>> {
        let mut sql = format!(
            "SELECT w.doc FROM works w
             JOIN work_participants p ON p.work_id = w.id AND p.{column} = ?1"
        );
        let mut next_param = 2;
        if max_authors.is_some() {
            sql.push_str(&format!(" WHERE w.author_count <= ?{next_param}"));
            next_param += 1;
        }
        if excluded.is_some() {
            let keyword = if max_authors.is_some() { "AND" } else { "WHERE" };
            sql.push_str(&format!(
                " {keyword} NOT EXISTS (SELECT 1 FROM work_participants q
                   WHERE q.work_id = w.id AND q.{column} = ?{next_param})"
            ));
        }
        sql.push_str(" GROUP BY w.id");

        let mut rows = match (max_authors, excluded) {
            (Some(cap), Some(ex)) => self.conn.query(&sql, params![id, cap as i64, ex]).await,
            (Some(cap), None) => self.conn.query(&sql, params![id, cap as i64]).await,
            (None, Some(ex)) => self.conn.query(&sql, params![id, ex]).await,
            (None, None) => self.conn.query(&sql, params![id]).await,
        }
        .map_err(|e| BibgraphError::Store(e.to_string()))?;

        let mut works = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            works.push(row_doc(&row)?);
        }
        Ok(works)
    }

    /// Drop the participant row linking `work_id` to `person_id`. Used when
    /// a cleaning pass clears a bad author link.
    pub async fn remove_work_participant_person(
        &self,
        work_id: &str,
        person_id: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM work_participants WHERE work_id = ?1 AND person_id = ?2",
                params![work_id, person_id],
            )
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;
        Ok(())
    }

    /// Count of works where `person_id` appears as a resolved author.
    pub async fn count_works_for_person(&self, person_id: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(DISTINCT work_id) FROM work_participants WHERE person_id = ?1",
                params![person_id],
            )
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            _ => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Entity id listings (post-calculation passes)
    // -----------------------------------------------------------------------

    /// All affiliation ids.
    pub async fn list_affiliation_ids(&self) -> Result<Vec<String>> {
        self.list_ids("SELECT id FROM affiliations ORDER BY id", None)
            .await
    }

    /// All person ids.
    pub async fn list_person_ids(&self) -> Result<Vec<String>> {
        self.list_ids("SELECT id FROM persons ORDER BY id", None).await
    }

    /// Ids of affiliations whose type tags include faculty, department, or
    /// group (the organizational units).
    pub async fn list_unit_affiliation_ids(&self) -> Result<Vec<String>> {
        self.list_ids(
            "SELECT DISTINCT a.id FROM affiliations a, json_each(a.doc, '$.types')
             WHERE lower(json_extract(json_each.value, '$.type'))
                   IN ('faculty', 'department', 'group')
             ORDER BY a.id",
            None,
        )
        .await
    }

    /// Ids of persons that appear as a resolved author on at least one work.
    pub async fn list_participant_person_ids(&self) -> Result<Vec<String>> {
        self.list_ids(
            "SELECT DISTINCT person_id FROM work_participants
             WHERE person_id != '' ORDER BY person_id",
            None,
        )
        .await
    }

    /// Ids of persons whose affiliation history contains `aff_id`.
    pub async fn list_person_ids_with_affiliation(&self, aff_id: &str) -> Result<Vec<String>> {
        self.list_ids(
            "SELECT DISTINCT p.id FROM persons p, json_each(p.doc, '$.affiliations')
             WHERE json_extract(json_each.value, '$.id') = ?1
             ORDER BY p.id",
            Some(aff_id),
        )
        .await
    }

    /// Ids of persons whose provenance includes `source`.
    pub async fn list_person_ids_updated_by(&self, source: &str) -> Result<Vec<String>> {
        self.list_ids(
            "SELECT DISTINCT p.id FROM persons p, json_each(p.doc, '$.updated')
             WHERE json_extract(json_each.value, '$.source') = ?1
             ORDER BY p.id",
            Some(source),
        )
        .await
    }

    async fn list_ids(&self, sql: &str, param: Option<&str>) -> Result<Vec<String>> {
        let mut rows = match param {
            Some(p) => self.conn.query(sql, params![p]).await,
            None => self.conn.query(sql, params![]).await,
        }
        .map_err(|e| BibgraphError::Store(e.to_string()))?;

        let mut ids = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            ids.push(
                row.get::<String>(0)
                    .map_err(|e| BibgraphError::Store(e.to_string()))?,
            );
        }
        Ok(ids)
    }

    /// Count documents in an entity collection.
    pub async fn count_entities(&self, kind: EntityKind) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.collection());
        let mut rows = self
            .conn
            .query(&sql, params![])
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            _ => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Network artifacts
    // -----------------------------------------------------------------------

    /// Whether a network artifact exists for `id` under `kind`.
    pub async fn network_exists(&self, kind: EntityKind, id: &str) -> Result<bool> {
        Ok(self.get_network(kind, id).await?.is_some())
    }

    /// Load a persisted network artifact.
    pub async fn get_network(&self, kind: EntityKind, id: &str) -> Result<Option<NetworkArtifact>> {
        let mut rows = self
            .conn
            .query(
                "SELECT doc FROM networks WHERE kind = ?1 AND id = ?2",
                params![kind.collection(), id],
            )
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_doc(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(BibgraphError::Store(e.to_string())),
        }
    }

    /// Persist a network artifact. Never overwrites an existing artifact,
    /// and rejects documents over [`MAX_ARTIFACT_BYTES`].
    pub async fn insert_network(&self, kind: EntityKind, artifact: &NetworkArtifact) -> Result<()> {
        let doc = to_doc(artifact)?;
        if doc.len() > MAX_ARTIFACT_BYTES {
            return Err(BibgraphError::Oversized {
                id: artifact.id.clone(),
                bytes: doc.len(),
            });
        }
        self.conn
            .execute(
                "INSERT OR IGNORE INTO networks (id, kind, doc) VALUES (?1, ?2, ?3)",
                params![artifact.id.as_str(), kind.collection(), doc.as_str()],
            )
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Top-words artifacts
    // -----------------------------------------------------------------------

    /// Load the top-words artifact for an entity.
    pub async fn get_top_words(&self, kind: EntityKind, id: &str) -> Result<Option<TopWords>> {
        let mut rows = self
            .conn
            .query(
                "SELECT doc FROM top_words WHERE kind = ?1 AND id = ?2",
                params![kind.collection(), id],
            )
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_doc(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(BibgraphError::Store(e.to_string())),
        }
    }

    /// Store (or replace) the top-words artifact for an entity.
    pub async fn set_top_words(&self, kind: EntityKind, words: &TopWords) -> Result<()> {
        let doc = to_doc(words)?;
        self.conn
            .execute(
                "INSERT INTO top_words (id, kind, doc) VALUES (?1, ?2, ?3)
                 ON CONFLICT(kind, id) DO UPDATE SET doc = excluded.doc",
                params![words.id.as_str(), kind.collection(), doc.as_str()],
            )
            .await
            .map_err(|e| BibgraphError::Store(e.to_string()))?;
        Ok(())
    }
}

/// Serialize an entity to its JSON document.
fn to_doc<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| BibgraphError::Store(e.to_string()))
}

/// Parse the first column of a row as a JSON document.
fn row_doc<T: DeserializeOwned>(row: &libsql::Row) -> Result<T> {
    let doc: String = row
        .get(0)
        .map_err(|e| BibgraphError::Store(e.to_string()))?;
    serde_json::from_str(&doc).map_err(|e| BibgraphError::Store(format!("invalid document: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibgraph_shared::{
        AffiliationPeriod, AffiliationRef, CoauthorshipNetwork, NameEntry, NetworkNode, Provenance,
        Relation, TitleEntry, TypeEntry, WordCount, new_entity_id,
    };
    use uuid::Uuid;

    /// Create a temp file store for testing.
    async fn test_store() -> Store {
        let tmp = std::env::temp_dir().join(format!("bibgraph_test_{}.db", Uuid::now_v7()));
        Store::open(&tmp).await.expect("open test store")
    }

    fn sample_work(title: &str, ext_id: &str) -> Work {
        let mut work = Work::template();
        work.titles.push(TitleEntry {
            title: title.into(),
            lang: "en".into(),
            source: "openalex".into(),
        });
        work.external_ids.push(ExternalId {
            source: "doi".into(),
            id: ext_id.into(),
        });
        work.updated.push(Provenance {
            source: "openalex".into(),
            time: 1_700_000_000,
        });
        work
    }

    fn work_with_participants(persons: &[&str], affs: &[&str], author_count: usize) -> Work {
        let mut work = sample_work("participant work", &new_entity_id());
        work.author_count = author_count;
        for (i, p) in persons.iter().enumerate() {
            work.authors.push(WorkAuthor {
                id: p.to_string(),
                full_name: format!("Author {i}"),
                affiliations: affs
                    .iter()
                    .map(|a| AffiliationRef {
                        id: a.to_string(),
                        name: "Aff".into(),
                        types: vec![],
                    })
                    .collect(),
                role: None,
            });
        }
        work
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("bibgraph_test_{}.db", Uuid::now_v7()));
        let s1 = Store::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Store::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn work_insert_and_strong_key_lookup() {
        let store = test_store().await;
        let work = sample_work("Coauthorship networks", "10.1234/abc");
        store.insert_work(&work).await.expect("insert work");

        let found = store
            .find_work_by_external_id("10.1234/abc")
            .await
            .expect("lookup");
        assert_eq!(found.as_ref().map(|w| w.id.as_str()), Some(work.id.as_str()));

        let missing = store
            .find_work_by_external_id("10.9999/zzz")
            .await
            .expect("lookup missing");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn person_lookup_by_normalized_name() {
        let store = test_store().await;
        let mut person = Person::template();
        person.full_name = "María José Restrepo".into();
        store.insert_person(&person).await.expect("insert person");

        let found = store
            .find_person_by_full_name("maria jose restrepo")
            .await
            .expect("lookup");
        assert_eq!(found.map(|p| p.id), Some(person.id));
    }

    #[tokio::test]
    async fn affiliation_lookup_by_name_and_relation_predicate() {
        let store = test_store().await;
        let mut inst = Affiliation::template();
        inst.names.push(NameEntry {
            name: "Universidad de Antioquia".into(),
            lang: "es".into(),
            source: "staff".into(),
        });
        store.insert_affiliation(&inst).await.unwrap();

        let mut faculty = Affiliation::template();
        faculty.names.push(NameEntry {
            name: "Facultad de Ingeniería".into(),
            lang: "es".into(),
            source: "staff".into(),
        });
        faculty.types.push(TypeEntry {
            source: "staff".into(),
            value: "faculty".into(),
            level: None,
        });
        faculty.relations.push(Relation {
            id: inst.id.clone(),
            name: "Universidad de Antioquia".into(),
            types: vec![],
        });
        store.insert_affiliation(&faculty).await.unwrap();

        let found = store
            .find_affiliation_by_name("universidad de antioquia")
            .await
            .expect("lookup");
        assert_eq!(found.map(|a| a.id), Some(inst.id.clone()));

        assert!(
            store
                .affiliation_has_relation(&faculty.id, &inst.id)
                .await
                .unwrap()
        );
        assert!(
            !store
                .affiliation_has_relation(&inst.id, &faculty.id)
                .await
                .unwrap()
        );

        let units = store.list_unit_affiliation_ids().await.unwrap();
        assert_eq!(units, vec![faculty.id.clone()]);
    }

    #[tokio::test]
    async fn partial_update_touches_only_named_fields() {
        let store = test_store().await;
        let work = sample_work("Original title", "10.1/original");
        store.insert_work(&work).await.unwrap();

        let mut titles = work.titles.clone();
        titles.push(TitleEntry {
            title: "Título alterno".into(),
            lang: "es".into(),
            source: "scienti".into(),
        });
        store
            .update_fields(
                EntityKind::Work,
                &work.id,
                &[("titles", serde_json::to_value(&titles).unwrap())],
            )
            .await
            .expect("partial update");

        let updated = store.get_work(&work.id).await.unwrap().unwrap();
        assert_eq!(updated.titles.len(), 2);
        // Untouched fields survive.
        assert_eq!(updated.external_ids, work.external_ids);
        assert_eq!(updated.updated, work.updated);
    }

    #[tokio::test]
    async fn person_affiliation_predicate() {
        let store = test_store().await;
        let mut person = Person::template();
        person.full_name = "Ana Pérez".into();
        person.affiliations.push(AffiliationPeriod {
            id: "aff-1".into(),
            name: "Inst".into(),
            types: vec![],
            start_date: -1,
            end_date: -1,
        });
        store.insert_person(&person).await.unwrap();

        assert!(
            store
                .person_has_affiliation(&person.id, "aff-1")
                .await
                .unwrap()
        );
        assert!(
            !store
                .person_has_affiliation(&person.id, "aff-2")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn participant_scans_respect_author_cap() {
        let store = test_store().await;
        let small = work_with_participants(&["p1"], &["a1"], 2);
        let big = work_with_participants(&["p1"], &["a1"], 50);
        store.insert_work(&small).await.unwrap();
        store.insert_work(&big).await.unwrap();

        let works = store.works_for_person("p1", 10).await.unwrap();
        assert_eq!(works.len(), 1);
        assert_eq!(works[0].id, small.id);

        let works = store.works_for_affiliation("a1", 100).await.unwrap();
        assert_eq!(works.len(), 2);

        let all = store.works_with_author("p1").await.unwrap();
        assert_eq!(all.len(), 2);

        assert_eq!(store.count_works_for_person("p1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn excluding_scan_filters_seed_works() {
        let store = test_store().await;
        // w1: a1 + a2 together; w2: a2 alone.
        let w1 = work_with_participants(&["p1"], &["a1", "a2"], 2);
        let w2 = work_with_participants(&["p2"], &["a2"], 2);
        store.insert_work(&w1).await.unwrap();
        store.insert_work(&w2).await.unwrap();

        let works = store
            .works_for_affiliation_excluding("a2", "a1", 10)
            .await
            .unwrap();
        assert_eq!(works.len(), 1);
        assert_eq!(works[0].id, w2.id);
    }

    #[tokio::test]
    async fn network_artifact_written_once_and_size_limited() {
        let store = test_store().await;
        let artifact = NetworkArtifact {
            id: "seed-1".into(),
            coauthorship_network: CoauthorshipNetwork {
                nodes: vec![NetworkNode {
                    id: "seed-1".into(),
                    label: "Seed".into(),
                    degree: 0,
                    size: 1.0,
                }],
                edges: vec![],
            },
        };

        assert!(
            !store
                .network_exists(EntityKind::Affiliation, "seed-1")
                .await
                .unwrap()
        );
        store
            .insert_network(EntityKind::Affiliation, &artifact)
            .await
            .expect("insert network");
        assert!(
            store
                .network_exists(EntityKind::Affiliation, "seed-1")
                .await
                .unwrap()
        );

        // A second insert is ignored, not an overwrite.
        let mut second = artifact.clone();
        second.coauthorship_network.nodes[0].label = "Changed".into();
        store
            .insert_network(EntityKind::Affiliation, &second)
            .await
            .expect("second insert");
        let stored = store
            .get_network(EntityKind::Affiliation, "seed-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.coauthorship_network.nodes[0].label, "Seed");

        // Oversized artifacts are rejected.
        let mut oversized = artifact.clone();
        oversized.id = "seed-2".into();
        oversized.coauthorship_network.nodes = (0..200_000)
            .map(|i| NetworkNode {
                id: format!("node-{i}"),
                label: "x".repeat(80),
                degree: 1,
                size: 1.0,
            })
            .collect();
        let err = store
            .insert_network(EntityKind::Affiliation, &oversized)
            .await
            .expect_err("oversized rejected");
        assert!(matches!(err, BibgraphError::Oversized { .. }));
    }

    #[tokio::test]
    async fn top_words_set_and_get() {
        let store = test_store().await;
        let words = TopWords {
            id: "aff-1".into(),
            top_words: vec![WordCount {
                name: "network".into(),
                value: 7,
            }],
        };
        assert!(
            store
                .get_top_words(EntityKind::Affiliation, "aff-1")
                .await
                .unwrap()
                .is_none()
        );
        store
            .set_top_words(EntityKind::Affiliation, &words)
            .await
            .unwrap();
        let stored = store
            .get_top_words(EntityKind::Affiliation, "aff-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.top_words.len(), 1);
    }

    #[tokio::test]
    async fn fts_search_finds_titles() {
        let store = test_store().await;
        let mut aff = Affiliation::template();
        aff.names.push(NameEntry {
            name: "Instituto de Física".into(),
            lang: "es".into(),
            source: "staff".into(),
        });
        store.insert_affiliation(&aff).await.unwrap();

        let hits = store
            .search_by_name(EntityKind::Affiliation, "física", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, aff.id);
    }

    #[tokio::test]
    async fn sessions_are_independent_connections() {
        let store = test_store().await;
        let session = store.session().expect("session");
        let work = sample_work("From session", "10.5/session");
        session.insert_work(&work).await.unwrap();

        let found = store
            .find_work_by_external_id("10.5/session")
            .await
            .unwrap();
        assert!(found.is_some());
    }
}

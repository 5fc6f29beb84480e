// ── Engram: causal_edges DB Layer ──────────────────────────────────────────
//
// CRUD for typed causal edges. Inputs arrive already validated and
// normalised by engine/engram/causal_graph.rs; this layer trusts them.
// Multi-row reads are ordered by strength and capped by the caller.

use super::SessionStore;
use crate::atoms::engram_types::{CausalEdge, GraphStats, RelationType};
use crate::atoms::error::EngineResult;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;

const EDGE_COLUMNS: &str =
    "id, source_id, target_id, relation, strength, evidence, created_by, extracted_at";

/// A validated edge ready to persist.
#[derive(Debug, Clone)]
pub(crate) struct EdgeWrite<'a> {
    pub source_id: &'a str,
    pub target_id: &'a str,
    pub relation: RelationType,
    pub strength: f64,
    pub evidence: Option<&'a str>,
    pub created_by: &'a str,
}

impl SessionStore {
    /// Insert, or on `(source, target, relation)` conflict update strength
    /// and keep the old evidence when no new evidence is given.
    /// Returns the edge id.
    pub(crate) fn causal_upsert(&self, edge: &EdgeWrite<'_>) -> EngineResult<i64> {
        let conn = self.lock_conn()?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let relation = edge.relation.to_string();
        conn.execute(
            "INSERT INTO causal_edges
                (source_id, target_id, relation, strength, evidence, created_by, extracted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(source_id, target_id, relation) DO UPDATE SET
                strength = excluded.strength,
                evidence = COALESCE(excluded.evidence, causal_edges.evidence)",
            params![
                edge.source_id,
                edge.target_id,
                relation,
                edge.strength,
                edge.evidence,
                edge.created_by,
                now
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM causal_edges WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3",
            params![edge.source_id, edge.target_id, relation],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn causal_get(&self, id: i64) -> EngineResult<Option<CausalEdge>> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {EDGE_COLUMNS} FROM causal_edges WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], Self::causal_from_row).optional()?)
    }

    /// Outgoing edges of `source_id`, strongest first.
    pub fn causal_edges_from(&self, source_id: &str, limit: usize) -> EngineResult<Vec<CausalEdge>> {
        self.causal_query("WHERE source_id = ?1", source_id, limit)
    }

    /// Incoming edges of `target_id`, strongest first.
    pub fn causal_edges_to(&self, target_id: &str, limit: usize) -> EngineResult<Vec<CausalEdge>> {
        self.causal_query("WHERE target_id = ?1", target_id, limit)
    }

    /// Edges touching `node_id` in either direction, strongest first.
    pub fn causal_edges_for_node(&self, node_id: &str, limit: usize) -> EngineResult<Vec<CausalEdge>> {
        self.causal_query("WHERE source_id = ?1 OR target_id = ?1", node_id, limit)
    }

    /// Every edge, strongest first, up to `limit`.
    pub fn causal_all_edges(&self, limit: usize) -> EngineResult<Vec<CausalEdge>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM causal_edges ORDER BY strength DESC, id ASC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], Self::causal_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn causal_query(&self, filter: &str, node_id: &str, limit: usize) -> EngineResult<Vec<CausalEdge>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM causal_edges {filter}
             ORDER BY strength DESC, id ASC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![node_id, limit as i64], Self::causal_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Update strength and/or evidence. Returns whether a row changed.
    pub(crate) fn causal_update(
        &self,
        id: i64,
        strength: Option<f64>,
        evidence: Option<&str>,
    ) -> EngineResult<bool> {
        let conn = self.lock_conn()?;
        let n = conn.execute(
            "UPDATE causal_edges
             SET strength = COALESCE(?2, strength),
                 evidence = COALESCE(?3, evidence)
             WHERE id = ?1",
            params![id, strength, evidence],
        )?;
        Ok(n > 0)
    }

    pub fn causal_delete(&self, id: i64) -> EngineResult<bool> {
        let conn = self.lock_conn()?;
        let n = conn.execute("DELETE FROM causal_edges WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Cascade: drop every edge touching `memory_id`.
    pub(crate) fn causal_delete_for_node(&self, memory_id: &str) -> EngineResult<usize> {
        let conn = self.lock_conn()?;
        Ok(conn.execute(
            "DELETE FROM causal_edges WHERE source_id = ?1 OR target_id = ?1",
            params![memory_id],
        )?)
    }

    /// Edges whose source or target has no row in `memory_index`.
    pub fn causal_orphaned(&self) -> EngineResult<Vec<CausalEdge>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM causal_edges ce
             WHERE NOT EXISTS (SELECT 1 FROM memory_index m WHERE CAST(m.id AS TEXT) = ce.source_id)
                OR NOT EXISTS (SELECT 1 FROM memory_index m WHERE CAST(m.id AS TEXT) = ce.target_id)
             ORDER BY id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], Self::causal_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Whole-graph aggregates, including link coverage over `memory_index`.
    pub fn causal_stats(&self) -> EngineResult<GraphStats> {
        let conn = self.lock_conn()?;

        let (total, avg, sources, targets): (i64, Option<f64>, i64, i64) = conn.query_row(
            "SELECT COUNT(*), AVG(strength), COUNT(DISTINCT source_id), COUNT(DISTINCT target_id)
             FROM causal_edges",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?;

        let mut by_relation = BTreeMap::new();
        {
            let mut stmt =
                conn.prepare("SELECT relation, COUNT(*) FROM causal_edges GROUP BY relation")?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            for (rel, n) in rows.flatten() {
                if let Ok(rel) = rel.parse::<RelationType>() {
                    by_relation.insert(rel, n as usize);
                }
            }
        }

        let linked: i64 = conn.query_row(
            "SELECT COUNT(*) FROM (
                 SELECT source_id AS node FROM causal_edges
                 UNION
                 SELECT target_id AS node FROM causal_edges
             )",
            [],
            |r| r.get(0),
        )?;

        let total_memories: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_index WHERE is_archived = 0",
            [],
            |r| r.get(0),
        )?;
        let covered: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_index m
             WHERE m.is_archived = 0 AND EXISTS (
                 SELECT 1 FROM causal_edges e
                 WHERE e.source_id = CAST(m.id AS TEXT) OR e.target_id = CAST(m.id AS TEXT)
             )",
            [],
            |r| r.get(0),
        )?;

        let orphaned: i64 = conn.query_row(
            "SELECT COUNT(*) FROM causal_edges ce
             WHERE NOT EXISTS (SELECT 1 FROM memory_index m WHERE CAST(m.id AS TEXT) = ce.source_id)
                OR NOT EXISTS (SELECT 1 FROM memory_index m WHERE CAST(m.id AS TEXT) = ce.target_id)",
            [],
            |r| r.get(0),
        )?;

        let link_coverage = if total_memories > 0 {
            covered as f64 / total_memories as f64
        } else {
            0.0
        };

        Ok(GraphStats {
            total_edges: total as usize,
            by_relation,
            avg_strength: (avg.unwrap_or(0.0) * 100.0).round() / 100.0,
            unique_sources: sources as usize,
            unique_targets: targets as usize,
            linked_memories: linked as usize,
            total_memories: total_memories as usize,
            link_coverage,
            orphaned_edges: orphaned as usize,
        })
    }

    // ── Edge row mapper ─────────────────────────────────────────────

    fn causal_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CausalEdge> {
        let relation_str: String = row.get(3)?;
        let relation = relation_str.parse::<RelationType>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(CausalEdge {
            id: row.get(0)?,
            source_id: row.get(1)?,
            target_id: row.get(2)?,
            relation,
            strength: row.get(4)?,
            evidence: row.get(5)?,
            created_by: row.get(6)?,
            extracted_at: row.get(7)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SessionStore {
        SessionStore::open_in_memory().unwrap()
    }

    fn write<'a>(src: &'a str, tgt: &'a str, rel: RelationType, strength: f64, evidence: Option<&'a str>) -> EdgeWrite<'a> {
        EdgeWrite { source_id: src, target_id: tgt, relation: rel, strength, evidence, created_by: "manual" }
    }

    #[test]
    fn upsert_updates_strength_and_keeps_evidence() {
        let store = test_store();
        let id1 = store
            .causal_upsert(&write("1", "2", RelationType::Caused, 0.4, Some("commit abc")))
            .unwrap();
        let id2 = store.causal_upsert(&write("1", "2", RelationType::Caused, 0.9, None)).unwrap();
        assert_eq!(id1, id2);
        let edge = store.causal_get(id1).unwrap().unwrap();
        assert_eq!(edge.strength, 0.9);
        assert_eq!(edge.evidence.as_deref(), Some("commit abc"));
    }

    #[test]
    fn same_pair_different_relation_is_distinct() {
        let store = test_store();
        let a = store.causal_upsert(&write("1", "2", RelationType::Caused, 0.5, None)).unwrap();
        let b = store.causal_upsert(&write("1", "2", RelationType::Supports, 0.5, None)).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.causal_edges_from("1", 100).unwrap().len(), 2);
    }

    #[test]
    fn reads_ordered_by_strength() {
        let store = test_store();
        store.causal_upsert(&write("1", "2", RelationType::Caused, 0.2, None)).unwrap();
        store.causal_upsert(&write("1", "3", RelationType::Caused, 0.8, None)).unwrap();
        store.causal_upsert(&write("4", "1", RelationType::Enabled, 0.5, None)).unwrap();
        let from = store.causal_edges_from("1", 100).unwrap();
        assert_eq!(from[0].target_id, "3");
        let node = store.causal_edges_for_node("1", 100).unwrap();
        let strengths: Vec<f64> = node.iter().map(|e| e.strength).collect();
        assert_eq!(strengths, vec![0.8, 0.5, 0.2]);
        assert_eq!(store.causal_edges_for_node("1", 2).unwrap().len(), 2);
    }

    #[test]
    fn cascade_delete_for_node() {
        let store = test_store();
        store.causal_upsert(&write("1", "2", RelationType::Caused, 0.5, None)).unwrap();
        store.causal_upsert(&write("3", "1", RelationType::Caused, 0.5, None)).unwrap();
        store.causal_upsert(&write("3", "2", RelationType::Caused, 0.5, None)).unwrap();
        assert_eq!(store.causal_delete_for_node("1").unwrap(), 2);
        assert_eq!(store.causal_all_edges(100).unwrap().len(), 1);
    }

    #[test]
    fn update_changes_only_given_fields() {
        let store = test_store();
        let id = store
            .causal_upsert(&write("1", "2", RelationType::Caused, 0.5, Some("why")))
            .unwrap();
        assert!(store.causal_update(id, Some(0.7), None).unwrap());
        let edge = store.causal_get(id).unwrap().unwrap();
        assert_eq!(edge.strength, 0.7);
        assert_eq!(edge.evidence.as_deref(), Some("why"));
        assert!(!store.causal_update(id + 50, Some(0.1), None).unwrap());
    }
}

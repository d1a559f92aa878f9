#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **casegraph-graph** – the Association Graph (`spec.md §4.9`): a pure,
//! read-only aggregator over `{Targets, TargetMessagePresence,
//! TargetIdentifierLinks}`. Nothing here is persisted; callers render or
//! export the returned [`AssociationGraph`] as they see fit.

use std::collections::{BTreeMap, BTreeSet};

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use casegraph_types::error::CaseGraphError;
use casegraph_types::ids::CaseId;

/// Options controlling graph construction (`spec.md §4.9`).
#[derive(Debug, Clone, Copy)]
pub struct GraphOptions {
    /// Collapse targets sharing a `globalEntityId` into one node.
    pub group_by_global_person: bool,
    /// Emit identifier nodes and target↔identifier edges.
    pub include_identifiers: bool,
    /// Drop edges below this weight.
    pub min_edge_weight: u32,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            group_by_global_person: false,
            include_identifiers: false,
            min_edge_weight: 1,
        }
    }
}

/// Kind of [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeKind {
    /// A target, or a global person when grouping is enabled.
    Target,
    /// An identifier.
    Identifier,
}

/// One node in an [`AssociationGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub node_id: Uuid,
    pub kind: NodeKind,
    pub label: String,
}

/// Kind of [`Edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EdgeKind {
    /// Two targets co-occurring in the same thread(s) (or, failing that,
    /// the same event(s)).
    TargetTarget,
    /// A target and one of its linked identifiers.
    TargetIdentifier,
}

/// One edge in an [`AssociationGraph`]. Endpoints are canonicalized so
/// `(A, B)` and `(B, A)` collapse to the same edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub source_node_id: Uuid,
    pub target_node_id: Uuid,
    pub kind: EdgeKind,
    pub weight: u32,
}

/// The full graph: nodes and edges in their deterministic, final order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

struct TargetRow {
    target_id: Uuid,
    display_name: String,
    global_entity_id: Option<Uuid>,
}

struct LinkRow {
    target_id: Uuid,
    identifier_id: Uuid,
    identifier_type: String,
    value_raw: String,
}

struct PresenceRow {
    target_id: Uuid,
    message_event_id: Uuid,
    matched_identifier_id: Uuid,
    thread_id: Uuid,
}

/// Build the association graph for `case_id` (`spec.md §4.9`).
pub async fn build_association_graph(
    pool: &SqlitePool,
    case_id: CaseId,
    options: GraphOptions,
) -> Result<AssociationGraph, CaseGraphError> {
    let targets = load_targets(pool, case_id).await?;
    let links = load_links(pool, case_id).await?;
    let presence = load_presence(pool, case_id).await?;

    let group_labels = if options.group_by_global_person {
        load_global_person_labels(pool, &targets).await?
    } else {
        BTreeMap::new()
    };

    // Node id a target's presence/link rows roll up under: its global
    // person's id when grouping is requested and the target has one,
    // else the target's own id.
    let group_of = |target_id: Uuid| -> Uuid {
        if !options.group_by_global_person {
            return target_id;
        }
        targets
            .iter()
            .find(|t| t.target_id == target_id)
            .and_then(|t| t.global_entity_id)
            .unwrap_or(target_id)
    };

    let mut nodes: Vec<Node> = Vec::new();
    let mut seen_group_nodes: BTreeSet<Uuid> = BTreeSet::new();
    for target in &targets {
        let group_id = group_of(target.target_id);
        if seen_group_nodes.insert(group_id) {
            let label = group_labels.get(&group_id).cloned().unwrap_or_else(|| target.display_name.clone());
            nodes.push(Node {
                node_id: group_id,
                kind: NodeKind::Target,
                label,
            });
        }
    }

    if options.include_identifiers {
        let mut seen_identifier_nodes: BTreeSet<Uuid> = BTreeSet::new();
        for link in &links {
            if seen_identifier_nodes.insert(link.identifier_id) {
                nodes.push(Node {
                    node_id: link.identifier_id,
                    kind: NodeKind::Identifier,
                    label: format!("{}: {}", link.identifier_type, link.value_raw),
                });
            }
        }
    }

    // Per group: distinct threads and distinct events it has presence in,
    // for target↔target co-occurrence weighting.
    let mut group_threads: BTreeMap<Uuid, BTreeSet<Uuid>> = BTreeMap::new();
    let mut group_events: BTreeMap<Uuid, BTreeSet<Uuid>> = BTreeMap::new();
    // Per (group, identifier): distinct events, for target↔identifier weighting.
    let mut group_identifier_events: BTreeMap<(Uuid, Uuid), BTreeSet<Uuid>> = BTreeMap::new();

    for row in &presence {
        let group_id = group_of(row.target_id);
        group_threads.entry(group_id).or_default().insert(row.thread_id);
        group_events.entry(group_id).or_default().insert(row.message_event_id);
        group_identifier_events
            .entry((group_id, row.matched_identifier_id))
            .or_default()
            .insert(row.message_event_id);
    }

    let mut edges: Vec<Edge> = Vec::new();
    let groups: Vec<Uuid> = seen_group_nodes.into_iter().collect();

    for (i, &a) in groups.iter().enumerate() {
        for &b in &groups[i + 1..] {
            let shared_threads = group_threads
                .get(&a)
                .zip(group_threads.get(&b))
                .map(|(x, y)| x.intersection(y).count())
                .unwrap_or(0);
            let weight = if shared_threads > 0 {
                shared_threads
            } else {
                group_events
                    .get(&a)
                    .zip(group_events.get(&b))
                    .map(|(x, y)| x.intersection(y).count())
                    .unwrap_or(0)
            };
            if weight == 0 {
                continue;
            }
            push_edge(&mut edges, a, b, EdgeKind::TargetTarget, weight as u32, options.min_edge_weight);
        }
    }

    if options.include_identifiers {
        for ((group_id, identifier_id), events) in &group_identifier_events {
            let weight = events.len() as u32;
            if weight == 0 {
                continue;
            }
            push_edge(&mut edges, *group_id, *identifier_id, EdgeKind::TargetIdentifier, weight, options.min_edge_weight);
        }
    }

    nodes.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| a.label.to_ascii_lowercase().cmp(&b.label.to_ascii_lowercase()))
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    edges.sort_by(|a, b| {
        a.source_node_id
            .cmp(&b.source_node_id)
            .then_with(|| a.target_node_id.cmp(&b.target_node_id))
            .then_with(|| a.kind.cmp(&b.kind))
    });

    Ok(AssociationGraph { nodes, edges })
}

/// Push a canonicalized, no-self-loop edge if its weight clears
/// `min_edge_weight` (`spec.md §4.9`, "Filter by minEdgeWeight; skip
/// self-loops").
fn push_edge(edges: &mut Vec<Edge>, a: Uuid, b: Uuid, kind: EdgeKind, weight: u32, min_edge_weight: u32) {
    if a == b || weight < min_edge_weight {
        return;
    }
    let (source_node_id, target_node_id) = if a < b { (a, b) } else { (b, a) };
    edges.push(Edge {
        source_node_id,
        target_node_id,
        kind,
        weight,
    });
}

async fn load_targets(pool: &SqlitePool, case_id: CaseId) -> Result<Vec<TargetRow>, CaseGraphError> {
    let rows = sqlx::query(r#"SELECT "TargetId", "DisplayName", "GlobalEntityId" FROM "TargetRecord" WHERE "CaseId" = ?"#)
        .bind(case_id.to_string())
        .fetch_all(pool)
        .await
        .map_err(anyhow::Error::from)?;

    rows.into_iter()
        .map(|row| {
            let target_id: String = row.get("TargetId");
            let global_entity_id: Option<String> = row.get("GlobalEntityId");
            Ok(TargetRow {
                target_id: Uuid::parse_str(&target_id).map_err(anyhow::Error::from)?,
                display_name: row.get("DisplayName"),
                global_entity_id: global_entity_id
                    .map(|id| Uuid::parse_str(&id))
                    .transpose()
                    .map_err(anyhow::Error::from)?,
            })
        })
        .collect()
}

async fn load_links(pool: &SqlitePool, case_id: CaseId) -> Result<Vec<LinkRow>, CaseGraphError> {
    let rows = sqlx::query(
        r#"SELECT l."TargetId" AS "TargetId", i."IdentifierId" AS "IdentifierId",
                  i."Type" AS "Type", i."ValueRaw" AS "ValueRaw"
           FROM "TargetIdentifierLinkRecord" l
           JOIN "IdentifierRecord" i ON i."IdentifierId" = l."IdentifierId"
           WHERE l."CaseId" = ?"#,
    )
    .bind(case_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(anyhow::Error::from)?;

    rows.into_iter()
        .map(|row| {
            let target_id: String = row.get("TargetId");
            let identifier_id: String = row.get("IdentifierId");
            Ok(LinkRow {
                target_id: Uuid::parse_str(&target_id).map_err(anyhow::Error::from)?,
                identifier_id: Uuid::parse_str(&identifier_id).map_err(anyhow::Error::from)?,
                identifier_type: row.get("Type"),
                value_raw: row.get("ValueRaw"),
            })
        })
        .collect()
}

async fn load_presence(pool: &SqlitePool, case_id: CaseId) -> Result<Vec<PresenceRow>, CaseGraphError> {
    let rows = sqlx::query(
        r#"SELECT p."TargetId" AS "TargetId", p."MessageEventId" AS "MessageEventId",
                  p."MatchedIdentifierId" AS "MatchedIdentifierId", m."ThreadId" AS "ThreadId"
           FROM "TargetMessagePresenceRecord" p
           JOIN "MessageEventRecord" m ON m."MessageEventId" = p."MessageEventId"
           WHERE p."CaseId" = ?"#,
    )
    .bind(case_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(anyhow::Error::from)?;

    rows.into_iter()
        .map(|row| {
            let target_id: String = row.get("TargetId");
            let message_event_id: String = row.get("MessageEventId");
            let matched_identifier_id: String = row.get("MatchedIdentifierId");
            let thread_id: String = row.get("ThreadId");
            Ok(PresenceRow {
                target_id: Uuid::parse_str(&target_id).map_err(anyhow::Error::from)?,
                message_event_id: Uuid::parse_str(&message_event_id).map_err(anyhow::Error::from)?,
                matched_identifier_id: Uuid::parse_str(&matched_identifier_id).map_err(anyhow::Error::from)?,
                thread_id: Uuid::parse_str(&thread_id).map_err(anyhow::Error::from)?,
            })
        })
        .collect()
}

async fn load_global_person_labels(pool: &SqlitePool, targets: &[TargetRow]) -> Result<BTreeMap<Uuid, String>, CaseGraphError> {
    let mut labels = BTreeMap::new();
    for target in targets {
        let Some(global_person_id) = target.global_entity_id else { continue };
        if labels.contains_key(&global_person_id) {
            continue;
        }
        let display_name: Option<String> = sqlx::query_scalar(r#"SELECT "DisplayName" FROM "GlobalPersonRecord" WHERE "GlobalPersonId" = ?"#)
            .bind(global_person_id.to_string())
            .fetch_optional(pool)
            .await
            .map_err(anyhow::Error::from)?;
        if let Some(display_name) = display_name {
            labels.insert(global_person_id, display_name);
        }
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_store::{AuditLog, WriteGate};
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        casegraph_store::schema::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn co_occurring_targets_get_a_weighted_edge() {
        let pool = memory_pool().await;
        let gate = WriteGate::new(":memory:");
        let audit_log = AuditLog::new();
        let case_id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(r#"INSERT INTO "CaseRecord" ("CaseId", "Name", "CreatedAtUtc", "LastOpenedAtUtc") VALUES (?, ?, ?, NULL)"#)
            .bind(case_id.to_string())
            .bind("Op Redwood")
            .bind(now.to_rfc3339())
            .execute(&pool)
            .await
            .unwrap();

        let a = casegraph_targets::create_target(
            &pool, &gate, &audit_log, now, case_id, "Alice", None,
            casegraph_targets::GlobalPersonLink::None, "Manual", "manual:a", "casegraph-targets/1", "tester",
        ).await.unwrap();
        let b = casegraph_targets::create_target(
            &pool, &gate, &audit_log, now, case_id, "Bob", None,
            casegraph_targets::GlobalPersonLink::None, "Manual", "manual:b", "casegraph-targets/1", "tester",
        ).await.unwrap();

        let evidence_item_id = Uuid::new_v4();
        let thread_id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO "MessageThreadRecord" ("ThreadId","CaseId","EvidenceItemId","Platform","ThreadKey","Title","CreatedAtUtc","SourceLocator","IngestModuleVersion")
               VALUES (?, ?, ?, 'SMS', 'key', NULL, ?, 'loc', 'test/1')"#,
        )
        .bind(thread_id.to_string())
        .bind(case_id.to_string())
        .bind(evidence_item_id.to_string())
        .bind(now.to_rfc3339())
        .execute(&pool)
        .await
        .unwrap();
        let message_event_id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO "MessageEventRecord"
               ("MessageEventId","ThreadId","CaseId","EvidenceItemId","Platform","TimestampUtc","Direction","Sender","Recipients","Body","IsDeleted","SourceLocator","IngestModuleVersion")
               VALUES (?, ?, ?, ?, 'SMS', ?, 'Incoming', 'a', 'b', 'hi', 0, 'loc#1', 'test/1')"#,
        )
        .bind(message_event_id.to_string())
        .bind(thread_id.to_string())
        .bind(case_id.to_string())
        .bind(evidence_item_id.to_string())
        .bind(now.to_rfc3339())
        .execute(&pool)
        .await
        .unwrap();

        for (target_id, identifier_id) in [(a.target_id, Uuid::new_v4()), (b.target_id, Uuid::new_v4())] {
            sqlx::query(
                r#"INSERT INTO "TargetMessagePresenceRecord"
                   ("PresenceId","CaseId","TargetId","MessageEventId","MatchedIdentifierId","Role","EvidenceItemId","SourceLocator","MessageTimestampUtc","FirstSeenUtc","LastSeenUtc")
                   VALUES (?, ?, ?, ?, ?, 'Sender', ?, 'loc#1', ?, ?, ?)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(case_id.to_string())
            .bind(target_id.to_string())
            .bind(message_event_id.to_string())
            .bind(identifier_id.to_string())
            .bind(evidence_item_id.to_string())
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(&pool)
            .await
            .unwrap();
        }

        let graph = build_association_graph(&pool, case_id, GraphOptions::default()).await.unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].kind, EdgeKind::TargetTarget);
        assert_eq!(graph.edges[0].weight, 1);
    }
}

//! Co-authorship network construction.
//!
//! For one seed (an affiliation or a person) the builder scans the works
//! the seed participates in, collects co-participants as nodes, counts
//! pair recurrences as edge weights, and sizes nodes and edges for
//! visualization. The artifact is persisted at most once per seed;
//! an existing artifact is returned untouched.

use std::collections::HashMap;

use tracing::{debug, info, instrument, warn};

use bibgraph_shared::{
    BibgraphError, CoauthorshipNetwork, EntityKind, NetworkArtifact, NetworkEdge, NetworkNode,
    Result, Work,
};
use bibgraph_storage::Store;

/// Tolerance for comparing co-authorship counts to the extremes.
const COUNT_TOLERANCE: f64 = 0.01;

/// Build (or fetch) the co-authorship network for `seed`.
///
/// `kind` selects the participant dimension: affiliations connect through
/// their authors' affiliation snapshots, persons through resolved author
/// ids. Works with more than `max_authors` participants are ignored.
///
/// Returns the artifact, or `None` when the seed does not exist in the
/// store. An artifact too large for the store is returned but not
/// persisted — the seed simply has no stored network.
#[instrument(skip(store), fields(seed = %seed, kind = %kind))]
pub async fn build_network(
    store: &Store,
    seed: &str,
    kind: EntityKind,
    max_authors: usize,
) -> Result<Option<NetworkArtifact>> {
    if let Some(existing) = store.get_network(kind, seed).await? {
        debug!("network already computed");
        return Ok(Some(existing));
    }

    let seed_label = match kind {
        EntityKind::Affiliation => match store.get_affiliation(seed).await? {
            Some(aff) => aff.display_name().to_string(),
            None => return Ok(None),
        },
        EntityKind::Person => match store.get_person(seed).await? {
            Some(person) => person.full_name,
            None => return Ok(None),
        },
        _ => {
            return Err(BibgraphError::validation(format!(
                "networks are built for affiliations or persons, not {kind}"
            )));
        }
    };

    let mut nodes: Vec<String> = vec![seed.to_string()];
    let mut labels: Vec<String> = vec![seed_label];
    let mut edges: Vec<(String, String)> = Vec::new();
    let mut counts: HashMap<(String, String), u64> = HashMap::new();
    let mut works_count = 0usize;

    // First pass: seed edges, one per first-seen co-participant per work.
    let seed_works = match kind {
        EntityKind::Affiliation => store.works_for_affiliation(seed, max_authors).await?,
        _ => store.works_for_person(seed, max_authors).await?,
    };
    for work in &seed_works {
        works_count += 1;
        let mut work_nodes: Vec<String> = vec![seed.to_string()];
        let mut work_edges: Vec<(String, String)> = Vec::new();

        for (id, label) in participants(work, kind) {
            if id.is_empty() || id == seed {
                continue;
            }
            if !nodes.contains(&id) {
                nodes.push(id.clone());
                labels.push(label);
            }
            if !work_nodes.contains(&id) {
                let edge_found = work_edges.contains(&(seed.to_string(), id.clone()))
                    || edges.contains(&(id.clone(), seed.to_string()));
                if !edge_found {
                    work_edges.push((seed.to_string(), id.clone()));
                }
                work_nodes.push(id);
            }
        }

        for (a, b) in work_edges {
            if edges.contains(&(a.clone(), b.clone())) {
                *counts.get_mut(&(a, b)).expect("counted edge") += 1;
            } else if edges.contains(&(b.clone(), a.clone())) {
                *counts.get_mut(&(b, a)).expect("counted edge") += 1;
            } else {
                counts.insert((a.clone(), b.clone()), 1);
                edges.push((a, b));
            }
        }
    }

    // Second pass: edges among the co-participants themselves, counting
    // every recurrence of a pair in works the seed is absent from.
    for node in nodes.clone() {
        if node == seed {
            continue;
        }
        let node_works = match kind {
            EntityKind::Affiliation => {
                store
                    .works_for_affiliation_excluding(&node, seed, max_authors)
                    .await?
            }
            _ => {
                store
                    .works_for_person_excluding(&node, seed, max_authors)
                    .await?
            }
        };
        for work in &node_works {
            for (id, _) in participants(work, kind) {
                if id == seed {
                    warn!(work = %work.id, "seed unexpectedly present in excluded scan");
                    continue;
                }
                if !nodes.contains(&id) || id == node {
                    continue;
                }
                if edges.contains(&(node.clone(), id.clone())) {
                    *counts.get_mut(&(node.clone(), id.clone())).expect("counted edge") += 1;
                } else if edges.contains(&(id.clone(), node.clone())) {
                    *counts.get_mut(&(id.clone(), node.clone())).expect("counted edge") += 1;
                } else {
                    counts.insert((node.clone(), id.clone()), 1);
                    edges.push((node.clone(), id.clone()));
                }
            }
        }
    }

    let artifact = size_network(seed, &nodes, &labels, &edges, &counts);

    info!(
        nodes = artifact.coauthorship_network.nodes.len(),
        edges = artifact.coauthorship_network.edges.len(),
        works = works_count,
        "network built"
    );

    match store.insert_network(kind, &artifact).await {
        Ok(()) => {}
        Err(BibgraphError::Oversized { id, bytes }) => {
            warn!(%id, bytes, "network too large for the store, skipping persistence");
        }
        Err(e) => return Err(e),
    }
    Ok(Some(artifact))
}

/// The participant ids (with display labels) of a work, along the
/// dimension selected by `kind`.
fn participants(work: &Work, kind: EntityKind) -> Vec<(String, String)> {
    let mut out = Vec::new();
    match kind {
        EntityKind::Affiliation => {
            for author in &work.authors {
                for aff in &author.affiliations {
                    out.push((aff.id.clone(), aff.name.clone()));
                }
            }
        }
        _ => {
            for author in &work.authors {
                out.push((author.id.clone(), author.full_name.clone()));
            }
        }
    }
    out
}

/// Apply the node and edge sizing formulas and produce the artifact.
fn size_network(
    seed: &str,
    nodes: &[String],
    labels: &[String],
    edges: &[(String, String)],
    counts: &HashMap<(String, String), u64>,
) -> NetworkArtifact {
    let num_nodes = nodes.len();

    let nodes_out: Vec<NetworkNode> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let degree = edges.iter().filter(|(a, b)| a == node || b == node).count();
            let size = if num_nodes > 1 {
                50.0 * (1.0 + degree as f64 / (num_nodes - 1) as f64).log2()
            } else {
                1.0
            };
            NetworkNode {
                id: node.clone(),
                label: labels[i].clone(),
                degree,
                size,
            }
        })
        .collect();

    let label_of = |id: &str| -> String {
        nodes
            .iter()
            .position(|n| n == id)
            .map(|i| labels[i].clone())
            .unwrap_or_default()
    };

    let mut edges_out: Vec<NetworkEdge> = edges
        .iter()
        .map(|(a, b)| {
            let coauthorships = counts
                .get(&(a.clone(), b.clone()))
                .or_else(|| counts.get(&(b.clone(), a.clone())))
                .copied()
                .unwrap_or(0);
            NetworkEdge {
                source: a.clone(),
                source_name: label_of(a),
                target: b.clone(),
                target_name: label_of(b),
                coauthorships,
                size: coauthorships as f64,
            }
        })
        .collect();

    let top = edges_out
        .iter()
        .map(|e| e.coauthorships)
        .max()
        .unwrap_or(1) as f64;
    let bot = edges_out
        .iter()
        .map(|e| e.coauthorships)
        .min()
        .unwrap_or(1) as f64;

    for edge in &mut edges_out {
        let count = edge.coauthorships as f64;
        // The top check wins when top == bot: a single distinct count is
        // the maximum.
        if (top - count).abs() < COUNT_TOLERANCE {
            edge.size = 10.0;
        } else if (bot - count).abs() < COUNT_TOLERANCE {
            edge.size = 1.0;
        } else {
            let size = 10.0 / (1.0 + (6.0 - 10.0 * count / top).exp());
            edge.size = size.max(1.0);
        }
    }

    NetworkArtifact {
        id: seed.to_string(),
        coauthorship_network: CoauthorshipNetwork {
            nodes: nodes_out,
            edges: edges_out,
        },
    }
}

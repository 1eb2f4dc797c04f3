pub mod keeper;
pub mod union_find;

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Thresholds;
use crate::engine::CancelToken;
use crate::error::Error;
use crate::media::{FileCatalog, MediaFile, MediaType};
use crate::scoring::PairVerdict;
use crate::signal::weights::WeightTable;
use crate::signal::{Penalty, Signal};

use self::keeper::{suggest_keeper, KeeperCriterion};
use self::union_find::UnionFind;

/// One file inside a duplicate group, scored against the group's keeper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub file_id: Uuid,
    pub confidence: f64,
    pub signals: Vec<Signal>,
    pub penalties: Vec<Penalty>,
    pub rationale: Vec<String>,
    pub file_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroupResult {
    pub group_id: Uuid,
    /// Keeper first, then by descending confidence.
    pub members: Vec<GroupMember>,
    pub confidence: f64,
    pub rationale_lines: Vec<String>,
    pub keeper_suggestion: Option<Uuid>,
    pub keeper_criterion: Option<KeeperCriterion>,
    /// Set when the group could not be fully resolved. Such groups are never auto-merged.
    pub incomplete: bool,
    pub media_type: MediaType,
}

impl DuplicateGroupResult {
    pub fn member(&self, file_id: Uuid) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.file_id == file_id)
    }

    pub fn contains(&self, file_id: Uuid) -> bool {
        self.member(file_id).is_some()
    }

    pub fn file_ids(&self) -> Vec<Uuid> {
        self.members.iter().map(|m| m.file_id).collect()
    }

    /// Bytes reclaimed if every member except `keeper_id` were removed.
    pub fn reclaimable_bytes(&self, keeper_id: Uuid) -> u64 {
        self.members
            .iter()
            .filter(|m| m.file_id != keeper_id)
            .map(|m| m.file_size)
            .sum()
    }

    fn smallest_member(&self) -> Option<Uuid> {
        self.members.iter().map(|m| m.file_id).min()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub groups: Vec<DuplicateGroupResult>,
    /// Files that matched something but were left alone after a cohesion split.
    pub orphaned: Vec<Uuid>,
}

impl ClusterReport {
    pub fn group(&self, group_id: Uuid) -> Option<&DuplicateGroupResult> {
        self.groups.iter().find(|g| g.group_id == group_id)
    }
}

/// Build duplicate groups from pairwise verdicts.
pub fn cluster(catalog: &FileCatalog, verdicts: &[PairVerdict], thresholds: &Thresholds) -> ClusterReport {
    let never = CancelToken::new();
    match cluster_cancellable(catalog, verdicts, thresholds, &never) {
        Ok(report) => report,
        Err(_) => ClusterReport::default(),
    }
}

/// Same as [`cluster`], checking `cancel` between components.
pub fn cluster_cancellable(
    catalog: &FileCatalog,
    verdicts: &[PairVerdict],
    thresholds: &Thresholds,
    cancel: &CancelToken,
) -> Result<ClusterReport, Error> {
    let graph = VerdictGraph::build(catalog, verdicts);
    let cohesion = thresholds.cohesion();

    let mut uf = UnionFind::new(graph.nodes.len());
    for &(a, b) in &graph.duplicate_edges {
        uf.union(a, b);
    }

    let mut groups = Vec::new();
    let mut orphaned = Vec::new();

    for component in uf.components().into_iter().filter(|c| c.len() >= 2) {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let edges: Vec<(usize, usize)> = graph
            .duplicate_edges
            .iter()
            .copied()
            .filter(|(a, _)| component.binary_search(a).is_ok())
            .collect();

        let mut pieces = Vec::new();
        split_until_cohesive(&graph, component, edges, cohesion, false, &mut pieces);

        for piece in pieces {
            if piece.nodes.len() < 2 {
                orphaned.extend(piece.nodes.iter().map(|i| graph.nodes[*i]));
                continue;
            }
            if let Some(group) = build_group(&graph, catalog, &piece, cohesion) {
                groups.push(group);
            }
        }
    }

    sort_groups(&mut groups);
    orphaned.sort();

    debug!(
        "Clustered {} verdicts into {} groups ({} orphaned)",
        verdicts.len(),
        groups.len(),
        orphaned.len()
    );

    Ok(ClusterReport { groups, orphaned })
}

/// Highest confidence first, ties broken by the smallest member id.
pub fn sort_groups(groups: &mut [DuplicateGroupResult]) {
    groups.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.smallest_member().cmp(&b.smallest_member()))
    });
}

/// Re-decide stored verdicts under new weights and thresholds without re-measuring.
///
/// Signal contributions are reweighted from their raw scores. Provider-side cutoffs such
/// as the hash distance are baked into the raw scores and need a fresh comparison.
pub fn redecide(verdicts: &[PairVerdict], weights: &WeightTable, thresholds: &Thresholds) -> Vec<PairVerdict> {
    verdicts
        .iter()
        .map(|v| {
            if v.signals.is_empty() && v.penalties.is_empty() {
                return PairVerdict {
                    is_duplicate: false,
                    confidence: 0.0,
                    ..v.clone()
                };
            }
            let signals = v
                .signals
                .iter()
                .map(|s| Signal::new(s.kind, s.raw_score, weights.weight(s.kind), s.rationale.clone()))
                .collect();
            PairVerdict::decide(
                v.file_a,
                v.file_b,
                v.media_type,
                signals,
                v.penalties.clone(),
                weights,
                thresholds,
            )
        })
        .collect()
}

/// Re-run grouping over existing verdicts with new settings.
pub fn recluster(
    catalog: &FileCatalog,
    verdicts: &[PairVerdict],
    weights: &WeightTable,
    thresholds: &Thresholds,
) -> ClusterReport {
    let redecided = redecide(verdicts, weights, thresholds);
    cluster(catalog, &redecided, thresholds)
}

/// Verdicts indexed over dense node ids.
struct VerdictGraph<'a> {
    nodes: Vec<Uuid>,
    /// Every observed verdict between two known files, keyed by ordered node pair.
    observed: AHashMap<(usize, usize), &'a PairVerdict>,
    /// Duplicate edges as ordered node pairs, sorted.
    duplicate_edges: Vec<(usize, usize)>,
}

impl<'a> VerdictGraph<'a> {
    fn build(catalog: &FileCatalog, verdicts: &'a [PairVerdict]) -> Self {
        let mut ids: Vec<Uuid> = Vec::new();
        for v in verdicts {
            ids.push(v.file_a);
            ids.push(v.file_b);
        }
        ids.sort();
        ids.dedup();

        let (nodes, skipped): (Vec<Uuid>, Vec<Uuid>) = ids.into_iter().partition(|id| catalog.get(*id).is_some());
        if !skipped.is_empty() {
            warn!("Ignoring verdicts for {} file(s) missing from the catalog", skipped.len());
        }
        let index: AHashMap<Uuid, usize> = nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut observed: AHashMap<(usize, usize), &'a PairVerdict> = AHashMap::new();
        for v in verdicts {
            let (Some(&a), Some(&b)) = (index.get(&v.file_a), index.get(&v.file_b)) else {
                continue;
            };
            if a == b {
                continue;
            }
            observed.insert((a.min(b), a.max(b)), v);
        }

        let mut duplicate_edges: Vec<(usize, usize)> = observed
            .iter()
            .filter(|(key, v)| v.is_duplicate && same_media_type(catalog, nodes[key.0], nodes[key.1]))
            .map(|(key, _)| *key)
            .collect();
        duplicate_edges.sort();

        Self {
            nodes,
            observed,
            duplicate_edges,
        }
    }

    fn verdict(&self, a: usize, b: usize) -> Option<&'a PairVerdict> {
        self.observed.get(&(a.min(b), a.max(b))).copied()
    }

    fn confidence(&self, a: usize, b: usize) -> f64 {
        self.verdict(a, b).map(|v| v.confidence).unwrap_or(0.0)
    }

    /// Lowest confidence among all verdicts observed between members of `nodes`.
    fn min_observed(&self, nodes: &[usize]) -> Option<f64> {
        let mut min: Option<f64> = None;
        for (i, &a) in nodes.iter().enumerate() {
            for &b in &nodes[i + 1..] {
                if let Some(v) = self.verdict(a, b) {
                    min = Some(min.map_or(v.confidence, |m: f64| m.min(v.confidence)));
                }
            }
        }
        min
    }
}

fn same_media_type(catalog: &FileCatalog, a: Uuid, b: Uuid) -> bool {
    match (catalog.get(a), catalog.get(b)) {
        (Some(fa), Some(fb)) => fa.media_type == fb.media_type,
        _ => false,
    }
}

/// A connected set of nodes and the duplicate edges that still hold it together.
struct Piece {
    nodes: Vec<usize>,
    edges: Vec<(usize, usize)>,
    /// Produced by removing links from a larger component.
    split: bool,
    /// Weakest observed confidence inside the piece, when below cohesion.
    below_cohesion: Option<f64>,
}

fn split_until_cohesive(
    graph: &VerdictGraph<'_>,
    nodes: Vec<usize>,
    mut edges: Vec<(usize, usize)>,
    cohesion: f64,
    split: bool,
    out: &mut Vec<Piece>,
) {
    loop {
        let min = graph.min_observed(&nodes).unwrap_or(0.0);
        if nodes.len() < 2 || min >= cohesion {
            out.push(Piece {
                nodes,
                edges,
                split,
                below_cohesion: None,
            });
            return;
        }
        if nodes.len() == 2 {
            // A lone link between cohesion and acceptance is kept but flagged.
            out.push(Piece {
                nodes,
                edges,
                split,
                below_cohesion: Some(min),
            });
            return;
        }

        let weakest = edges
            .iter()
            .enumerate()
            .min_by(|(_, x), (_, y)| {
                graph
                    .confidence(x.0, x.1)
                    .partial_cmp(&graph.confidence(y.0, y.1))
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| graph.nodes[x.0].cmp(&graph.nodes[y.0]))
                    .then_with(|| graph.nodes[x.1].cmp(&graph.nodes[y.1]))
            })
            .map(|(i, _)| i);
        let Some(weakest) = weakest else {
            out.push(Piece {
                nodes,
                edges,
                split,
                below_cohesion: Some(min),
            });
            return;
        };
        let (a, b) = edges.remove(weakest);
        debug!(
            "Removing weak link {} / {} ({:.2} < cohesion {:.2})",
            graph.nodes[a],
            graph.nodes[b],
            graph.confidence(a, b),
            cohesion
        );

        let local: AHashMap<usize, usize> = nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let mut uf = UnionFind::new(nodes.len());
        for (x, y) in &edges {
            uf.union(local[x], local[y]);
        }
        let components = uf.components();
        if components.len() == 1 {
            continue;
        }

        warn!(
            "Splitting component of {} files into {} pieces: links fell below cohesion {:.2}",
            nodes.len(),
            components.len(),
            cohesion
        );
        for component in components {
            let piece_nodes: Vec<usize> = component.iter().map(|i| nodes[*i]).collect();
            let members: AHashSet<usize> = piece_nodes.iter().copied().collect();
            let piece_edges: Vec<(usize, usize)> = edges
                .iter()
                .copied()
                .filter(|(x, _)| members.contains(x))
                .collect();
            split_until_cohesive(graph, piece_nodes, piece_edges, cohesion, true, out);
        }
        return;
    }
}

/// Best bottleneck confidence from `source` to every node over `edges`, plus the
/// neighbour each node was reached from.
fn widest_paths(
    graph: &VerdictGraph<'_>,
    nodes: &[usize],
    edges: &[(usize, usize)],
    source: usize,
) -> AHashMap<usize, (f64, usize)> {
    let mut best: AHashMap<usize, (f64, usize)> = AHashMap::new();
    let mut done: AHashSet<usize> = AHashSet::new();
    best.insert(source, (1.0, source));

    while done.len() < nodes.len() {
        let next = best
            .iter()
            .filter(|(n, _)| !done.contains(*n))
            .max_by(|(na, (ca, _)), (nb, (cb, _))| {
                ca.partial_cmp(cb)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| graph.nodes[**nb].cmp(&graph.nodes[**na]))
            })
            .map(|(n, (c, _))| (*n, *c));
        let Some((node, width)) = next else {
            break;
        };
        done.insert(node);

        for &(a, b) in edges {
            let neighbour = if a == node {
                b
            } else if b == node {
                a
            } else {
                continue;
            };
            if done.contains(&neighbour) {
                continue;
            }
            let candidate = width.min(graph.confidence(a, b));
            let improves = best.get(&neighbour).map_or(true, |(c, _)| candidate > *c);
            if improves {
                best.insert(neighbour, (candidate, node));
            }
        }
    }
    best
}

fn build_group(
    graph: &VerdictGraph<'_>,
    catalog: &FileCatalog,
    piece: &Piece,
    cohesion: f64,
) -> Option<DuplicateGroupResult> {
    let files: Vec<&MediaFile> = piece
        .nodes
        .iter()
        .filter_map(|n| catalog.get(graph.nodes[*n]))
        .collect();
    let media_type = files.first()?.media_type;
    let (keeper_id, criterion) = suggest_keeper(&files)?;
    let keeper_node = piece.nodes.iter().copied().find(|n| graph.nodes[*n] == keeper_id)?;
    let reach = widest_paths(graph, &piece.nodes, &piece.edges, keeper_node);

    let mut members: Vec<GroupMember> = Vec::with_capacity(files.len());
    for file in &files {
        let node = piece.nodes.iter().copied().find(|n| graph.nodes[*n] == file.id)?;
        if node == keeper_node {
            members.push(GroupMember {
                file_id: file.id,
                confidence: 1.0,
                signals: Vec::new(),
                penalties: Vec::new(),
                rationale: vec![format!("Suggested keeper: {}", criterion.describe())],
                file_size: file.file_size,
            });
            continue;
        }

        let member = match graph.verdict(keeper_node, node) {
            Some(direct) => GroupMember {
                file_id: file.id,
                confidence: direct.confidence,
                signals: direct.signals.clone(),
                penalties: direct.penalties.clone(),
                rationale: direct.rationale.clone(),
                file_size: file.file_size,
            },
            None => {
                let (width, via) = reach.get(&node).copied().unwrap_or((0.0, keeper_node));
                let link = graph.verdict(via, node);
                let mut rationale = vec![format!(
                    "Not compared with the keeper directly; linked through {} (weakest link {:.2})",
                    graph.nodes[via], width
                )];
                if let Some(link) = link {
                    rationale.extend(link.rationale.iter().cloned());
                }
                GroupMember {
                    file_id: file.id,
                    confidence: width,
                    signals: link.map(|l| l.signals.clone()).unwrap_or_default(),
                    penalties: link.map(|l| l.penalties.clone()).unwrap_or_default(),
                    rationale,
                    file_size: file.file_size,
                }
            }
        };
        members.push(member);
    }

    members.sort_by(|a, b| {
        let a_keeper = a.file_id == keeper_id;
        let b_keeper = b.file_id == keeper_id;
        b_keeper
            .cmp(&a_keeper)
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
            .then_with(|| a.file_id.cmp(&b.file_id))
    });

    let confidence = members.iter().map(|m| m.confidence).sum::<f64>() / members.len() as f64;
    let penalized = members.iter().filter(|m| !m.penalties.is_empty()).count();
    let incomplete = piece.split || piece.below_cohesion.is_some() || penalized > 0;

    let keeper_name = files
        .iter()
        .find(|f| f.id == keeper_id)
        .map(|f| f.file_name())
        .unwrap_or_default();
    let mut rationale_lines = vec![
        format!(
            "{} {} files linked by {} matching pair(s)",
            members.len(),
            media_type,
            piece.edges.len()
        ),
        format!("Keeper {} chosen by {}", keeper_name, criterion.describe()),
    ];
    if piece.split {
        rationale_lines.push(format!(
            "Split from a larger set whose links fell below cohesion {:.2}",
            cohesion
        ));
    }
    if let Some(min) = piece.below_cohesion {
        rationale_lines.push(format!(
            "Weakest link {:.2} is below cohesion {:.2}; review before merging",
            min, cohesion
        ));
    }
    if penalized > 0 {
        rationale_lines.push(format!("{} member(s) carry penalties", penalized));
    }

    Some(DuplicateGroupResult {
        group_id: group_id_for(&members),
        members,
        confidence,
        rationale_lines,
        keeper_suggestion: Some(keeper_id),
        keeper_criterion: Some(criterion),
        incomplete,
        media_type,
    })
}

/// Stable id derived from the member set, so re-clustering yields the same ids.
fn group_id_for(members: &[GroupMember]) -> Uuid {
    let mut ids: Vec<Uuid> = members.iter().map(|m| m.file_id).collect();
    ids.sort();
    let bytes: Vec<u8> = ids.iter().flat_map(|id| id.as_bytes().to_vec()).collect();
    Uuid::new_v5(&Uuid::NAMESPACE_OID, &bytes)
}

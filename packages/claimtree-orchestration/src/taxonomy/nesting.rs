use super::{Claim, Subtopic};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// Fold duplicate groups into their canonical claims.
///
/// `nesting` maps a canonical claim id to the ids it absorbs. Resolved
/// duplicates are attached under the canonical claim with `duplicated = true`
/// and leave the visible list, which is then stably sorted by
/// `1 + duplicates.len()` descending.
///
/// The subtopic is first flattened (visible claims plus anything already
/// nested), so applying the same map twice gives the same result. Ids that
/// are not in the subtopic are skipped. If cycles in `nesting` would hide a
/// set of claims entirely, the earliest member of each cycle that no other
/// hidden claim absorbs stays visible.
pub fn nest_claims(subtopic: &mut Subtopic, nesting: &BTreeMap<String, Vec<String>>) {
    let mut order: Vec<String> = Vec::new();
    let mut flat: HashMap<String, Claim> = HashMap::new();
    for claim in &subtopic.claims {
        flatten(claim, &mut order, &mut flat);
    }

    for (canonical_id, dup_ids) in nesting {
        if !dup_ids.is_empty() && !flat.contains_key(canonical_id) {
            warn!(
                "Subtopic {:?}: canonical claim {} not found, group ignored",
                subtopic.subtopic_name, canonical_id
            );
        }
    }

    let mut groups: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut duplicated: HashSet<&str> = HashSet::new();
    for id in &order {
        let Some(dup_ids) = nesting.get(id) else {
            continue;
        };
        let members: Vec<&str> = dup_ids
            .iter()
            .filter(|dup_id| *dup_id != id)
            .filter(|dup_id| {
                let known = flat.contains_key(dup_id.as_str());
                if !known {
                    debug!("Duplicate id {} not in subtopic, skipped", dup_id);
                }
                known
            })
            .map(String::as_str)
            .collect();
        if members.is_empty() {
            continue;
        }
        duplicated.extend(members.iter().copied());
        groups.insert(id.as_str(), members);
    }

    // Anything a visible claim cannot reach sits on a cycle; surface it
    let mut reachable: HashSet<&str> = HashSet::new();
    for id in &order {
        if !duplicated.contains(id.as_str()) {
            mark_reachable(id, &groups, &mut reachable);
        }
    }
    let stranded: Vec<&str> = order
        .iter()
        .map(String::as_str)
        .filter(|id| !reachable.contains(id))
        .collect();
    if !stranded.is_empty() {
        let reach: HashMap<&str, HashSet<&str>> = stranded
            .iter()
            .map(|&id| {
                let mut seen = HashSet::new();
                mark_reachable(id, &groups, &mut seen);
                (id, seen)
            })
            .collect();
        for &id in &stranded {
            if reachable.contains(id) {
                continue;
            }
            // Only cycles nothing else feeds into get a visible head
            let fed = stranded
                .iter()
                .any(|&other| reach[other].contains(id) && !reach[id].contains(other));
            if fed {
                continue;
            }
            warn!(
                "Subtopic {:?}: cyclic duplicate groups, keeping {} visible",
                subtopic.subtopic_name, id
            );
            duplicated.remove(id);
            mark_reachable(id, &groups, &mut reachable);
        }
    }

    let mut visible: Vec<Claim> = order
        .iter()
        .filter(|id| !duplicated.contains(id.as_str()))
        .map(|id| {
            let mut visiting = HashSet::new();
            materialize(id, &flat, &groups, &duplicated, &mut visiting)
        })
        .collect();
    visible.sort_by_key(|claim| Reverse(1 + claim.duplicates.len()));

    subtopic.claims = visible;
}

fn flatten(claim: &Claim, order: &mut Vec<String>, flat: &mut HashMap<String, Claim>) {
    if !flat.contains_key(&claim.claim_id) {
        order.push(claim.claim_id.clone());
        flat.insert(
            claim.claim_id.clone(),
            Claim {
                duplicates: Vec::new(),
                duplicated: false,
                ..claim.clone()
            },
        );
    }
    for dup in &claim.duplicates {
        flatten(dup, order, flat);
    }
}

fn mark_reachable<'a>(
    id: &'a str,
    groups: &HashMap<&'a str, Vec<&'a str>>,
    reachable: &mut HashSet<&'a str>,
) {
    if !reachable.insert(id) {
        return;
    }
    if let Some(members) = groups.get(id) {
        for member in members {
            mark_reachable(member, groups, reachable);
        }
    }
}

fn materialize<'a>(
    id: &'a str,
    flat: &HashMap<String, Claim>,
    groups: &HashMap<&'a str, Vec<&'a str>>,
    duplicated: &HashSet<&'a str>,
    visiting: &mut HashSet<&'a str>,
) -> Claim {
    visiting.insert(id);
    let mut claim = flat[id].clone();
    claim.duplicated = duplicated.contains(id);
    if let Some(members) = groups.get(id) {
        for member in members {
            if visiting.contains(member) {
                continue;
            }
            claim
                .duplicates
                .push(materialize(member, flat, groups, duplicated, visiting));
        }
    }
    visiting.remove(id);
    claim
}

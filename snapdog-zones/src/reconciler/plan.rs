//! Convergence planning
//!
//! Pure functions from (desired zone, observed topology) to the minimal list
//! of corrective backend calls. No I/O happens here.

use std::collections::HashSet;

use crate::error::ReconcileError;
use crate::model::{BackendGroup, ClientId, ClientState, GroupId, StreamId, Topology, ZoneIndex};

/// A client that should be in the zone's group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredClient {
    pub id: ClientId,
    /// Configured display name
    pub name: String,
}

/// What the backend should look like for one zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredZone {
    pub index: ZoneIndex,
    pub name: String,
    pub stream_id: StreamId,
    pub clients: Vec<DesiredClient>,
}

impl DesiredZone {
    /// Clients assigned to `index` that the backend already knows
    ///
    /// Clients without a backend id are left out until the backend
    /// reports them.
    pub fn from_clients(
        index: ZoneIndex,
        name: impl Into<String>,
        stream_id: StreamId,
        clients: &[ClientState],
    ) -> Self {
        let mut desired: Vec<DesiredClient> = clients
            .iter()
            .filter(|c| c.zone_index == index)
            .filter_map(|c| {
                c.backend_id().map(|id| DesiredClient {
                    id: id.clone(),
                    name: c.name.clone(),
                })
            })
            .collect();
        desired.sort_by(|a, b| a.id.cmp(&b.id));
        desired.dedup_by(|a, b| a.id == b.id);

        Self {
            index,
            name: name.into(),
            stream_id,
            clients: desired,
        }
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.iter().map(|c| c.id.clone()).collect()
    }

    fn id_set(&self) -> HashSet<&ClientId> {
        self.clients.iter().map(|c| &c.id).collect()
    }

    fn desired_count(&self, group: &BackendGroup) -> usize {
        let ids = self.id_set();
        group.member_ids().filter(|id| ids.contains(id)).count()
    }
}

/// One corrective backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correction {
    SetStream { group: GroupId, stream: StreamId },
    SetName { group: GroupId, name: String },
    SetClients { group: GroupId, clients: Vec<ClientId> },
    SetClientName { client: ClientId, name: String },
}

impl Correction {
    /// Mirror a successful call in the local topology view
    pub fn apply_to(&self, topology: &mut Topology) {
        match self {
            Correction::SetStream { group, stream } => topology.set_stream(group, stream),
            Correction::SetName { group, name } => topology.set_name(group, name),
            Correction::SetClients { group, clients } => topology.set_clients(group, clients),
            Correction::SetClientName { client, name } => topology.set_client_name(client, name),
        }
    }
}

/// Outcome of planning one zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZonePlan {
    /// No desired clients; nothing to converge
    Skip,
    /// Already correct; record the group and issue nothing
    Converged { group: GroupId },
    /// Repurpose `group` with these calls, in order
    Correct {
        group: GroupId,
        corrections: Vec<Correction>,
        /// Zone whose group is being taken over, if any
        displaced: Option<ZoneIndex>,
    },
}

/// Who else is entitled to which stream
///
/// A group tuned to another zone's stream belongs to that zone.
#[derive(Debug, Clone, Default)]
pub struct StreamClaims {
    claims: Vec<(ZoneIndex, StreamId)>,
}

impl StreamClaims {
    pub fn new(claims: impl IntoIterator<Item = (ZoneIndex, StreamId)>) -> Self {
        Self {
            claims: claims.into_iter().collect(),
        }
    }

    /// The other zone that owns this group's stream, if any
    pub fn owner_other_than(&self, zone: ZoneIndex, group: &BackendGroup) -> Option<ZoneIndex> {
        self.claims
            .iter()
            .find(|(index, stream)| *index != zone && *stream == group.stream_id)
            .map(|(index, _)| *index)
    }
}

/// The group already serving the zone correctly, if there is one
///
/// Correct means all of: exactly one group holds any desired client, its
/// members are exactly the desired set, its stream and name match the
/// zone, and every member reports a non-empty name.
pub fn converged_group(desired: &DesiredZone, topology: &Topology) -> Option<GroupId> {
    let ids = desired.id_set();
    let mut holding = topology
        .groups
        .iter()
        .filter(|g| g.member_ids().any(|id| ids.contains(id)));

    let group = holding.next()?;
    if holding.next().is_some() {
        return None;
    }

    let members: HashSet<&ClientId> = group.member_ids().collect();
    let correct = members == ids
        && group.stream_id == desired.stream_id
        && group.name == desired.name
        && group.members.iter().all(|m| !m.name.trim().is_empty());

    correct.then(|| group.id.clone())
}

/// Pick the group to repurpose for a misconfigured zone
///
/// Preference order:
/// 1. unclaimed groups holding desired clients (most desired clients first)
/// 2. any unclaimed group, the zone's own stream first
/// 3. claimed groups holding desired clients
/// 4. the first group
///
/// Options 3 and 4 take a group from another zone and report it.
pub fn select_target<'a>(
    desired: &DesiredZone,
    topology: &'a Topology,
    claims: &StreamClaims,
) -> Result<(&'a BackendGroup, Option<ZoneIndex>), ReconcileError> {
    let unclaimed = |g: &&BackendGroup| claims.owner_other_than(desired.index, g).is_none();
    let best_holder = |groups: Vec<&'a BackendGroup>| {
        groups
            .into_iter()
            .filter(|g| desired.desired_count(g) > 0)
            // max_by_key keeps the last maximum; reverse to favour earlier groups
            .rev()
            .max_by_key(|g| (desired.desired_count(g), g.stream_id == desired.stream_id))
    };

    let free: Vec<&BackendGroup> = topology.groups.iter().filter(unclaimed).collect();
    if let Some(group) = best_holder(free.clone()) {
        return Ok((group, None));
    }
    if let Some(group) = free
        .iter()
        .find(|g| g.stream_id == desired.stream_id)
        .or_else(|| free.first())
    {
        return Ok((*group, None));
    }

    let fallback = best_holder(topology.groups.iter().collect())
        .or_else(|| topology.groups.first())
        .ok_or(ReconcileError::NoGroupsAvailable(desired.index))?;
    Ok((fallback, claims.owner_other_than(desired.index, fallback)))
}

/// Plan the corrective calls for one zone
///
/// Each property is only corrected when it differs. Membership is set as
/// a whole, which both adds missing and evicts foreign clients. Client
/// names are pushed when they differ from configuration (with
/// `sync_client_names`) or are empty.
pub fn plan_zone(
    desired: &DesiredZone,
    topology: &Topology,
    claims: &StreamClaims,
    sync_client_names: bool,
) -> Result<ZonePlan, ReconcileError> {
    if desired.clients.is_empty() {
        return Ok(ZonePlan::Skip);
    }
    if let Some(group) = converged_group(desired, topology) {
        return Ok(ZonePlan::Converged { group });
    }

    let (target, displaced) = select_target(desired, topology, claims)?;
    let mut corrections = Vec::new();

    if target.stream_id != desired.stream_id {
        corrections.push(Correction::SetStream {
            group: target.id.clone(),
            stream: desired.stream_id.clone(),
        });
    }
    if target.name != desired.name {
        corrections.push(Correction::SetName {
            group: target.id.clone(),
            name: desired.name.clone(),
        });
    }

    let members: HashSet<&ClientId> = target.member_ids().collect();
    if members != desired.id_set() {
        corrections.push(Correction::SetClients {
            group: target.id.clone(),
            clients: desired.client_ids(),
        });
    }

    for client in &desired.clients {
        if client.name.trim().is_empty() {
            continue;
        }
        let reported = topology
            .member(&client.id)
            .map(|m| m.name.as_str())
            .unwrap_or("");
        let needs_name = if sync_client_names {
            reported != client.name
        } else {
            reported.trim().is_empty()
        };
        if needs_name {
            corrections.push(Correction::SetClientName {
                client: client.id.clone(),
                name: client.name.clone(),
            });
        }
    }

    Ok(ZonePlan::Correct {
        group: target.id.clone(),
        corrections,
        displaced,
    })
}

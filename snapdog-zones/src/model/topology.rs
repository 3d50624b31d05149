//! Grouping topology as reported by the synchronization backend

use serde::{Deserialize, Serialize};

use super::{ClientId, GroupId, StreamId};

/// A client as seen inside a backend group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendMember {
    pub id: ClientId,
    /// Name the backend reports; may be empty
    pub name: String,
}

impl BackendMember {
    pub fn new(id: impl Into<ClientId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// The backend's unit of synchronized playback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendGroup {
    pub id: GroupId,
    pub stream_id: StreamId,
    pub name: String,
    pub members: Vec<BackendMember>,
    pub muted: bool,
}

impl BackendGroup {
    pub fn new(id: impl Into<GroupId>, stream_id: impl Into<StreamId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            name: name.into(),
            members: Vec::new(),
            muted: false,
        }
    }

    pub fn with_member(mut self, id: impl Into<ClientId>, name: impl Into<String>) -> Self {
        self.members.push(BackendMember::new(id, name));
        self
    }

    pub fn contains(&self, client: &ClientId) -> bool {
        self.members.iter().any(|m| &m.id == client)
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &ClientId> {
        self.members.iter().map(|m| &m.id)
    }
}

/// Full grouping topology of the backend at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Topology {
    pub groups: Vec<BackendGroup>,
}

impl Topology {
    pub fn new(groups: Vec<BackendGroup>) -> Self {
        Self { groups }
    }

    pub fn group(&self, id: &GroupId) -> Option<&BackendGroup> {
        self.groups.iter().find(|g| &g.id == id)
    }

    /// Backend-reported member entry for a client, wherever it lives
    pub fn member(&self, client: &ClientId) -> Option<&BackendMember> {
        self.groups
            .iter()
            .flat_map(|g| g.members.iter())
            .find(|m| &m.id == client)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn set_stream(&mut self, group: &GroupId, stream: &StreamId) {
        if let Some(g) = self.groups.iter_mut().find(|g| &g.id == group) {
            g.stream_id = stream.clone();
        }
    }

    pub fn set_name(&mut self, group: &GroupId, name: &str) {
        if let Some(g) = self.groups.iter_mut().find(|g| &g.id == group) {
            g.name = name.to_string();
        }
    }

    /// Make `clients` the exact membership of `group`
    ///
    /// Clients are moved out of whatever group held them before, since a
    /// client belongs to exactly one group. Evicted clients are dropped from
    /// this view; the backend decides where they land.
    pub fn set_clients(&mut self, group: &GroupId, clients: &[ClientId]) {
        let mut known: Vec<BackendMember> = Vec::with_capacity(clients.len());
        for client in clients {
            let name = self.member(client).map(|m| m.name.clone()).unwrap_or_default();
            known.push(BackendMember::new(client.clone(), name));
        }

        for g in self.groups.iter_mut() {
            if &g.id == group {
                g.members = known.clone();
            } else {
                g.members.retain(|m| !clients.contains(&m.id));
            }
        }
    }

    pub fn set_client_name(&mut self, client: &ClientId, name: &str) {
        for member in self.groups.iter_mut().flat_map(|g| g.members.iter_mut()) {
            if &member.id == client {
                member.name = name.to_string();
            }
        }
    }
}

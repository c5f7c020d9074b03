/// `loader/tree.rs` - the pack -> phase -> stage -> action tree
///
/// A node exists only once its script ran successfully under an existing
/// parent. Each node keeps its frozen scope plus the read-only Lua view
/// handed to its children, built once.
use std::collections::BTreeMap;

use mlua::Table;

use crate::scripting::FrozenTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorship {
    Npc,
    Player,
}

impl Authorship {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Npc => "npc",
            Self::Player => "player",
        }
    }
}

pub struct PackNode {
    pub result: FrozenTable,
    pub(crate) view: Table,
    pub phases: BTreeMap<String, PhaseNode>,
}

pub struct PhaseNode {
    pub result: FrozenTable,
    pub(crate) view: Table,
    pub stages: BTreeMap<String, StageNode>,
}

pub struct StageNode {
    pub result: FrozenTable,
    pub(crate) view: Table,
    pub actions: BTreeMap<String, ActionNode>,
}

#[derive(Debug, Clone)]
pub struct ActionNode {
    pub author: Authorship,
    pub result: FrozenTable,
}

impl PackNode {
    pub(crate) fn new(result: FrozenTable, view: Table) -> Self {
        Self {
            result,
            view,
            phases: BTreeMap::new(),
        }
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseNode> {
        self.phases.get(name)
    }

    pub fn stage(&self, phase: &str, stage: &str) -> Option<&StageNode> {
        self.phase(phase)?.stages.get(stage)
    }

    pub fn action(&self, phase: &str, stage: &str, action: &str) -> Option<&ActionNode> {
        self.stage(phase, stage)?.actions.get(action)
    }

    /// Diagnostic rendering of the whole tree.
    pub fn to_json(&self) -> serde_json::Value {
        let phases: serde_json::Map<_, _> = self
            .phases
            .iter()
            .map(|(name, phase)| (name.clone(), phase.to_json()))
            .collect();
        serde_json::json!({ "data": self.result.to_json(), "phases": phases })
    }
}

impl PhaseNode {
    pub(crate) fn new(result: FrozenTable, view: Table) -> Self {
        Self {
            result,
            view,
            stages: BTreeMap::new(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        let stages: serde_json::Map<_, _> = self
            .stages
            .iter()
            .map(|(name, stage)| (name.clone(), stage.to_json()))
            .collect();
        serde_json::json!({ "data": self.result.to_json(), "stages": stages })
    }
}

impl StageNode {
    pub(crate) fn new(result: FrozenTable, view: Table) -> Self {
        Self {
            result,
            view,
            actions: BTreeMap::new(),
        }
    }

    pub fn npc_actions(&self) -> impl Iterator<Item = (&String, &ActionNode)> {
        self.actions.iter().filter(|(_, a)| a.author == Authorship::Npc)
    }

    pub fn player_actions(&self) -> impl Iterator<Item = (&String, &ActionNode)> {
        self.actions.iter().filter(|(_, a)| a.author == Authorship::Player)
    }

    fn to_json(&self) -> serde_json::Value {
        let actions: serde_json::Map<_, _> = self
            .actions
            .iter()
            .map(|(name, action)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "author": action.author.dir_name(),
                        "data": action.result.to_json(),
                    }),
                )
            })
            .collect();
        serde_json::json!({ "data": self.result.to_json(), "actions": actions })
    }
}

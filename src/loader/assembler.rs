/// `loader/assembler.rs` - the load state machine
///
/// Consumes sorted entries one at a time. Each script runs in a fresh
/// sandbox bound with the shared `globals` table, frozen views of every
/// ancestor, and an empty scope named after its own level. After the run
/// the scope is snapshotted and becomes the new node.
use mlua::{Table, Value};

use super::{
    entry::{ContentEntry, EntryKind, EntryPayload, JsonObject},
    tree::{ActionNode, Authorship, PackNode, PhaseNode, StageNode},
};
use crate::{
    error::{LoadFault, ScriptError, StructuralFault},
    scripting::{FrozenTable, ScriptHost},
};

enum LoadState {
    AwaitingOptions,
    AwaitingPack,
    Loading(PackNode),
}

/// Everything collected by a successful forward pass.
pub struct RawPack {
    pub options: Option<JsonObject>,
    pub root: PackNode,
}

pub struct PackAssembler<'h> {
    host: &'h ScriptHost,
    budget: Option<u32>,
    globals: Table,
    options: Option<JsonObject>,
    state: LoadState,
}

impl<'h> PackAssembler<'h> {
    pub fn new(host: &'h ScriptHost, budget: Option<u32>) -> Result<Self, ScriptError> {
        Ok(Self {
            host,
            budget,
            globals: host.create_table()?,
            options: None,
            state: LoadState::AwaitingOptions,
        })
    }

    /// The table shared, unfrozen, with every script of this load.
    pub fn globals(&self) -> &Table {
        &self.globals
    }

    pub fn accept(&mut self, entry: ContentEntry) -> Result<(), LoadFault> {
        let path = entry.path().to_string();
        let structural = |fault| LoadFault::Structural {
            path: path.clone(),
            fault,
        };
        let kind = entry.kind();
        let params = entry.params().to_vec();

        let source = match entry.into_payload() {
            EntryPayload::Options(options) => {
                return match self.state {
                    LoadState::AwaitingOptions => {
                        self.options = Some(options);
                        self.state = LoadState::AwaitingPack;
                        Ok(())
                    }
                    LoadState::AwaitingPack => Err(structural(StructuralFault::DuplicateOptions)),
                    LoadState::Loading(_) => Err(structural(StructuralFault::OptionsAfterPack)),
                };
            }
            EntryPayload::Script(source) => source,
        };

        match kind {
            EntryKind::PackOptions => unreachable!("options entries carry an options payload"),
            EntryKind::PackData => {
                if matches!(self.state, LoadState::Loading(_)) {
                    return Err(structural(StructuralFault::DuplicatePack));
                }
                let (result, view) = self.run(&path, &source, &[], "pack")?;
                self.state = LoadState::Loading(PackNode::new(result, view));
            }
            EntryKind::PhaseData => {
                let phase = &params[0];
                let LoadState::Loading(pack) = &self.state else {
                    return Err(structural(StructuralFault::PackNotLoaded));
                };
                if pack.phases.contains_key(phase) {
                    return Err(structural(StructuralFault::DuplicatePhase(phase.clone())));
                }
                let parents = [("pack", &pack.view)];
                let (result, view) = self.run(&path, &source, &parents, "phase")?;
                if let LoadState::Loading(pack) = &mut self.state {
                    pack.phases.insert(phase.clone(), PhaseNode::new(result, view));
                }
            }
            EntryKind::StageData => {
                let (phase, stage) = (&params[0], &params[1]);
                let LoadState::Loading(pack) = &self.state else {
                    return Err(structural(StructuralFault::PackNotLoaded));
                };
                let Some(phase_node) = pack.phases.get(phase) else {
                    return Err(structural(StructuralFault::PhaseNotLoaded(phase.clone())));
                };
                if phase_node.stages.contains_key(stage) {
                    return Err(structural(StructuralFault::DuplicateStage {
                        phase: phase.clone(),
                        stage: stage.clone(),
                    }));
                }
                let parents = [("pack", &pack.view), ("phase", &phase_node.view)];
                let (result, view) = self.run(&path, &source, &parents, "stage")?;
                if let Some(phase_node) = self.pack_mut().and_then(|p| p.phases.get_mut(phase)) {
                    phase_node.stages.insert(stage.clone(), StageNode::new(result, view));
                }
            }
            EntryKind::NpcAction | EntryKind::PlayerAction => {
                let (phase, stage, action) = (&params[0], &params[1], &params[2]);
                let author = if kind == EntryKind::NpcAction {
                    Authorship::Npc
                } else {
                    Authorship::Player
                };
                let LoadState::Loading(pack) = &self.state else {
                    return Err(structural(StructuralFault::PackNotLoaded));
                };
                let Some(phase_node) = pack.phases.get(phase) else {
                    return Err(structural(StructuralFault::PhaseNotLoaded(phase.clone())));
                };
                let Some(stage_node) = phase_node.stages.get(stage) else {
                    return Err(structural(StructuralFault::StageNotLoaded {
                        phase: phase.clone(),
                        stage: stage.clone(),
                    }));
                };
                if stage_node.actions.contains_key(action) {
                    return Err(structural(StructuralFault::DuplicateAction {
                        phase: phase.clone(),
                        stage: stage.clone(),
                        action: action.clone(),
                    }));
                }
                let parents = [
                    ("pack", &pack.view),
                    ("phase", &phase_node.view),
                    ("stage", &stage_node.view),
                ];
                let (result, _) = self.run(&path, &source, &parents, "action")?;
                if let Some(stage_node) = self
                    .pack_mut()
                    .and_then(|p| p.phases.get_mut(phase))
                    .and_then(|p| p.stages.get_mut(stage))
                {
                    stage_node
                        .actions
                        .insert(action.clone(), ActionNode { author, result });
                }
            }
        }
        Ok(())
    }

    /// Terminal check: the pack must exist once every entry is consumed.
    pub fn finish(self) -> Result<RawPack, LoadFault> {
        match self.state {
            LoadState::Loading(root) => Ok(RawPack {
                options: self.options,
                root,
            }),
            _ => Err(LoadFault::Incomplete(StructuralFault::NoPackData)),
        }
    }

    fn pack_mut(&mut self) -> Option<&mut PackNode> {
        match &mut self.state {
            LoadState::Loading(pack) => Some(pack),
            _ => None,
        }
    }

    /// Execute one script and return its frozen scope plus the view its
    /// children will see.
    fn run(
        &self,
        path: &str,
        source: &[u8],
        parents: &[(&str, &Table)],
        scope: &str,
    ) -> Result<(FrozenTable, Table), LoadFault> {
        let fault = |source| LoadFault::Script {
            path: path.to_string(),
            source,
        };

        let mut bindings = Vec::with_capacity(parents.len() + 2);
        bindings.push(("globals", Value::Table(self.globals.clone())));
        for (name, view) in parents {
            bindings.push((*name, Value::Table((*view).clone())));
        }
        let fresh = self.host.create_table().map_err(fault)?;
        bindings.push((scope, Value::Table(fresh)));

        let sandbox = self.host.new_sandbox(bindings).map_err(fault)?;
        sandbox.execute(source, path, self.budget).map_err(fault)?;

        let result = sandbox.take_scope(scope, path).map_err(fault)?;
        let view = self.host.freeze(&result).map_err(fault)?;
        log::debug!("{path}: {scope} scope frozen with {} keys", result.len());
        Ok((result, view))
    }
}

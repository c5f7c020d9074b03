/// `loader/entry.rs` - archive entry classification and ordering
///
/// Entry kinds are a closed set, tried in declaration order against the
/// full entry path. The same order is the primary sort key, so a pack is
/// always processed options, pack, phases, stages, actions.
use std::{cmp::Ordering, sync::LazyLock};

use regex::Regex;

pub type JsonObject = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    PackOptions,
    PackData,
    PhaseData,
    StageData,
    NpcAction,
    PlayerAction,
}

static PATTERNS: LazyLock<[(EntryKind, Regex); 6]> = LazyLock::new(|| {
    // Names are ASCII word characters only.
    let pattern = |p: &str| Regex::new(&format!("^{p}$")).expect("entry pattern is valid");
    [
        (EntryKind::PackOptions, pattern(r"options\.json")),
        (EntryKind::PackData, pattern(r"pack\.lua")),
        (EntryKind::PhaseData, pattern(r"phases/([A-Za-z0-9_]+)\.lua")),
        (
            EntryKind::StageData,
            pattern(r"phases/([A-Za-z0-9_]+)/([A-Za-z0-9_]+)\.lua"),
        ),
        (
            EntryKind::NpcAction,
            pattern(r"phases/([A-Za-z0-9_]+)/([A-Za-z0-9_]+)/npc/([A-Za-z0-9_]+)\.lua"),
        ),
        (
            EntryKind::PlayerAction,
            pattern(r"phases/([A-Za-z0-9_]+)/([A-Za-z0-9_]+)/player/([A-Za-z0-9_]+)\.lua"),
        ),
    ]
});

impl EntryKind {
    pub const ALL: [EntryKind; 6] = [
        Self::PackOptions,
        Self::PackData,
        Self::PhaseData,
        Self::StageData,
        Self::NpcAction,
        Self::PlayerAction,
    ];

    /// Primary sort key. Both action kinds share a rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::PackOptions => 0,
            Self::PackData => 1,
            Self::PhaseData => 2,
            Self::StageData => 3,
            Self::NpcAction | Self::PlayerAction => 4,
        }
    }

    pub fn is_script(self) -> bool {
        self != Self::PackOptions
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PackOptions => "pack-options",
            Self::PackData => "pack-data",
            Self::PhaseData => "phase-data",
            Self::StageData => "stage-data",
            Self::NpcAction => "npc-action",
            Self::PlayerAction => "player-action",
        }
    }
}

/// Match `path` against every pattern in declaration order; the first
/// full match wins. Returns the kind and the captured names.
pub fn classify(path: &str) -> Option<(EntryKind, Vec<String>)> {
    PATTERNS.iter().find_map(|(kind, regex)| {
        regex.captures(path).map(|caps| {
            let params = caps
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str().to_string())
                .collect();
            (*kind, params)
        })
    })
}

// ── ContentEntry ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum EntryPayload {
    /// Parsed `options.json`, passed through to the pack builder.
    Options(JsonObject),
    /// Raw script source.
    Script(Vec<u8>),
}

/// One classified archive entry. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentEntry {
    kind: EntryKind,
    params: Vec<String>,
    path: String,
    payload: EntryPayload,
}

impl ContentEntry {
    pub(crate) fn new(
        kind: EntryKind,
        params: Vec<String>,
        path: impl Into<String>,
        payload: EntryPayload,
    ) -> Self {
        Self {
            kind,
            params,
            path: path.into(),
            payload,
        }
    }

    /// Classify `path` and attach a script body. `None` for paths that are
    /// not pack scripts.
    pub fn script(path: &str, source: impl Into<Vec<u8>>) -> Option<Self> {
        let (kind, params) = classify(path).filter(|(kind, _)| kind.is_script())?;
        Some(Self::new(kind, params, path, EntryPayload::Script(source.into())))
    }

    pub fn options(options: JsonObject) -> Self {
        Self::new(
            EntryKind::PackOptions,
            Vec::new(),
            "options.json",
            EntryPayload::Options(options),
        )
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn payload(&self) -> &EntryPayload {
        &self.payload
    }

    pub fn into_payload(self) -> EntryPayload {
        self.payload
    }

    pub fn phase(&self) -> Option<&str> {
        self.params.first().map(String::as_str)
    }

    pub fn stage(&self) -> Option<&str> {
        self.params.get(1).map(String::as_str)
    }

    pub fn action(&self) -> Option<&str> {
        self.params.get(2).map(String::as_str)
    }
}

/// Kind rank first, then the captured names in capture order.
pub fn compare(a: &ContentEntry, b: &ContentEntry) -> Ordering {
    a.kind
        .rank()
        .cmp(&b.kind.rank())
        .then_with(|| a.params.cmp(&b.params))
}

/// Stable sort into processing order.
pub fn sort_entries(entries: &mut [ContentEntry]) {
    entries.sort_by(compare);
}

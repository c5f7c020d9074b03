/// `loader/` - pack archive loading
///
/// archive bytes -> classified entries -> sorted -> one sandboxed script
/// per entry -> pack tree -> `PackBuilder`. Loading is strictly sequential:
/// every script depends on its parent's already-frozen output.
pub mod archive;
pub mod assembler;
pub mod builder;
pub mod entry;
pub mod tree;

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

pub use assembler::{PackAssembler, RawPack};
pub use builder::{DefaultPackBuilder, Pack, PackBuilder};
pub use entry::{classify, ContentEntry, EntryKind, EntryPayload, JsonObject};
pub use tree::{ActionNode, Authorship, PackNode, PhaseNode, StageNode};

use crate::{
    config::LoaderConfig,
    error::{LoadFault, LoaderError, ReadError},
    scripting::ScriptHost,
};

pub struct PackLoader<B = DefaultPackBuilder> {
    host: ScriptHost,
    config: LoaderConfig,
    builder: B,
}

impl PackLoader {
    pub fn new(config: LoaderConfig) -> Result<Self, LoaderError> {
        Self::with_builder(config, DefaultPackBuilder)
    }
}

impl<B: PackBuilder> PackLoader<B> {
    pub fn with_builder(config: LoaderConfig, builder: B) -> Result<Self, LoaderError> {
        let host = ScriptHost::with_memory_limit(config.memory_limit_bytes).map_err(|source| {
            LoadFault::Script {
                path: "<host>".into(),
                source,
            }
        })?;
        Ok(Self {
            host,
            config,
            builder,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn load_bytes(&self, bytes: &[u8]) -> Result<Pack, LoaderError> {
        self.load_reader(bytes)
    }

    pub fn load_file(&self, path: &Path) -> Result<Pack, LoaderError> {
        let file = File::open(path).map_err(ReadError::Io)?;
        self.load_reader(BufReader::new(file))
    }

    pub fn load_reader<R: BufRead>(&self, reader: R) -> Result<Pack, LoaderError> {
        let entries = archive::read_entries(reader, self.config.max_entry_bytes)?;
        log::debug!("{} pack entries read", entries.len());

        let raw = self.execute(entries)?;
        let phases = raw.root.phases.len();

        let pack = self.builder.build(raw, self.host.lua().clone())?;
        log::info!("pack loaded with {phases} phase(s)");
        Ok(pack)
    }

    /// Run already-sorted entries through a fresh assembler.
    pub fn execute(&self, entries: Vec<ContentEntry>) -> Result<RawPack, LoadFault> {
        let mut assembler =
            PackAssembler::new(&self.host, self.config.instruction_budget).map_err(|source| {
                LoadFault::Script {
                    path: "<globals>".into(),
                    source,
                }
            })?;
        for entry in entries {
            assembler.accept(entry)?;
        }
        assembler.finish()
    }
}

/// Load a pack archive with the default configuration.
pub fn load_pack(bytes: &[u8]) -> Result<Pack, LoaderError> {
    PackLoader::new(LoaderConfig::default())?.load_bytes(bytes)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;

    use flate2::{write::GzEncoder, Compression};

    pub enum TarItem<'a> {
        File(&'a str, &'a str),
        Dir(&'a str),
    }

    impl<'a> TarItem<'a> {
        pub fn file(path: &'a str, body: &'a str) -> Self {
            Self::File(path, body)
        }

        pub fn dir(path: &'a str) -> Self {
            Self::Dir(path)
        }
    }

    pub fn tar_archive(items: &[TarItem<'_>]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for item in items {
            let mut header = tar::Header::new_gnu();
            match item {
                TarItem::File(path, body) => {
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_size(body.len() as u64);
                    header.set_mode(0o644);
                    builder.append_data(&mut header, path, body.as_bytes()).unwrap();
                }
                TarItem::Dir(path) => {
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    builder.append_data(&mut header, path, std::io::empty()).unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    pub fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    /// Zip archive from `(path, body)` pairs; `None` bodies are directories.
    pub fn zip_archive(items: &[(&str, Option<&str>)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (path, body) in items {
            match body {
                Some(body) => {
                    writer.start_file(*path, options).unwrap();
                    writer.write_all(body.as_bytes()).unwrap();
                }
                None => writer.add_directory(*path, options).unwrap(),
            }
        }
        writer.finish().unwrap().into_inner()
    }

    /// Archive from `(path, body)` pairs, all regular files.
    pub fn pack(files: &[(&str, &str)]) -> Vec<u8> {
        let items: Vec<_> = files.iter().map(|(p, b)| TarItem::file(p, b)).collect();
        tar_archive(&items)
    }
}

#[cfg(test)]
mod tests {
    use super::{test_support::pack, *};
    use crate::{
        error::{LoadStage, StructuralFault},
        scripting::ScriptValue,
    };

    fn load(files: &[(&str, &str)]) -> Result<Pack, LoaderError> {
        load_pack(&pack(files))
    }

    fn structural(err: &LoaderError) -> &StructuralFault {
        match err {
            LoaderError::Executing(fault) => fault.structural().expect("structural fault"),
            other => panic!("expected an executing fault, got {other}"),
        }
    }

    #[test]
    fn pack_only_loads_with_no_phases() {
        let pack = load(&[("pack.lua", "return {}")]).unwrap();
        assert!(pack.root.phases.is_empty());
        assert!(pack.root.result.is_empty());
        assert!(pack.options.is_none());
    }

    #[test]
    fn full_hierarchy_loads() {
        let pack = load(&[
            ("phases/intro/start/npc/greet.lua", "action.line = stage.title .. '!'"),
            ("phases/intro/start.lua", "stage.title = phase.title .. '/start'"),
            ("phases/intro.lua", "phase.title = pack.title .. '/intro'"),
            ("pack.lua", "pack.title = 'demo'"),
        ])
        .unwrap();

        assert_eq!(pack.phase_names().collect::<Vec<_>>(), vec!["intro"]);
        let stage = pack.root.stage("intro", "start").unwrap();
        assert_eq!(stage.actions.len(), 1);

        let greet = pack.root.action("intro", "start", "greet").unwrap();
        assert_eq!(greet.author, Authorship::Npc);
        assert_eq!(
            greet.result.get("line").and_then(ScriptValue::as_str),
            Some("demo/intro/start!")
        );
        assert_eq!(stage.npc_actions().count(), 1);
        assert_eq!(stage.player_actions().count(), 0);
        assert!(format!("{pack:?}").contains("intro"));
    }

    #[test]
    fn options_are_passed_through() {
        let pack = load(&[
            ("options.json", r#"{"title": "Demo", "version": 2}"#),
            ("pack.lua", ""),
        ])
        .unwrap();
        let options = pack.options.as_ref().unwrap();
        assert_eq!(options["version"], 2);
        assert_eq!(pack.to_json()["options"]["title"], "Demo");
    }

    #[test]
    fn duplicate_phase_is_a_structural_fault() {
        let err = load(&[
            ("pack.lua", ""),
            ("phases/intro.lua", "phase.n = 1"),
            ("phases/intro.lua", "phase.n = 2"),
        ])
        .unwrap_err();
        assert_eq!(err.stage(), LoadStage::Executing);
        assert_eq!(structural(&err), &StructuralFault::DuplicatePhase("intro".into()));
        assert!(err.to_string().contains("intro"));
    }

    #[test]
    fn missing_stage_is_a_structural_fault() {
        let err = load(&[
            ("pack.lua", ""),
            ("phases/intro.lua", ""),
            ("phases/intro/start/npc/greet.lua", ""),
        ])
        .unwrap_err();
        assert_eq!(
            structural(&err),
            &StructuralFault::StageNotLoaded {
                phase: "intro".into(),
                stage: "start".into(),
            }
        );
        assert!(err.to_string().contains("phases/intro/start/npc/greet.lua"));
    }

    #[test]
    fn missing_phase_and_pack_are_structural_faults() {
        let err = load(&[("pack.lua", ""), ("phases/intro/start.lua", "")]).unwrap_err();
        assert_eq!(structural(&err), &StructuralFault::PhaseNotLoaded("intro".into()));

        let err = load(&[("phases/intro.lua", "")]).unwrap_err();
        assert_eq!(structural(&err), &StructuralFault::PackNotLoaded);
    }

    #[test]
    fn empty_archive_has_no_pack_data() {
        let err = load(&[("readme.txt", "hello")]).unwrap_err();
        assert_eq!(structural(&err), &StructuralFault::NoPackData);
    }

    #[test]
    fn duplicate_options_and_pack_are_rejected() {
        let err = load(&[("options.json", "{}"), ("options.json", "{}"), ("pack.lua", "")])
            .unwrap_err();
        assert_eq!(structural(&err), &StructuralFault::DuplicateOptions);

        let err = load(&[("pack.lua", ""), ("pack.lua", "")]).unwrap_err();
        assert_eq!(structural(&err), &StructuralFault::DuplicatePack);
    }

    #[test]
    fn same_action_name_across_authorship_is_a_duplicate() {
        let err = load(&[
            ("pack.lua", ""),
            ("phases/p.lua", ""),
            ("phases/p/s.lua", ""),
            ("phases/p/s/npc/greet.lua", ""),
            ("phases/p/s/player/greet.lua", ""),
        ])
        .unwrap_err();
        assert!(matches!(
            structural(&err),
            StructuralFault::DuplicateAction { action, .. } if action == "greet"
        ));
    }

    #[test]
    fn sibling_stages_and_actions_keep_their_own_names() {
        let pack = load(&[
            ("pack.lua", ""),
            ("phases/intro.lua", ""),
            ("phases/intro/start.lua", "stage.n = 1"),
            ("phases/intro/finale.lua", "stage.n = 2"),
            ("phases/intro/start/npc/greet.lua", ""),
            ("phases/intro/start/player/wave.lua", ""),
        ])
        .unwrap();
        let phase = pack.root.phase("intro").unwrap();
        let names: Vec<_> = phase.stages.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["finale", "start"]);

        let start = pack.root.stage("intro", "start").unwrap();
        let actions: Vec<_> = start.actions.keys().map(String::as_str).collect();
        assert_eq!(actions, vec!["greet", "wave"]);
        assert_eq!(start.actions["wave"].author, Authorship::Player);
    }

    #[test]
    fn globals_are_shared_and_mutable() {
        let pack = load(&[
            ("pack.lua", "globals.counter = 1"),
            ("phases/intro.lua", "globals.counter = globals.counter + 1 phase.seen = globals.counter"),
            ("phases/outro.lua", "phase.seen = globals.counter"),
        ])
        .unwrap();
        let seen = |p: &str| pack.root.phase(p).unwrap().result.get("seen").cloned();
        assert_eq!(seen("intro"), Some(ScriptValue::Integer(2)));
        assert_eq!(seen("outro"), Some(ScriptValue::Integer(2)));
    }

    #[test]
    fn parent_scopes_are_read_only_in_children() {
        let err = load(&[
            ("pack.lua", "pack.meta = { author = 'x' }"),
            ("phases/intro.lua", "pack.meta.author = 'y'"),
        ])
        .unwrap_err();
        let LoaderError::Executing(fault) = &err else {
            panic!("unexpected {err}");
        };
        let script = fault.script().expect("script fault");
        assert!(script.to_string().contains("read-only"), "{script}");
    }

    #[test]
    fn frozen_parent_data_is_a_snapshot() {
        let pack = load(&[
            ("pack.lua", "pack.list = { 1, 2 } globals.list = pack.list"),
            ("phases/intro.lua", "globals.list[3] = 3 phase.n = #pack.list"),
        ])
        .unwrap();
        let n = pack.root.phase("intro").unwrap().result.get("n").cloned();
        assert_eq!(n, Some(ScriptValue::Integer(2)));
        assert_eq!(pack.root.result.get("list").unwrap().as_table().unwrap().len(), 2);
    }

    #[test]
    fn runaway_scripts_abort_the_load() {
        let loader = PackLoader::new(LoaderConfig {
            instruction_budget: Some(10_000),
            ..LoaderConfig::default()
        })
        .unwrap();
        let err = loader
            .load_bytes(&pack(&[("pack.lua", "while true do end")]))
            .unwrap_err();
        let LoaderError::Executing(fault) = &err else {
            panic!("unexpected {err}");
        };
        assert!(fault.script().unwrap().is_resource_limit());
    }

    #[test]
    fn compile_errors_abort_the_load() {
        let err = load(&[("pack.lua", "pack.title = ")]).unwrap_err();
        let LoaderError::Executing(fault) = &err else {
            panic!("unexpected {err}");
        };
        assert!(fault.script().unwrap().is_compile());
    }

    #[test]
    fn reassigned_scope_must_stay_a_table() {
        let err = load(&[("pack.lua", "pack = 'oops'")]).unwrap_err();
        let LoaderError::Executing(fault) = &err else {
            panic!("unexpected {err}");
        };
        assert!(matches!(
            fault.script(),
            Some(crate::error::ScriptError::ScopeNotTable { .. })
        ));
    }

    #[test]
    fn reading_errors_carry_the_reading_stage() {
        let err = load(&[("options.json", "not json"), ("pack.lua", "")]).unwrap_err();
        assert_eq!(err.stage(), LoadStage::Reading);
    }

    #[test]
    fn rejected_builds_carry_the_building_stage() {
        struct Reject;
        impl PackBuilder for Reject {
            fn build(&self, _: RawPack, _: mlua::Lua) -> Result<Pack, crate::error::BuildError> {
                Err(crate::error::BuildError("no phases".into()))
            }
        }
        let loader = PackLoader::with_builder(LoaderConfig::default(), Reject).unwrap();
        let err = loader.load_bytes(&pack(&[("pack.lua", "")])).unwrap_err();
        assert_eq!(err.stage(), LoadStage::Building);
    }

    #[test]
    fn stored_functions_survive_the_load() {
        let pack = load(&[
            ("pack.lua", "pack.greet = function(name) return 'hi ' .. name end"),
            ("phases/intro.lua", "phase.msg = pack.greet('intro')"),
        ])
        .unwrap();
        let msg = pack.root.phase("intro").unwrap().result.get("msg").cloned();
        assert_eq!(msg, Some(ScriptValue::String("hi intro".into())));

        let Some(ScriptValue::Function(greet)) = pack.root.result.get("greet") else {
            panic!("greet is not a function");
        };
        assert_eq!(greet.call::<String>("host").unwrap(), "hi host");
    }

    #[test]
    fn string_arithmetic_works_in_pack_scripts() {
        let pack = load(&[
            ("pack.lua", "pack.n = '2' * 3"),
            ("phases/intro.lua", "phase.total = pack.n + '10'"),
        ])
        .unwrap();
        assert_eq!(pack.root.result.get("n"), Some(&ScriptValue::Integer(6)));
        let total = pack.root.phase("intro").unwrap().result.get("total").cloned();
        assert_eq!(total, Some(ScriptValue::Integer(16)));
    }

    #[test]
    fn inherited_functions_run_under_the_callers_budget() {
        let loader = PackLoader::new(LoaderConfig {
            instruction_budget: Some(10_000),
            ..LoaderConfig::default()
        })
        .unwrap();
        let spin = "pack.spin = function() \
            while true do pcall(function() while true do end end) end end";
        let err = loader
            .load_bytes(&pack(&[("pack.lua", spin), ("phases/intro.lua", "pack.spin()")]))
            .unwrap_err();
        let LoaderError::Executing(LoadFault::Script { path, source }) = &err else {
            panic!("unexpected {err}");
        };
        assert_eq!(path, "phases/intro.lua");
        assert!(source.is_resource_limit(), "{source}");
    }

    #[test]
    fn zip_packs_load_end_to_end() {
        let bytes = test_support::zip_archive(&[
            ("pack.lua", Some("pack.title = 'demo'")),
            ("phases/", None),
            ("phases/intro.lua", Some("phase.title = pack.title")),
            ("phases/intro/start.lua", Some("")),
            ("phases/intro/start/player/wave.lua", Some("action.ok = true")),
        ]);
        let pack = load_pack(&bytes).unwrap();
        let wave = pack.root.action("intro", "start", "wave").unwrap();
        assert_eq!(wave.author, Authorship::Player);
        assert_eq!(wave.result.get("ok"), Some(&ScriptValue::Boolean(true)));
    }

    #[test]
    fn empty_zip_has_no_pack_data() {
        let err = load_pack(&test_support::zip_archive(&[])).unwrap_err();
        assert_eq!(err.stage(), LoadStage::Executing);
        assert_eq!(structural(&err), &StructuralFault::NoPackData);
    }
}

//! Reading and writing whole profiles, on disk and in memory.

use autofdo::profile::gcov::{GcovWriter, GCOV_TAG_AFDO_FUNCTION};
use autofdo::profile::summary::NUM_WORKING_SETS;
use autofdo::profile::{
    location_key, read_profile, read_profile_file, ByteOrder, CountInfo, FunctionInstance,
    ModuleInfo, Profile, ProfileWriter, StringTable, WorkingSetEntry, MAX_INLINE_DEPTH,
};
use autofdo::ProfileError;
use proptest::prelude::*;

fn sample_profile() -> Profile {
    let mut profile = Profile::new();
    let main = profile.strings.intern("main");
    let work = profile.strings.intern("work.constprop.0");
    let leaf = profile.strings.intern("leaf");

    let mut leaf_inst = FunctionInstance::new(leaf, 0);
    leaf_inst.add_position(location_key(1, 0), CountInfo::new(10));

    let mut work_inst = FunctionInstance::new(work, 0);
    work_inst.add_position(location_key(2, 1), CountInfo::new(25).with_target(leaf, 7));
    work_inst.add_callsite(location_key(3, 0), leaf_inst);

    let mut root = FunctionInstance::new(main, 4);
    root.add_position(location_key(1, 0), CountInfo::new(40));
    root.add_callsite(location_key(5, 2), work_inst);
    profile.add_root(root);

    let mut module = ModuleInfo::new("src/main.c", 1);
    module.exported = 1;
    module.aux_modules = vec!["src/work.c".into()];
    module.cl_args = vec!["-O2".into(), "-std=c11".into()];
    profile.modules.insert(module);
    profile.modules.insert(ModuleInfo::new("src/work.c", 1));

    profile.summary.working_set[NUM_WORKING_SETS - 1] = WorkingSetEntry {
        num_counters: 3,
        min_counter: 10,
    };
    profile
}

fn assert_same_instance(a: &FunctionInstance, b: &FunctionInstance) {
    assert_eq!(a.name(), b.name());
    assert_eq!(a.head_count(), b.head_count());
    assert_eq!(a.total_count(), b.total_count());
    assert_eq!(a.positions().len(), b.positions().len());
    for ((ka, pa), (kb, pb)) in a.positions().iter().zip(b.positions()) {
        assert_eq!(ka, kb);
        assert_eq!(pa.count, pb.count);
        assert_eq!(pa.targets, pb.targets);
    }
    assert_eq!(a.callsites().len(), b.callsites().len());
    for ((ka, ca), (kb, cb)) in a.callsites().iter().zip(b.callsites()) {
        assert_eq!(ka, kb);
        assert_same_instance(ca, cb);
    }
}

#[test]
fn round_trip_through_file() {
    let original = sample_profile();
    for order in [ByteOrder::Little, ByteOrder::Big] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fbdata.afdo");
        ProfileWriter::new(order).write(&original, &path).unwrap();

        let read = read_profile_file(&path).unwrap();
        assert_eq!(read.strings.len(), 3);
        // Names are stored normalized.
        assert_eq!(read.strings.get_name(1), Some("work"));
        assert_eq!(read.source.len(), 1);
        let root = read.root_by_name("main").unwrap();
        assert_eq!(root.total_count(), 75);
        assert_same_instance(root, original.root_by_name("main").unwrap());

        assert_eq!(read.summary.runs, 1);
        assert_eq!(read.summary.sum_all, 75);
        assert_eq!(read.summary.hot_count_threshold(999), 10);

        let main = read.modules.get_module("src/main.c").unwrap();
        assert_eq!(main.ident, 1);
        assert_eq!(main.aux_modules, vec!["src/work.c".to_string()]);
        assert_eq!(main.cl_args.len(), 2);
        assert_eq!(read.modules.get_module("src/work.c").unwrap().ident, 2);
    }
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_profile_file(&dir.path().join("absent.afdo")).unwrap_err();
    assert!(matches!(err, ProfileError::MissingProfileFile { .. }));
    assert!(!err.is_malformed());
    assert_eq!(err.code(), "AFDO0001");
}

#[test]
fn bad_magic_is_malformed() {
    let mut bytes = ProfileWriter::default().to_bytes(&sample_profile());
    bytes[0] ^= 0xff;
    let err = read_profile(&bytes).unwrap_err();
    assert!(matches!(err, ProfileError::BadMagic { .. }));
    assert!(err.is_malformed());
}

#[test]
fn every_truncation_is_rejected() {
    let bytes = ProfileWriter::default().to_bytes(&sample_profile());
    for len in (0..bytes.len()).step_by(4) {
        let err = read_profile(&bytes[..len]).unwrap_err();
        assert!(err.is_malformed(), "prefix of {} bytes: {}", len, err);
    }
    assert!(read_profile(&bytes).is_ok());
}

#[test]
fn sections_out_of_order_are_rejected() {
    let profile = sample_profile();
    let mut writer = autofdo::profile::gcov::GcovWriter::new(ByteOrder::Little);
    profile.source.write(&mut writer);
    profile.strings.write(&mut writer);
    let err = read_profile(&writer.into_bytes()).unwrap_err();
    assert!(matches!(err, ProfileError::UnexpectedTag { .. }));

    let diagnostic = err.to_diagnostic("fbdata.afdo");
    assert!(diagnostic.is_error());
    assert_eq!(diagnostic.code.as_deref(), Some("AFDO0003"));
}

/// Image whose only root has a chain of `levels` inlined callees below it.
fn nested_image(levels: usize) -> Vec<u8> {
    let mut strings = StringTable::new();
    strings.intern("f");
    let mut writer = GcovWriter::new(ByteOrder::Little);
    strings.write(&mut writer);
    let at = writer.begin_section(GCOV_TAG_AFDO_FUNCTION);
    writer.write_unsigned(1);
    writer.write_counter(1);
    for _ in 0..levels {
        // name, positions, callsites, then the callsite key
        writer.write_unsigned(0);
        writer.write_unsigned(0);
        writer.write_unsigned(1);
        writer.write_unsigned(location_key(1, 0));
    }
    writer.write_unsigned(0);
    writer.write_unsigned(1);
    writer.write_unsigned(0);
    writer.write_unsigned(location_key(0, 0));
    writer.write_unsigned(0);
    writer.write_counter(7);
    writer.end_section(at);
    Profile::new().modules.write(&mut writer);
    Profile::new().summary.write_working_set(&mut writer);
    writer.into_bytes()
}

#[test]
fn nesting_up_to_the_limit_is_read() {
    let profile = read_profile(&nested_image(MAX_INLINE_DEPTH)).unwrap();
    let mut instance = profile.source.root(0).unwrap();
    let mut depth = 0;
    while let Some(child) = instance.child(location_key(1, 0)) {
        assert_eq!(child.total_count(), 7);
        instance = child;
        depth += 1;
    }
    assert_eq!(depth, MAX_INLINE_DEPTH);
    assert_eq!(profile.summary.sum_all, 7);
}

#[test]
fn deep_nesting_is_rejected_without_recursing() {
    let bytes = nested_image(200_000);
    let err = read_profile(&bytes).unwrap_err();
    assert!(matches!(err, ProfileError::InlineTooDeep { .. }));
    assert!(err.is_malformed());
    assert_eq!(err.code(), "AFDO0007");

    // A truncated copy fails the same way before reaching the cut.
    let err = read_profile(&bytes[..bytes.len() / 2]).unwrap_err();
    assert!(matches!(err, ProfileError::InlineTooDeep { .. }));
}

#[test]
fn wide_indirect_target_is_rejected() {
    let mut strings = StringTable::new();
    strings.intern("f");
    let mut writer = GcovWriter::new(ByteOrder::Big);
    strings.write(&mut writer);
    let at = writer.begin_section(GCOV_TAG_AFDO_FUNCTION);
    writer.write_unsigned(1);
    writer.write_counter(1);
    writer.write_unsigned(0);
    writer.write_unsigned(1);
    writer.write_unsigned(0);
    writer.write_unsigned(location_key(2, 0));
    writer.write_unsigned(1);
    writer.write_counter(40);
    writer.write_unsigned(0);
    writer.write_counter(1 << 40);
    writer.write_counter(40);
    writer.end_section(at);

    let err = read_profile(&writer.into_bytes()).unwrap_err();
    match err {
        ProfileError::InvalidTarget { target, .. } => assert_eq!(target, 1 << 40),
        other => panic!("unexpected error: {}", other),
    }
}

/// A small random forest: (position counts, children) per node.
#[derive(Debug, Clone)]
struct Shape {
    counts: Vec<u64>,
    children: Vec<Shape>,
}

fn shape() -> impl Strategy<Value = Shape> {
    let leaf = prop::collection::vec(0u64..1_000, 0..4).prop_map(|counts| Shape {
        counts,
        children: Vec::new(),
    });
    leaf.prop_recursive(3, 24, 3, |inner| {
        (
            prop::collection::vec(0u64..1_000, 0..4),
            prop::collection::vec(inner, 0..3),
        )
            .prop_map(|(counts, children)| Shape { counts, children })
    })
}

fn build(shape: &Shape, name: u32) -> FunctionInstance {
    let mut instance = FunctionInstance::new(name, 0);
    for (i, &count) in shape.counts.iter().enumerate() {
        instance.add_position(location_key(i as u32, 0), CountInfo::new(count));
    }
    for (i, child) in shape.children.iter().enumerate() {
        instance.add_callsite(location_key(100 + i as u32, 0), build(child, name + 1));
    }
    instance
}

fn subtree_sum(instance: &FunctionInstance) -> u64 {
    instance.positions().values().map(|p| p.count).sum::<u64>()
        + instance.callsites().values().map(subtree_sum).sum::<u64>()
}

fn check_totals(instance: &FunctionInstance) {
    assert_eq!(instance.total_count(), subtree_sum(instance));
    instance.callsites().values().for_each(check_totals);
}

proptest! {
    #[test]
    fn forest_totals_match_position_sums(shape in shape()) {
        let mut profile = Profile::new();
        for name in ["a", "b", "c", "d", "e"] {
            profile.strings.intern(name);
        }
        profile.add_root(build(&shape, 0));

        let bytes = ProfileWriter::default().to_bytes(&profile);
        let read = read_profile(&bytes).unwrap();
        let root = read.source.root(0).unwrap();
        check_totals(root);
        prop_assert_eq!(root.total_count(), subtree_sum(profile.source.root(0).unwrap()));
        prop_assert_eq!(read.summary.sum_all, root.total_count());
    }
}

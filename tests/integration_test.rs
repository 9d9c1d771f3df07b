use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::sync::Arc;
use tempfile::NamedTempFile;
use voxstream::{
    convert_path, AxisOrder, Block, BlockSink, BlockSource, BlockState, Boundary, FormatHint,
    Position, SchematicFormat, VoxelError, WriteOptions,
};

/// 16×5×16: a log column whose axis cycles with height, wrapped in leaves.
fn tree() -> (Boundary, Vec<Block>) {
    let boundary = Boundary::new(Position::new(0, 0, 0), 16, 5, 16);
    let axes = ["x", "y", "z"];
    let logs: Vec<Arc<BlockState>> = axes
        .iter()
        .map(|a| Arc::new(BlockState::from_name("minecraft:oak_log").with_property("axis", *a)))
        .collect();
    let mut blocks = Vec::new();
    for p in boundary.iter(AxisOrder::YZX) {
        let (dx, dy, dz) = (p.x - 8, p.y - 2, p.z - 8);
        if dx == 0 && dz == 0 {
            blocks.push(Block::new(p, logs[p.y as usize % 3].clone()));
        } else if dx * dx + dy * dy + dz * dz <= 10 {
            let distance = dx.abs().max(dz.abs()).min(7);
            let leaves = BlockState::from_name("minecraft:oak_leaves")
                .with_property("distance", distance.to_string())
                .with_property("persistent", (p.y % 2 == 0).to_string());
            blocks.push(Block::new(p, Arc::new(leaves)));
        }
    }
    (boundary, blocks)
}

fn write_file(format: SchematicFormat, boundary: Option<Boundary>, blocks: &[Block]) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    let sink = BlockSink::create_path(file.path(), format, boundary, &WriteOptions::default()).unwrap();
    sink.write(blocks, 0, blocks.len()).unwrap();
    sink.close().unwrap();
    file
}

fn by_position(blocks: &[Block]) -> BTreeMap<Position, Arc<BlockState>> {
    blocks.iter().map(|b| (b.position, b.state.clone())).collect()
}

fn read_all(file: &NamedTempFile, hint: FormatHint) -> (SchematicFormat, Boundary, Vec<Block>) {
    let source = BlockSource::open_path(file.path(), hint).unwrap();
    let blocks = source.read_to_end().unwrap();
    let result = (source.format(), source.boundary(), blocks);
    source.close();
    result
}

#[test]
fn tree_survives_vxl_sponge_structure_vxl() {
    let (boundary, blocks) = tree();
    let expected = by_position(&blocks);
    let options = WriteOptions::default();

    let vxl = write_file(SchematicFormat::Vxl, Some(boundary), &blocks);
    let sponge = NamedTempFile::new().unwrap();
    let structure = NamedTempFile::new().unwrap();
    let back = NamedTempFile::new().unwrap();

    let hops = [
        (&vxl, &sponge, SchematicFormat::SpongeV3),
        (&sponge, &structure, SchematicFormat::Structure),
        (&structure, &back, SchematicFormat::Vxl),
    ];
    for (from, to, target) in hops {
        let stats = convert_path(from.path(), to.path(), FormatHint::AutoDetect, target, &options, 64).unwrap();
        assert_eq!(stats.blocks, blocks.len() as u64, "{target}");

        let (format, b, decoded) = read_all(to, FormatHint::AutoDetect);
        assert_eq!(format, target);
        assert_eq!(b, boundary, "{target}");
        assert_eq!(decoded.len(), blocks.len(), "{target}");
        assert_eq!(by_position(&decoded), expected, "{target}");
    }

    // Same body order end to end, so the final VXL is the original file.
    assert_eq!(fs::read(back.path()).unwrap(), fs::read(vxl.path()).unwrap());
}

#[test]
fn output_does_not_depend_on_buffer_size() {
    let (boundary, blocks) = tree();
    let vxl = write_file(SchematicFormat::Vxl, Some(boundary), &blocks);
    for target in SchematicFormat::ALL {
        let outputs: Vec<Vec<u8>> = [1, 7, 4096]
            .into_iter()
            .map(|size| {
                let out = NamedTempFile::new().unwrap();
                convert_path(vxl.path(), out.path(), FormatHint::AutoDetect, target, &WriteOptions::default(), size)
                    .unwrap();
                fs::read(out.path()).unwrap()
            })
            .collect();
        assert!(!outputs[0].is_empty(), "{target}");
        assert_eq!(outputs[0], outputs[1], "{target}");
        assert_eq!(outputs[0], outputs[2], "{target}");
    }
}

#[test]
fn litematic_must_be_named_to_be_read() {
    let (boundary, blocks) = tree();
    let file = write_file(SchematicFormat::Litematic, Some(boundary), &blocks);
    assert!(matches!(
        BlockSource::open_path(file.path(), FormatHint::AutoDetect),
        Err(VoxelError::UnrecognizedFormat)
    ));
    let (format, b, decoded) = read_all(&file, FormatHint::Exact(SchematicFormat::Litematic));
    assert_eq!(format, SchematicFormat::Litematic);
    assert_eq!(b, boundary);
    assert_eq!(decoded, blocks);
}

#[test]
fn end_of_data_is_reported_after_every_block_and_then_repeats() {
    let (boundary, blocks) = tree();
    let file = write_file(SchematicFormat::McEdit, Some(boundary), &blocks);
    let source = BlockSource::open_path(file.path(), FormatHint::AutoDetect).unwrap();
    let mut buffer = vec![Block::default(); 33];
    let mut seen = 0;
    while let Some(n) = source.read(&mut buffer, 0, 33).unwrap() {
        assert!(n > 0);
        seen += n;
    }
    assert_eq!(seen, blocks.len());
    for _ in 0..3 {
        assert_eq!(source.read(&mut buffer, 0, 33).unwrap(), None);
    }
    source.close();
}

#[test]
fn missing_boundary_leaves_output_empty() {
    let file = NamedTempFile::new().unwrap();
    for format in SchematicFormat::ALL.into_iter().filter(|f| f.writer_requires_boundary()) {
        let handle = File::create(file.path()).unwrap();
        let err = BlockSink::open(handle, format, None).err();
        assert!(matches!(err, Some(VoxelError::MissingBoundary(f)) if f == format));

        let err = BlockSink::create_path(file.path(), format, None, &WriteOptions::default()).err();
        assert!(matches!(err, Some(VoxelError::MissingBoundary(_))));
        assert_eq!(fs::metadata(file.path()).unwrap().len(), 0, "{format}");
    }
}

#[test]
fn closing_twice_is_harmless() {
    let (boundary, blocks) = tree();
    let file = NamedTempFile::new().unwrap();
    let sink = BlockSink::create_path(file.path(), SchematicFormat::SpongeV2, Some(boundary), &WriteOptions::default())
        .unwrap();
    sink.write(&blocks, 0, blocks.len()).unwrap();
    sink.close().unwrap();
    let written = fs::read(file.path()).unwrap();
    sink.close().unwrap();
    assert!(sink.is_closed());
    assert_eq!(fs::read(file.path()).unwrap(), written);

    let source = BlockSource::open_path(file.path(), FormatHint::AutoDetect).unwrap();
    source.close();
    source.close();
    let mut buffer = vec![Block::default(); 4];
    assert!(matches!(source.read(&mut buffer, 0, 4), Err(VoxelError::AlreadyClosed)));
}

#[test]
fn unanchored_structure_converts_to_dense_formats() {
    // Structure files are origin-anchored, so a region written without a
    // boundary comes back shifted by its minimum corner.
    let (_, blocks) = tree();
    let min = blocks.iter().fold(Boundary::empty(), |b, block| b.expand_to_include(block.position)).min();
    let shifted: Vec<Block> = blocks
        .iter()
        .map(|b| {
            let p = b.position;
            Block::new(Position::new(p.x - min.x, p.y - min.y, p.z - min.z), b.state.clone())
        })
        .collect();

    let structure = write_file(SchematicFormat::Structure, None, &blocks);
    for target in [SchematicFormat::SpongeV1, SchematicFormat::McEdit, SchematicFormat::Vxl] {
        let out = NamedTempFile::new().unwrap();
        convert_path(structure.path(), out.path(), FormatHint::AutoDetect, target, &WriteOptions::default(), 100)
            .unwrap();
        let (_, boundary, decoded) = read_all(&out, FormatHint::AutoDetect);
        assert_eq!(boundary.min(), Position::default(), "{target}");
        assert_eq!(by_position(&decoded), by_position(&shifted), "{target}");
    }
}

fn sparse_blocks() -> impl Strategy<Value = Vec<Block>> {
    let names = ["minecraft:stone", "minecraft:glass", "minecraft:dirt"];
    prop::collection::vec((0..6i32, 0..4i32, 0..6i32, 0..3usize), 1..60).prop_map(move |cells| {
        cells
            .into_iter()
            .map(|(x, y, z, s)| Block::new(Position::new(x, y, z), Arc::new(BlockState::from_name(names[s]))))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn batch_size_never_changes_the_bytes(blocks in sparse_blocks(), size in 1usize..20) {
        let structure = write_file(SchematicFormat::Structure, None, &blocks);
        let convert_with = |n: usize| {
            let out = NamedTempFile::new().unwrap();
            convert_path(structure.path(), out.path(), FormatHint::AutoDetect, SchematicFormat::Vxl, &WriteOptions::default(), n)
                .unwrap();
            fs::read(out.path()).unwrap()
        };
        prop_assert_eq!(convert_with(size), convert_with(4096));
    }
}

//! End-to-end container tests: convert a flat volume, reopen it, and
//! check every property a consumer relies on — exact brick content,
//! layout neutrality, checksum sensitivity, and per-brick corruption
//! isolation.

use brickvol::{
    BrickExtent, BrickOrdering, ChecksumKind, CompressionLevel, CompressionMethod, ConvertConfig,
    Converter, Domain, ElementKind, ElementType, MemorySource, VolumeAccess, VolumeError,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Deterministic pseudo-random bytes from a simple LCG
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

fn u8_domain(sizes: Vec<u64>) -> Domain {
    Domain::new(sizes, ElementType::scalar(ElementKind::U8)).unwrap()
}

async fn convert(
    data: Vec<u8>,
    domain: Domain,
    config: ConvertConfig,
    dir: &tempfile::TempDir,
    name: &str,
) -> PathBuf {
    let dest = dir.path().join(name);
    Converter::new(config)
        .convert(Arc::new(MemorySource::new(data)), domain, &dest)
        .await
        .unwrap();
    dest
}

/// Gather the expected bytes of a brick straight from the flat source
fn expected_brick(data: &[u8], size: &[u64], extent: &BrickExtent) -> Vec<u8> {
    let rank = size.len();
    let mut strides = vec![1u64; rank];
    for i in (0..rank - 1).rev() {
        strides[i] = strides[i + 1] * size[i + 1];
    }

    let mut out = Vec::new();
    let mut coord = extent.min.clone();
    loop {
        let row_start: u64 = coord
            .iter()
            .take(rank - 1)
            .zip(strides.iter())
            .map(|(c, s)| c * s)
            .sum();
        out.extend_from_slice(
            &data[(row_start + extent.min[rank - 1]) as usize
                ..(row_start + extent.max[rank - 1]) as usize],
        );

        // Advance the outer coordinates
        let mut axis = rank - 1;
        loop {
            if axis == 0 {
                return out;
            }
            axis -= 1;
            coord[axis] += 1;
            if coord[axis] < extent.max[axis] {
                break;
            }
            coord[axis] = extent.min[axis];
        }
    }
}

#[tokio::test]
async fn end_to_end_256_cubed() {
    let data = pseudo_random_bytes(256 * 256 * 256, 0xBEEF);
    let dir = tempfile::tempdir().unwrap();
    let config = ConvertConfig::default()
        .with_brick_size(64)
        .with_overlap(2)
        .with_compression(CompressionMethod::Zlib, CompressionLevel::new(5))
        .with_ordering(BrickOrdering::Scanline);
    let path = convert(data.clone(), u8_domain(vec![256, 256, 256]), config, &dir, "e2e.bvf").await;

    let (volume, warning) = VolumeAccess::open_verified(&path).await.unwrap();
    assert!(warning.is_none(), "fresh file must verify cleanly");

    // ceil(log2(256/64)) + 1 = 3 levels with grids 4^3, 2^3, 1^3
    assert_eq!(volume.lod_count(), 3);
    assert_eq!(volume.layout().brick_grid(0), vec![4, 4, 4]);
    assert_eq!(volume.layout().brick_grid(1), vec![2, 2, 2]);
    assert_eq!(volume.layout().brick_grid(2), vec![1, 1, 1]);

    // Every finest-level brick decompresses to the exact source bytes
    for index in 0..64 {
        let extent = volume.brick_extent(0, index).unwrap();
        let brick = volume.brick(0, index).await.unwrap();
        assert_eq!(
            &brick[..],
            &expected_brick(&data, &[256, 256, 256], &extent)[..],
            "brick {} content mismatch",
            index
        );
    }

    // Statistics blocks are present and consistent
    let range = volume.value_range(0).unwrap();
    assert!(range.min >= 0.0 && range.max <= 255.0 && range.min <= range.max);
    let histogram = volume.histogram().unwrap();
    assert_eq!(histogram.iter().sum::<u64>(), 256 * 256 * 256);
    assert!(volume.metadata("created").is_some());
    assert_eq!(volume.metadata("downsample-filter"), Some("average"));
}

#[tokio::test]
async fn lod_level_is_truncated_window_mean() {
    // 4^3 volume of distinct values, brick 2, no overlap: level 1 is a
    // single 2^3 brick whose voxels are the truncated means of 2x2x2
    // windows.
    let data: Vec<u8> = (0..64).collect();
    let dir = tempfile::tempdir().unwrap();
    let config = ConvertConfig::default()
        .with_brick_size(2)
        .with_overlap(0)
        .with_checksum(ChecksumKind::Crc32);
    let path = convert(data, u8_domain(vec![4, 4, 4]), config, &dir, "lod.bvf").await;

    let volume = VolumeAccess::open(&path).await.unwrap();
    assert_eq!(volume.lod_count(), 2);

    let coarse = volume.brick(1, 0).await.unwrap();
    let mut expected = Vec::new();
    for i in 0..2u64 {
        for j in 0..2u64 {
            for k in 0..2u64 {
                // mean = 32i + 8j + 2k + 10.5, truncated (not rounded)
                expected.push((32 * i + 8 * j + 2 * k + 10) as u8);
            }
        }
    }
    assert_eq!(&coarse[..], &expected[..]);
}

#[tokio::test]
async fn layout_neutrality_across_orderings() {
    let data = pseudo_random_bytes(32 * 32 * 32, 42);
    let dir = tempfile::tempdir().unwrap();

    let orderings = [
        ("scanline", BrickOrdering::Scanline),
        ("morton", BrickOrdering::Morton),
        ("hilbert", BrickOrdering::Hilbert),
        ("random", BrickOrdering::Random { seed: 1234 }),
    ];

    let mut volumes = Vec::new();
    for (name, ordering) in orderings {
        let config = ConvertConfig::default()
            .with_brick_size(16)
            .with_overlap(2)
            .with_compression(CompressionMethod::Lz4, CompressionLevel::default())
            .with_ordering(ordering);
        let path = convert(
            data.clone(),
            u8_domain(vec![32, 32, 32]),
            config,
            &dir,
            &format!("{}.bvf", name),
        )
        .await;
        volumes.push(VolumeAccess::open(&path).await.unwrap());
    }

    // Logical reads are identical no matter the physical order
    for lod in 0..volumes[0].lod_count() {
        for index in 0..volumes[0].layout().brick_count(lod) {
            let reference = volumes[0].brick(lod, index).await.unwrap();
            for volume in &volumes[1..] {
                assert_eq!(
                    reference,
                    volume.brick(lod, index).await.unwrap(),
                    "lod {} brick {} differs across orderings",
                    lod,
                    index
                );
            }
        }
    }
}

#[tokio::test]
async fn identical_input_and_seed_reproduce_identical_files() {
    let data = pseudo_random_bytes(32 * 32 * 32, 7);
    let dir = tempfile::tempdir().unwrap();
    let config = || {
        ConvertConfig::default()
            .with_brick_size(16)
            .with_ordering(BrickOrdering::Random { seed: 99 })
            .with_compression(CompressionMethod::Zlib, CompressionLevel::new(3))
    };

    let a = convert(data.clone(), u8_domain(vec![32, 32, 32]), config(), &dir, "a.bvf").await;
    let b = convert(data.clone(), u8_domain(vec![32, 32, 32]), config(), &dir, "b.bvf").await;

    let bytes_a = std::fs::read(&a).unwrap();
    let bytes_b = std::fs::read(&b).unwrap();
    // The key/value block carries a creation timestamp; everything before
    // it (header, data region, TOC, statistics) must be byte-identical.
    let kv_prefix_a = bytes_a.len() - key_value_block_len(&bytes_a);
    let kv_prefix_b = bytes_b.len() - key_value_block_len(&bytes_b);
    assert_eq!(kv_prefix_a, kv_prefix_b);
    // Skip the header digest (it hashes the timestamp too)
    assert_eq!(bytes_a[38..kv_prefix_a], bytes_b[38..kv_prefix_b]);
}

/// Length of the trailing key/value block (prefix included)
fn key_value_block_len(file: &[u8]) -> usize {
    // Walk blocks from the first one after the header (MD5 header = 38
    // bytes) and return the size of the last block, which conversion
    // always writes as KeyValue.
    let mut pos = 38usize;
    let mut last = 0usize;
    while pos < file.len() {
        let len = u64::from_le_bytes(file[pos + 1..pos + 9].try_into().unwrap()) as usize;
        last = 9 + len;
        pos += last;
    }
    last
}

#[tokio::test]
async fn checksum_detects_any_data_flip() {
    let data = pseudo_random_bytes(32 * 32 * 32, 3);
    let dir = tempfile::tempdir().unwrap();
    let config = ConvertConfig::default().with_brick_size(16);
    let path = convert(data, u8_domain(vec![32, 32, 32]), config, &dir, "flip.bvf").await;

    // Flip one byte inside the data region (header is 38 bytes, data
    // block prefix 9 more).
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[100] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let (volume, warning) = VolumeAccess::open_verified(&path).await.unwrap();
    match warning {
        Some(VolumeError::ChecksumMismatch { .. }) => {}
        other => panic!("expected checksum warning, got {:?}", other),
    }
    // The mismatch is a warning: the file stays open and readable
    assert!(volume.brick(0, 0).await.is_ok());
}

#[tokio::test]
async fn corrupt_brick_stays_local() {
    let data = pseudo_random_bytes(32 * 32 * 32, 11);
    let dir = tempfile::tempdir().unwrap();
    let config = ConvertConfig::default()
        .with_brick_size(16)
        .with_compression(CompressionMethod::Zlib, CompressionLevel::new(5));
    let path = convert(data, u8_domain(vec![32, 32, 32]), config, &dir, "corrupt.bvf").await;

    let clean = VolumeAccess::open(&path).await.unwrap();
    let target = clean.brick_entry(0, 3).unwrap().clone();
    drop(clean);

    // Damage the middle of brick 3's compressed payload
    let mut bytes = std::fs::read(&path).unwrap();
    let data_region = 38 + 9; // header + data block prefix
    let at = data_region as u64 + target.offset + target.compressed_len / 2;
    bytes[at as usize] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let volume = VolumeAccess::open(&path).await.unwrap();
    match volume.brick(0, 3).await {
        Err(err) => {
            assert!(err.is_recoverable());
            match err {
                VolumeError::CorruptBrick { lod, index, .. } => {
                    assert_eq!((lod, index), (0, 3));
                }
                other => panic!("expected CorruptBrick, got {:?}", other),
            }
        }
        Ok(brick) => panic!("corrupt brick decoded to {} bytes", brick.len()),
    }

    // Every other brick remains readable
    for index in 0..volume.layout().brick_count(0) {
        if index != 3 {
            volume.brick(0, index).await.unwrap();
        }
    }
}

#[tokio::test]
async fn concurrent_brick_reads_share_one_handle() {
    let data = pseudo_random_bytes(32 * 32 * 32, 21);
    let dir = tempfile::tempdir().unwrap();
    let config = ConvertConfig::default()
        .with_brick_size(16)
        .with_compression(CompressionMethod::Bzip2, CompressionLevel::new(2));
    let path = convert(data, u8_domain(vec![32, 32, 32]), config, &dir, "conc.bvf").await;

    let volume = Arc::new(
        VolumeAccess::open(&path)
            .await
            .unwrap()
            .with_cache_capacity(8),
    );
    let mut tasks = Vec::new();
    for index in 0..volume.layout().brick_count(0) {
        let volume = Arc::clone(&volume);
        tasks.push(tokio::spawn(async move {
            volume.brick(0, index).await.unwrap().len()
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap() > 0);
    }

    // The batched read path returns the same results
    let requests: Vec<(usize, u64)> = (0..8).map(|i| (0usize, i)).collect();
    let bricks = volume.bricks(&requests).await.unwrap();
    assert_eq!(bricks.len(), 8);
}

#[tokio::test]
async fn domain_smaller_than_one_brick() {
    let data = pseudo_random_bytes(10 * 12 * 14, 5);
    let dir = tempfile::tempdir().unwrap();
    let config = ConvertConfig::default();
    let path = convert(
        data.clone(),
        u8_domain(vec![10, 12, 14]),
        config,
        &dir,
        "tiny.bvf",
    )
    .await;

    let volume = VolumeAccess::open(&path).await.unwrap();
    assert_eq!(volume.lod_count(), 1);
    assert_eq!(volume.layout().brick_grid(0), vec![1, 1, 1]);
    let brick = volume.brick(0, 0).await.unwrap();
    assert_eq!(&brick[..], &data[..]);
}

#[tokio::test]
async fn file_source_and_vector_elements() {
    // 2-component u16 voxels read from a file on disk
    let voxels = 16u64 * 16 * 16;
    let raw = pseudo_random_bytes((voxels * 4) as usize, 17);
    let dir = tempfile::tempdir().unwrap();
    let flat_path = dir.path().join("flat.raw");
    std::fs::write(&flat_path, &raw).unwrap();

    let element = ElementType::vector(ElementKind::U16, 2).unwrap();
    let domain = Domain::new(vec![16, 16, 16], element).unwrap();
    let dest = dir.path().join("vec.bvf");
    Converter::new(ConvertConfig::default().with_brick_size(8))
        .convert(
            Arc::new(brickvol::FileSource::open(&flat_path).unwrap()),
            domain,
            &dest,
        )
        .await
        .unwrap();

    let volume = VolumeAccess::open(&dest).await.unwrap();
    assert_eq!(volume.domain().element(), element);
    // No histogram for vector data
    assert!(volume.histogram().is_none());
    assert_eq!(volume.lod_count(), 2);
}

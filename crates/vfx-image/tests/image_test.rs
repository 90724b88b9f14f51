//! Integration tests for tiled images over the cache.

use std::sync::Arc;
use std::thread;

use approx::assert_abs_diff_eq;
use vfx_cache::{
    Cache, CacheConfig, DiskCacheConfig, HostTextureContext, PixelStorage, StorageMode, TextureContext, TileKey,
};
use vfx_core::{AbortSignal, BitDepth, Error, ImagePlaneDesc, MAX_MIP_LEVEL, RectI, RenderScale};
use vfx_image::{BufferFormat, CachePolicy, Image, InitStorageArgs, render_preview};

const HASH: u64 = 0xfeed;

fn cached(bounds: RectI, plane: ImagePlaneDesc, cache: &Cache, policy: CachePolicy) -> InitStorageArgs {
    InitStorageArgs::new(bounds, plane)
        .with_cache(cache.clone(), policy)
        .with_key(HASH, 12.0, 0)
}

fn rgba_key(level: u32) -> TileKey {
    TileKey::new(HASH, 12.0, 0, "Color.RGBA", RenderScale::IDENTITY, BitDepth::Float).with_mip_level(level)
}

fn assert_uniform(image: &Image, expected: [f32; 4]) {
    let b = image.bounds();
    for y in b.y1..b.y2 {
        for x in b.x1..b.x2 {
            assert_eq!(image.pixel(x, y), Some(expected), "pixel ({x}, {y})");
        }
    }
}

#[test]
fn constant_images_survive_downscale() {
    let bounds = RectI::new(-3, 5, 14, 16);
    for depth in [BitDepth::Byte, BitDepth::Short, BitDepth::Float] {
        for components in 1..=4 {
            let mut image = Image::create(
                InitStorageArgs::new(bounds, ImagePlaneDesc::color_with_components(components)).with_bit_depth(depth),
            )
            .unwrap();
            image.fill([0.2, 0.4, 0.6, 0.8], bounds).unwrap();
            let expected = image.pixel(bounds.x1, bounds.y1).unwrap();
            for levels in 1..=3 {
                let small = image.downscale_mip_map(bounds, levels).unwrap();
                assert_eq!(small.bounds(), bounds.downscale_pow2(levels));
                assert_eq!(small.bit_depth(), depth);
                assert_uniform(&small, expected);
            }
        }
    }
}

#[test]
fn byte_box_filter_halves_bounds() {
    let bounds = RectI::from_size(4, 4);
    let mut image =
        Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::alpha()).with_bit_depth(BitDepth::Byte)).unwrap();
    image.fill([0.0, 0.0, 0.0, 200.0 / 255.0], bounds).unwrap();
    let small = image.downscale_mip_map(bounds, 1).unwrap();
    assert_eq!(small.bounds(), RectI::from_size(2, 2));
    assert_uniform(&small, [200.0 / 255.0, 0.0, 0.0, 0.0]);
}

#[test]
fn tiled_downscale_matches_full_rect() {
    let bounds = RectI::new(0, 0, 300, 140);
    let mut tiled = Image::create(
        InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())
            .with_bit_depth(BitDepth::Short)
            .with_buffer_format(BufferFormat::MonoChannelTiled),
    )
    .unwrap();
    tiled.fill([0.25, 0.5, 0.75, 1.0], bounds).unwrap();
    let expected = tiled.pixel(0, 0).unwrap();
    let small = tiled.downscale_mip_map(RectI::new(10, 10, 290, 130), 2).unwrap();
    assert_eq!(small.buffer_format(), BufferFormat::PackedFullRect);
    assert_eq!(small.bounds(), RectI::new(2, 2, 73, 33));
    assert_uniform(&small, expected);
}

#[test]
fn copy_converts_every_depth() {
    let bounds = RectI::from_size(5, 3);
    let color = [0.1, 0.35, 0.6, 0.85];
    let mut source = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())).unwrap();
    source.fill(color, bounds).unwrap();
    for (depth, epsilon) in [
        (BitDepth::Byte, 0.5 / 255.0),
        (BitDepth::Short, 0.5 / 65535.0),
        (BitDepth::Half, 1e-3),
        (BitDepth::Float, 0.0),
    ] {
        for format in [BufferFormat::PackedFullRect, BufferFormat::CoplanarFullRect, BufferFormat::MonoChannelTiled] {
            let mut copy = Image::create(
                InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())
                    .with_bit_depth(depth)
                    .with_buffer_format(format),
            )
            .unwrap();
            copy.copy_pixels(&source, bounds).unwrap();
            let mut back = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())).unwrap();
            back.copy_pixels(&copy, bounds).unwrap();
            let px = back.pixel(4, 2).unwrap();
            for c in 0..4 {
                assert_abs_diff_eq!(px[c], color[c], epsilon = epsilon + 1e-7);
            }
        }
    }
}

#[test]
fn copy_maps_channels() {
    let bounds = RectI::from_size(2, 2);
    let mut alpha = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::alpha())).unwrap();
    alpha.fill([0.0, 0.0, 0.0, 0.5], bounds).unwrap();

    let mut rgba = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())).unwrap();
    rgba.copy_pixels(&alpha, bounds).unwrap();
    assert_eq!(rgba.pixel(1, 1), Some([0.0, 0.0, 0.0, 0.5]));

    let mut rgb = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::rgb())).unwrap();
    rgb.fill([0.3, 0.3, 0.3, 0.0], bounds).unwrap();
    let mut from_rgb = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())).unwrap();
    from_rgb.copy_pixels(&rgb, bounds).unwrap();
    assert_eq!(from_rgb.pixel(0, 0), Some([0.3, 0.3, 0.3, 1.0]));
}

#[test]
fn copy_into_shared_view() {
    let bounds = RectI::from_size(4, 4);
    let mut image = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())).unwrap();
    image.fill([1.0; 4], bounds).unwrap();
    let view = image.share();
    image.copy_pixels(&view, RectI::new(0, 0, 2, 2)).unwrap();
    assert_eq!(image.pixel(1, 1), Some([1.0; 4]));
}

#[test]
fn nan_repair_is_idempotent_on_tiles() {
    let bounds = RectI::new(0, 0, 300, 200);
    let mut image = Image::create(
        InitStorageArgs::new(bounds, ImagePlaneDesc::rgb())
            .with_bit_depth(BitDepth::Half)
            .with_buffer_format(BufferFormat::MonoChannelTiled),
    )
    .unwrap();
    image.fill([f32::NAN, 0.5, f32::NEG_INFINITY, 0.0], bounds).unwrap();
    assert!(image.check_for_nans(bounds).unwrap());
    assert_eq!(image.pixel(299, 199), Some([1.0, 0.5, f32::NEG_INFINITY, 0.0]));
    assert!(!image.check_for_nans(bounds).unwrap());
}

#[test]
fn tiles_partition_bounds() {
    let bounds = RectI::new(-100, -50, 300, 200);
    let image = Image::create(
        InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())
            .with_buffer_format(BufferFormat::MonoChannelTiled)
            .with_channels([true, false, true, false]),
    )
    .unwrap();
    assert_eq!(image.tile_grid(), (4, 3));
    assert_eq!(image.tiles().len(), 12);
    let area: u64 = image.tiles().iter().map(|t| t.bounds().area()).sum();
    assert_eq!(area, bounds.area());
    for (i, a) in image.tiles().iter().enumerate() {
        assert!(bounds.contains(&a.bounds()));
        for b in &image.tiles()[i + 1..] {
            assert!(!a.bounds().intersects(&b.bounds()));
        }
        let indices: Vec<i32> = a.channels().iter().map(|m| m.channel_index()).collect();
        assert_eq!(indices, vec![0, 2]);
        let (gx, gy) = a.grid_index();
        let cell = RectI::new(gx * 128, gy * 128, (gx + 1) * 128, (gy + 1) * 128);
        for mono in a.channels() {
            assert_eq!(mono.buffer().unwrap().bounds(), cell);
        }
    }
}

#[test]
fn no_channel_selected_is_rejected() {
    let args = InitStorageArgs::new(RectI::from_size(4, 4), ImagePlaneDesc::rgb())
        .with_buffer_format(BufferFormat::MonoChannelTiled)
        .with_channels([false, false, false, true]);
    assert!(matches!(Image::create(args), Err(Error::IncompatibleStorage(_))));
}

#[test]
fn deep_mip_levels_are_rejected() {
    let cache = Cache::in_memory(64 << 20);
    let args = cached(RectI::from_size(512, 512), ImagePlaneDesc::alpha(), &cache, CachePolicy::ReadWrite)
        .with_bit_depth(BitDepth::Byte)
        .with_buffer_format(BufferFormat::MonoChannelTiled);
    let deep = Image::create(args.clone().with_mip_level(MAX_MIP_LEVEL + 1));
    assert!(matches!(deep, Err(Error::IncompatibleStorage(_))));
    assert!(Image::create(args.with_mip_level(MAX_MIP_LEVEL)).is_ok());

    let image = Image::create(InitStorageArgs::new(RectI::from_size(4, 4), ImagePlaneDesc::rgba())).unwrap();
    assert!(image.downscale_mip_map(image.bounds(), 40).is_err());
}

#[test]
fn read_write_reuses_cached_tiles() {
    let cache = Cache::in_memory(64 << 20);
    let bounds = RectI::from_size(16, 16);
    let mut first = Image::create(cached(bounds, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)).unwrap();
    assert_eq!(first.rest_to_render(), (vec![bounds], false));
    first.fill([0.25; 4], bounds).unwrap();
    first.push_tiles_to_cache_if_not_aborted().unwrap();
    assert!(cache.contains(&rgba_key(0)));
    drop(first);

    let second = Image::create(cached(bounds, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)).unwrap();
    assert_eq!(second.rest_to_render(), (vec![], false));
    assert_uniform(&second, [0.25; 4]);
    assert!(cache.stats().hits >= 1);
}

#[test]
fn write_only_replaces_entries() {
    let cache = Cache::in_memory(64 << 20);
    let bounds = RectI::from_size(8, 8);
    let mut old = Image::create(cached(bounds, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)).unwrap();
    old.fill([0.25; 4], bounds).unwrap();
    drop(old);

    let mut fresh = Image::create(cached(bounds, ImagePlaneDesc::rgba(), &cache, CachePolicy::WriteOnly)).unwrap();
    assert_eq!(fresh.rest_to_render().0, vec![bounds]);
    assert!(!cache.contains(&rgba_key(0)));
    fresh.fill([0.75; 4], bounds).unwrap();
    drop(fresh);

    let reader = Image::create(cached(bounds, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)).unwrap();
    assert!(reader.rest_to_render().0.is_empty());
    assert_uniform(&reader, [0.75; 4]);
}

#[test]
fn stale_full_rect_entry_is_recomputed() {
    let cache = Cache::in_memory(64 << 20);
    let small = RectI::from_size(8, 8);
    let large = RectI::from_size(16, 16);
    let mut first = Image::create(cached(small, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)).unwrap();
    first.fill([0.5; 4], small).unwrap();
    drop(first);

    let second = Image::create(cached(large, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)).unwrap();
    assert_eq!(second.rest_to_render().0, vec![large]);

    // A smaller request is served by the larger buffer.
    let mut second = second;
    second.fill([0.5; 4], large).unwrap();
    drop(second);
    let third = Image::create(cached(small, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)).unwrap();
    assert!(third.rest_to_render().0.is_empty());
}

#[test]
fn mip_level_falls_back_to_level_zero() {
    let cache = Cache::in_memory(64 << 20);
    let full = RectI::from_size(9, 9);
    let mut level0 = Image::create(cached(full, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)).unwrap();
    level0.fill([0.5, 0.25, 0.125, 1.0], full).unwrap();
    drop(level0);

    let half = full.downscale_pow2(1);
    let level1 = Image::create(
        cached(half, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite).with_mip_level(1),
    )
    .unwrap();
    assert!(level1.rest_to_render().0.is_empty());
    assert_uniform(&level1, [0.5, 0.25, 0.125, 1.0]);
    assert!(cache.contains(&rgba_key(1)));
}

#[test]
fn mip_level_fallback_for_mono_tiles() {
    let cache = Cache::in_memory(64 << 20);
    let full = RectI::from_size(512, 512);
    let args = |bounds: RectI, level: u32| {
        cached(bounds, ImagePlaneDesc::alpha(), &cache, CachePolicy::ReadWrite)
            .with_bit_depth(BitDepth::Byte)
            .with_buffer_format(BufferFormat::MonoChannelTiled)
            .with_mip_level(level)
    };
    let mut level0 = Image::create(args(full, 0)).unwrap();
    assert_eq!(level0.tiles().len(), 4);
    level0.fill([0.0, 0.0, 0.0, 0.6], full).unwrap();
    let expected = level0.pixel(0, 0).unwrap();
    drop(level0);

    let level1 = Image::create(args(full.downscale_pow2(1), 1)).unwrap();
    assert_eq!(level1.tiles().len(), 1);
    assert!(level1.rest_to_render().0.is_empty());
    assert_uniform(&level1, expected);

    // Other content has no level 0 to rebuild from.
    let other = Image::create(args(RectI::from_size(256, 256), 1).with_key(HASH + 1, 12.0, 0)).unwrap();
    assert_eq!(other.rest_to_render().0.len(), 1);
}

#[test]
fn draft_requests_accept_final_quality() {
    let cache = Cache::in_memory(64 << 20);
    let bounds = RectI::from_size(4, 4);
    let mut final_quality =
        Image::create(cached(bounds, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)).unwrap();
    final_quality.fill([0.5; 4], bounds).unwrap();
    drop(final_quality);

    let draft = Image::create(cached(bounds, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite).with_draft(true))
        .unwrap();
    assert!(draft.rest_to_render().0.is_empty());
    assert_uniform(&draft, [0.5; 4]);
}

#[test]
fn mask_mix_blends_with_original() {
    let bounds = RectI::from_size(4, 4);
    let plane = ImagePlaneDesc::rgba;
    let original = Image::create(InitStorageArgs::new(bounds, plane())).unwrap();
    let mut mask = Image::create(InitStorageArgs::new(RectI::from_size(2, 4), ImagePlaneDesc::alpha())).unwrap();
    mask.fill([0.0, 0.0, 0.0, 0.25], mask.bounds()).unwrap();

    let mut image = Image::create(InitStorageArgs::new(bounds, plane())).unwrap();
    image.fill([1.0; 4], bounds).unwrap();
    image.apply_mask_mix(bounds, Some(&original), Some(&mask), true, false, 1.0).unwrap();
    assert_eq!(image.pixel(0, 0), Some([0.25; 4]));
    assert_eq!(image.pixel(3, 0), Some([0.0; 4]));

    image.fill([1.0; 4], bounds).unwrap();
    image.apply_mask_mix(bounds, Some(&original), Some(&mask), true, true, 1.0).unwrap();
    assert_eq!(image.pixel(1, 1), Some([0.75; 4]));
    assert_eq!(image.pixel(3, 3), Some([1.0; 4]));

    image.fill([1.0; 4], bounds).unwrap();
    image.apply_mask_mix(bounds, Some(&original), None, true, false, 0.5).unwrap();
    assert_eq!(image.pixel(2, 2), Some([0.5; 4]));

    image.fill([1.0; 4], bounds).unwrap();
    image.apply_mask_mix(bounds, Some(&original), Some(&mask), false, false, 1.0).unwrap();
    assert_eq!(image.pixel(0, 0), Some([1.0; 4]));
}

#[test]
fn mask_without_alpha_is_rejected() {
    let bounds = RectI::from_size(4, 4);
    let original = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())).unwrap();
    let mut image = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())).unwrap();
    image.fill([1.0; 4], bounds).unwrap();

    for plane in [ImagePlaneDesc::xy("Forward"), ImagePlaneDesc::rgb()] {
        let mask = Image::create(InitStorageArgs::new(bounds, plane)).unwrap();
        assert!(matches!(
            image.apply_mask_mix(bounds, Some(&original), Some(&mask), true, false, 1.0),
            Err(Error::IncompatibleStorage(_))
        ));
        image.apply_mask_mix(bounds, Some(&original), Some(&mask), false, false, 1.0).unwrap();
    }
    assert_eq!(image.pixel(0, 0), Some([1.0; 4]));
}

#[test]
fn unprocessed_channels_come_back() {
    let bounds = RectI::from_size(3, 3);
    let mut original = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())).unwrap();
    original.fill([0.125, 0.25, 0.375, 0.5], bounds).unwrap();
    let mut image = Image::create(
        InitStorageArgs::new(bounds, ImagePlaneDesc::rgba()).with_buffer_format(BufferFormat::CoplanarFullRect),
    )
    .unwrap();
    image.fill([1.0; 4], bounds).unwrap();
    let processed = [true, false, true, false];
    assert!(image.can_copy_unprocessed_channels(processed));
    image.copy_unprocessed_channels(bounds, Some(&original), processed).unwrap();
    assert_uniform(&image, [1.0, 0.25, 1.0, 0.5]);
}

#[test]
fn disk_tiles_round_trip_through_cache() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::with_ram_budget(16 << 20).with_disk(DiskCacheConfig::new(dir.path()).with_max_bytes(16 << 20));
    let cache = Cache::new(config).unwrap();
    let bounds = RectI::from_size(300, 300);
    let args = || {
        cached(bounds, ImagePlaneDesc::alpha(), &cache, CachePolicy::ReadWrite)
            .with_storage(StorageMode::Disk)
            .with_bit_depth(BitDepth::Byte)
            .with_buffer_format(BufferFormat::MonoChannelTiled)
    };
    let mut image = Image::create(args()).unwrap();
    assert_eq!(image.tiles().len(), 4);
    let buffer = image.tiles()[0].channels()[0].buffer().unwrap().clone();
    assert_eq!(buffer.mode(), StorageMode::Disk);
    image.fill([0.0, 0.0, 0.0, 0.5], bounds).unwrap();
    drop(image);
    cache.flush().unwrap();

    let again = Image::create(args()).unwrap();
    assert!(again.rest_to_render().0.is_empty());
    assert_eq!(again.pixel(299, 299), Some([128.0 / 255.0, 0.0, 0.0, 0.0]));
}

#[test]
fn disk_storage_needs_disk_cache() {
    let cache = Cache::in_memory(1 << 20);
    let args = cached(RectI::from_size(8, 8), ImagePlaneDesc::alpha(), &cache, CachePolicy::ReadWrite)
        .with_storage(StorageMode::Disk)
        .with_buffer_format(BufferFormat::MonoChannelTiled);
    assert!(matches!(Image::create(args), Err(Error::IncompatibleStorage(_))));
}

#[test]
fn texture_images_on_host_context() {
    let context: Arc<dyn TextureContext> = Arc::new(HostTextureContext::new());
    let bounds = RectI::new(2, 2, 10, 6);
    let texture_args = || {
        InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())
            .with_storage(StorageMode::Texture)
            .with_gpu_context(context.clone())
    };
    let mut gpu = Image::create(texture_args()).unwrap();
    gpu.fill([0.5, 0.25, 0.125, 1.0], bounds).unwrap();
    assert_eq!(gpu.pixel(9, 5), Some([0.5, 0.25, 0.125, 1.0]));
    assert!(matches!(gpu.get_cpu_tile_data(0), Err(Error::NotCpuAccessible)));

    let mut cpu = Image::create(
        InitStorageArgs::new(bounds, ImagePlaneDesc::rgb()).with_bit_depth(BitDepth::Byte),
    )
    .unwrap();
    cpu.copy_pixels(&gpu, bounds).unwrap();
    assert_eq!(cpu.pixel(2, 2), Some([128.0 / 255.0, 64.0 / 255.0, 32.0 / 255.0, 0.0]));

    let mut mask = Image::create(InitStorageArgs::new(bounds, ImagePlaneDesc::alpha())).unwrap();
    mask.fill([0.0, 0.0, 0.0, 0.5], bounds).unwrap();
    let original = Image::create(texture_args()).unwrap();
    gpu.apply_mask_mix(bounds, Some(&original), Some(&mask), true, false, 1.0).unwrap();
    assert_eq!(gpu.pixel(3, 3), Some([0.25, 0.125, 0.0625, 0.5]));

    let mut alpha_into_gpu = Image::create(texture_args()).unwrap();
    alpha_into_gpu.copy_pixels(&mask, bounds).unwrap();
    assert_eq!(alpha_into_gpu.pixel(4, 4), Some([0.0, 0.0, 0.0, 0.5]));
    assert!(gpu.check_for_nans(bounds).is_ok());
}

#[test]
fn full_texture_copy_keeps_separate_textures() {
    let context: Arc<dyn TextureContext> = Arc::new(HostTextureContext::new());
    let bounds = RectI::from_size(6, 4);
    let texture_args = || {
        InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())
            .with_storage(StorageMode::Texture)
            .with_gpu_context(context.clone())
    };
    let mut src = Image::create(texture_args()).unwrap();
    src.fill([0.25, 0.5, 0.75, 1.0], bounds).unwrap();
    let mut dst = Image::create(texture_args()).unwrap();
    dst.copy_pixels(&src, bounds).unwrap();
    assert_eq!(dst.pixel(5, 3), Some([0.25, 0.5, 0.75, 1.0]));

    let ours = dst.tiles()[0].channels()[0].buffer().unwrap().clone();
    let theirs = src.tiles()[0].channels()[0].buffer().unwrap().clone();
    assert!(!Arc::ptr_eq(&ours, &theirs));
    src.fill([1.0; 4], bounds).unwrap();
    assert_eq!(dst.pixel(0, 0), Some([0.25, 0.5, 0.75, 1.0]));
}

#[test]
fn texture_storage_needs_packed_float() {
    let context: Arc<dyn TextureContext> = Arc::new(HostTextureContext::new());
    let args = InitStorageArgs::new(RectI::from_size(4, 4), ImagePlaneDesc::rgba())
        .with_storage(StorageMode::Texture)
        .with_bit_depth(BitDepth::Byte)
        .with_gpu_context(context);
    assert!(matches!(Image::create(args), Err(Error::IncompatibleStorage(_))));
}

#[test]
fn pending_tiles_are_waited_for() {
    let cache = Cache::in_memory(64 << 20);
    let bounds = RectI::from_size(8, 8);
    let mut producer = Image::create(cached(bounds, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)).unwrap();
    let mut consumer = Image::create(cached(bounds, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)).unwrap();
    assert_eq!(consumer.rest_to_render(), (vec![], true));

    thread::scope(|s| {
        s.spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            producer.fill([0.5; 4], bounds).unwrap();
            drop(producer);
        });
        assert!(!consumer.wait_for_pending_tiles().unwrap());
    });
    assert_eq!(consumer.rest_to_render(), (vec![], false));
    assert_uniform(&consumer, [0.5; 4]);
}

#[test]
fn aborted_tiles_are_not_cached() {
    let cache = Cache::in_memory(64 << 20);
    let bounds = RectI::from_size(8, 8);
    let abort = AbortSignal::new();
    let mut aborted = Image::create(
        cached(bounds, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite).with_abort(abort.clone()),
    )
    .unwrap();
    let mut waiting = Image::create(cached(bounds, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)).unwrap();
    assert!(waiting.rest_to_render().1);

    aborted.fill([0.5; 4], bounds).unwrap();
    abort.abort();
    drop(aborted);
    assert!(!cache.contains(&rgba_key(0)));

    // The abandoned key is handed to the waiting image.
    assert!(waiting.wait_for_pending_tiles().unwrap());
    assert_eq!(waiting.rest_to_render(), (vec![bounds], false));
}

#[test]
fn creation_aborted_up_front_leaves_every_tile_to_render() {
    let cache = Cache::in_memory(64 << 20);
    let bounds = RectI::from_size(512, 512);
    let abort = AbortSignal::new();
    abort.abort();
    let image = Image::create(
        cached(bounds, ImagePlaneDesc::alpha(), &cache, CachePolicy::ReadWrite)
            .with_bit_depth(BitDepth::Byte)
            .with_buffer_format(BufferFormat::MonoChannelTiled)
            .with_abort(abort),
    )
    .unwrap();
    assert_eq!(image.tiles().len(), 4);
    assert!(image.tiles().iter().all(|t| !t.is_allocated()));
    let (rest, pending) = image.rest_to_render();
    assert_eq!(rest.len(), 4);
    assert!(!pending);
    assert_eq!(cache.stats().pending, 0);
}

#[test]
fn delayed_tiles_allocate_on_write() {
    let bounds = RectI::new(0, 0, 200, 100);
    let mut image = Image::create(
        InitStorageArgs::new(bounds, ImagePlaneDesc::rgb())
            .with_bit_depth(BitDepth::Byte)
            .with_buffer_format(BufferFormat::MonoChannelTiled)
            .with_delay_allocation(true),
    )
    .unwrap();
    assert!(image.tiles().iter().all(|t| !t.is_allocated()));
    image.fill([1.0; 4], RectI::new(0, 0, 10, 10)).unwrap();
    assert!(image.tiles()[0].is_allocated());
    let data = image.get_cpu_tile_data(0).unwrap();
    assert_eq!(data.bit_depth, BitDepth::Byte);
    assert_eq!(data.channels.iter().filter(|c| c.is_some()).count(), 3);
    assert_eq!(data.channels[1].as_ref().map(|c| c.component), Some(0));
}

#[test]
fn preview_of_tiled_image() {
    let bounds = RectI::from_size(300, 300);
    let mut image = Image::create(
        InitStorageArgs::new(bounds, ImagePlaneDesc::rgba())
            .with_bit_depth(BitDepth::Byte)
            .with_buffer_format(BufferFormat::MonoChannelTiled),
    )
    .unwrap();
    image.fill([1.0, 0.0, 0.0, 1.0], bounds).unwrap();
    let pixels = render_preview(&image, 16, 16, [true; 4]).unwrap();
    assert!(pixels.iter().all(|p| *p == 0xffff_0000));
}

#[test]
fn proxy_scale_is_part_of_the_key() {
    let cache = Cache::in_memory(16 << 20);
    let bounds = RectI::from_size(8, 8);
    let mut full = Image::create(cached(bounds, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)).unwrap();
    full.fill([1.0; 4], bounds).unwrap();
    drop(full);

    let proxy = cached(bounds, ImagePlaneDesc::rgba(), &cache, CachePolicy::ReadWrite)
        .with_proxy_scale(RenderScale::uniform(0.5));
    let image = Image::create(proxy).unwrap();
    assert_eq!(image.proxy_scale(), RenderScale::uniform(0.5));
    assert_eq!(image.rest_to_render().0, vec![bounds]);
}

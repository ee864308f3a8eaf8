// Drive the split kernel scheduler over a whole image on the host device.
// Run with: cargo run --release --bin split-trace -- [settings.json]

mod settings;
mod tiles;

use std::env;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use split_core::{Device, RenderTile, Task};
use split_kernel::{HostDevice, SplitKernel};
use split_math::{area, UVec2};

use crate::settings::RenderSettings;
use crate::tiles::generate_tiles;

/// Cancels once a time limit has passed.
struct Deadline {
    start: Instant,
    limit: Option<Duration>,
}

impl Task for Deadline {
    fn is_canceled(&self) -> bool {
        self.limit.is_some_and(|limit| self.start.elapsed() >= limit)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let settings = match env::args().nth(1) {
        Some(path) => RenderSettings::load(Path::new(&path))?,
        None => {
            let settings = RenderSettings::default();
            settings.validate()?;
            settings
        }
    };
    log::info!(
        "Rendering {}x{} @ {} spp in {}px tiles",
        settings.width,
        settings.height,
        settings.samples,
        settings.tile_size
    );

    let mut device = HostDevice::new(settings.host_device_config());
    let pixels = area(UVec2::new(settings.width, settings.height));
    let output = device
        .mem_alloc("render_buffer", pixels * 4)
        .context("Failed to allocate render buffer")?;
    let data = device
        .mem_alloc("scene_data", 256)
        .context("Failed to allocate scene data")?;

    let mut kernel = SplitKernel::new(device.clone(), settings.kernel);
    kernel
        .load_kernels(&settings.requested_features())
        .context("Failed to load split kernels")?;

    let task = Deadline {
        start: Instant::now(),
        limit: settings.time_limit.map(Duration::from_secs_f64),
    };
    let tiles = generate_tiles(settings.width, settings.height, settings.tile_size, settings.tile_order);

    let start = Instant::now();
    let mut rounds = 0u64;
    let mut interventions = 0u64;
    let mut rendered = 0usize;
    for rect in &tiles {
        let tile = RenderTile {
            x: rect.x,
            y: rect.y,
            w: rect.width,
            h: rect.height,
            start_sample: 0,
            num_samples: settings.samples,
            offset: rect.y * settings.width + rect.x,
            stride: settings.width,
            buffer: output,
        };

        let report = kernel
            .path_trace(
                &task,
                &tile,
                settings.max_feasible_tile_size,
                settings.per_thread_output_buffer_size,
                &data,
            )
            .with_context(|| format!("Tile at ({}, {}) failed", rect.x, rect.y))?;

        rounds += report.rounds as u64;
        interventions += report.host_interventions as u64;
        if report.canceled {
            log::warn!("Render canceled after {} of {} tiles", rendered, tiles.len());
            break;
        }
        rendered += 1;
    }
    let elapsed = start.elapsed();

    let radiance = device.read_f32(&output)?;
    let mean = radiance.iter().map(|&v| v as f64).sum::<f64>() / pixels as f64;

    println!("Rendered {} / {} tiles in {:?}", rendered, tiles.len(), elapsed);
    println!("Dispatch strategy: {}", kernel.strategy().name());
    println!("Rounds: {}, host interventions: {}", rounds, interventions);
    println!("Final round budget: {}", kernel.path_iteration_times());
    println!("Mean samples accumulated per pixel: {:.2}", mean);

    Ok(())
}

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use spantrace_renderer::{
    render, BlockRenderer, ImageBuffer, NetClient, NetRenderBlock, Object, RenderBlock, RenderServer, RenderSettings, ThreadPool,
};

mod cli;
mod logger;
mod scene;

use cli::Args;
use logger::init_logger;

/// Progress callback that logs every tenth of the frame.
fn log_progress() -> impl FnMut(&ImageBuffer, usize, usize) {
    let mut last_step = 0;
    move |_, done, total| {
        let step = done * 10 / total.max(1);
        if step > last_step {
            last_step = step;
            log::info!("{}% ({}/{} tiles)", step * 10, done, total);
        }
    }
}

fn make_pool(settings: &RenderSettings) -> ThreadPool {
    match settings.threads {
        Some(threads) => ThreadPool::new(threads),
        None => ThreadPool::with_available_parallelism(),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.log_level.clone().map(Into::into));

    let settings = args.render_settings()?;
    log::debug!("Render settings:\n{}", settings.to_json()?);

    if args.server {
        let world: Arc<dyn Object> = Arc::from(scene::demo_world(args.skybox.as_deref())?);
        let server = RenderServer::bind(("0.0.0.0", args.port), world, settings.clone(), make_pool(&settings))
            .with_context(|| format!("Binding port {}", args.port))?;
        server.serve()?;
        return Ok(());
    }

    let (image, report) = if args.client.is_empty() {
        let world: Arc<dyn Object> = Arc::from(scene::demo_world(args.skybox.as_deref())?);
        let shared = Arc::new(settings.clone());
        let pool = make_pool(&settings);
        render(
            &settings,
            |tile| Ok(Box::new(RenderBlock::start(tile, Arc::clone(&world), Arc::clone(&shared), &pool)?) as Box<dyn BlockRenderer>),
            log_progress(),
        )
    } else {
        log::info!("Rendering through {} server(s)", args.client.len());
        let client = Arc::new(NetClient::new(args.client.clone())?);
        render(
            &settings,
            |tile| Ok(Box::new(NetRenderBlock::start(tile, Arc::clone(&client))?) as Box<dyn BlockRenderer>),
            log_progress(),
        )
    };

    let is_hdr = args
        .output
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("hdr"));
    if is_hdr {
        image.save_hdr(&args.output)?;
    } else {
        image.save_png(&args.output)?;
    }

    if !report.is_complete() {
        for (tile, err) in &report.failed {
            log::error!("Tile ({}, {}): {}", tile.x, tile.y, err);
        }
        bail!("{} of {} tiles failed", report.failed.len(), report.tiles);
    }
    Ok(())
}

//! Frame-pump demo: initializes a [`DlcManager`] against a superpack URL,
//! requests one or more packs, and prints progress until everything is
//! ready or the manager gives up.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use dlc_manager::{DlcManager, Hints};
use dlc_manager_http::HttpDownloader;

/// Download one or more DLC packs and report progress until done.
#[derive(FromArgs)]
struct Args {
    /// base URL of the superpack blob (footer, file table, meta, and every
    /// file's payload are all byte ranges within this one resource)
    #[argh(option)]
    url: String,

    /// local directory to cache packs into
    #[argh(option)]
    pack_dir: PathBuf,

    /// pack names to request once initialization completes
    #[argh(positional)]
    packs: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args: Args = argh::from_env();

    std::fs::create_dir_all(&args.pack_dir)
        .with_context(|| format!("creating pack directory {}", args.pack_dir.display()))?;

    let hints = Hints { log_file_path: args.pack_dir.join("dlc_manager.log"), ..Hints::default() };

    let downloader = Box::new(HttpDownloader::with_config(
        hints.downloader_max_handles,
        hints.downloader_chunk_buf_size,
        hints.timeout_for_download,
    ));
    let mut manager = DlcManager::new(hints, downloader, Box::new(dlc_manager::fs::StdFileSystem), args.pack_dir.clone());
    manager.initialize(args.url.clone());

    manager.signals_mut().error.connect(|event| {
        log::error!("{:?}: {} (code {})", event.origin, event.detail, event.code);
    });
    manager.signals_mut().network_ready.connect(|ready| {
        log::info!("network_ready = {ready}");
    });

    let mut requested = false;
    loop {
        manager.update(false);

        if manager.is_offline() {
            anyhow::bail!("initialization failed, see logged errors above");
        }

        if manager.is_ready() && !requested {
            requested = true;
            for pack in &args.packs {
                match manager.request_pack(pack, 0) {
                    Some(_) => log::info!("requested pack {pack}"),
                    None => log::warn!("unknown pack {pack}, ignoring"),
                }
            }
        }

        if requested && args.packs.iter().all(|p| manager.is_pack_ready(p)) {
            log::info!("all requested packs are ready");
            break;
        }

        std::thread::sleep(Duration::from_millis(16));
    }

    Ok(())
}

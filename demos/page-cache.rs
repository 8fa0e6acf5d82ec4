//! Drives a page cache over a raw guest memory image.
//!
//! Usage: `page-cache [IMAGE]`. Without an image, a synthetic one is created
//! in the temporary directory.

use std::{io::Write as _, path::PathBuf, rc::Rc};

use vmi_cache::{
    Counters, Gfn, MapStatus, PageCache, PageCacheOptions, driver::mmap::MmapForeignMemory,
};

/// Creates an image whose pages start with their own GFN.
fn create_image(pages: u64) -> Result<PathBuf, std::io::Error> {
    let path = std::env::temp_dir().join("vmi-cache-demo.raw");
    let mut file = std::fs::File::create(&path)?;

    let mut page = vec![0u8; 4096];
    for gfn in 0..pages {
        page[..8].copy_from_slice(&gfn.to_le_bytes());
        file.write_all(&page)?;
    }

    Ok(path)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .init();

    let path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => create_image(256)?,
    };

    tracing::info!(path = %path.display(), "opening memory image");

    let driver = MmapForeignMemory::open(&path)?;
    let max_gfn = driver.max_gfn();

    let counters = Rc::new(Counters::new());
    let cache = PageCache::new(driver)
        .with_metrics(counters.clone())
        .with_options(PageCacheOptions {
            limit: 64,
            log_map_failures: true,
        })?;

    // Keep the first pages referenced for the whole run. They are never
    // evicted, no matter how many other pages are mapped.
    let pinned = (0..8)
        .map(|gfn| cache.get(Gfn(gfn)))
        .collect::<Result<Vec<_>, _>>()?;

    // Scan the whole image. Every page is released right away, so the cache
    // keeps evicting the least recently used ones.
    let mut checksum = 0u64;
    for gfn in 0..=max_gfn.0 {
        let page = cache.get(Gfn(gfn))?;
        checksum ^= page.read_u64(0)?;
    }

    tracing::info!(
        pages = max_gfn.0 + 1,
        live = cache.len(),
        limit = cache.limit(),
        checksum,
        "scan finished"
    );

    for page in &pinned {
        tracing::info!(gfn = %page.gfn(), refs = ?cache.refs(page.gfn()), "pinned page");
    }

    // A page past the end of the image cannot be mapped.
    let result = cache.acquire(max_gfn + 1);
    tracing::info!(status = %MapStatus::of(&result), "mapping past the end");

    drop(pinned);

    for (name, value) in counters.snapshot() {
        println!("{name}: {value}");
    }

    Ok(())
}

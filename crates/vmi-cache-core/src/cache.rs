use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
};

use serde::{Deserialize, Serialize};

use crate::{
    ForeignMemory, Gfn, KernelVersion, MapError, MappingHandle, Metrics, Mincore, NoMetrics,
    PageGuard, Protection, ResidencyCheck, ResidencyProbe,
};

const DEFAULT_LIMIT: usize = 512;
const MIN_LIMIT: usize = 50;

/// Runtime options of a [`PageCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageCacheOptions {
    /// Soft bound on the number of live mappings.
    pub limit: usize,

    /// Emit an error event when the mapping primitive fails.
    ///
    /// Mapping failures are expected for pages the guest never populated,
    /// so they are silent unless this is set.
    pub log_map_failures: bool,
}

impl Default for PageCacheOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            log_map_failures: false,
        }
    }
}

/// Owner of a newly taken page reference.
#[derive(Debug, Clone, Copy)]
enum Holder {
    /// A raw [`MappingHandle`], released with [`PageCache::release`].
    Handle,

    /// A [`PageGuard`], released when the guard is dropped.
    Guard,
}

/// A cached mapping of one guest page.
///
/// Entries are boxed, so the mapping keeps its address for the lifetime of
/// the entry even if the driver stores the page contents inline.
struct Entry<Page> {
    gfn: Gfn,
    handle: MappingHandle,
    last_access: u64,

    /// References taken through [`PageCache::acquire`].
    refs: u32,

    /// References held by live [`PageGuard`]s.
    guards: u32,

    /// Owned mapping, unmapped when the entry is dropped.
    page: Page,
}

impl<Page> Entry<Page> {
    fn pin(&mut self, holder: Holder) {
        match holder {
            Holder::Handle => self.refs += 1,
            Holder::Guard => self.guards += 1,
        }
    }

    fn references(&self) -> u32 {
        self.refs + self.guards
    }

    fn is_pinned(&self) -> bool {
        self.references() > 0
    }
}

/// Live entries, indexed by GFN and by mapping handle.
///
/// Both indices are only modified by [`insert`] and [`remove`].
///
/// [`insert`]: Self::insert
/// [`remove`]: Self::remove
struct Entries<Page> {
    by_gfn: HashMap<Gfn, Box<Entry<Page>>>,
    by_handle: HashMap<MappingHandle, Gfn>,
}

impl<Page> Entries<Page> {
    fn new() -> Self {
        Self {
            by_gfn: HashMap::new(),
            by_handle: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        debug_assert_eq!(self.by_gfn.len(), self.by_handle.len());
        self.by_gfn.len()
    }

    fn get(&self, gfn: Gfn) -> Option<&Entry<Page>> {
        self.by_gfn.get(&gfn).map(|entry| &**entry)
    }

    fn get_mut(&mut self, gfn: Gfn) -> Option<&mut Entry<Page>> {
        self.by_gfn.get_mut(&gfn).map(|entry| &mut **entry)
    }

    fn gfn_of(&self, handle: MappingHandle) -> Option<Gfn> {
        self.by_handle.get(&handle).copied()
    }

    fn by_handle_mut(&mut self, handle: MappingHandle) -> Option<&mut Entry<Page>> {
        let gfn = self.gfn_of(handle)?;
        self.get_mut(gfn)
    }

    fn insert(&mut self, entry: Box<Entry<Page>>) {
        let previous = self.by_handle.insert(entry.handle, entry.gfn);
        debug_assert!(previous.is_none(), "mapping handle already cached");

        let previous = self.by_gfn.insert(entry.gfn, entry);
        debug_assert!(previous.is_none(), "page already cached");
    }

    fn remove(&mut self, gfn: Gfn) -> Option<Box<Entry<Page>>> {
        let entry = self.by_gfn.remove(&gfn)?;
        self.by_handle.remove(&entry.handle);
        Some(entry)
    }

    fn iter(&self) -> impl Iterator<Item = &Entry<Page>> {
        self.by_gfn.values().map(|entry| &**entry)
    }

    fn clear(&mut self) -> usize {
        let count = self.by_gfn.len();
        self.by_handle.clear();
        self.by_gfn.clear();
        count
    }
}

/// Reference-counted cache of foreign page mappings.
///
/// Every page handed out by [`acquire`] stays mapped until the matching
/// [`release`]. Pages without outstanding references are kept mapped for
/// reuse and are evicted, least recently used first, once the number of
/// live mappings reaches the [`limit`]. Referenced pages are never evicted,
/// so the cache can temporarily grow past its limit.
///
/// The cache is meant to be driven from a single event loop. All methods
/// take `&self`; the type is not `Sync`.
///
/// Dropping the cache unmaps every remaining page, including pages that are
/// still referenced through raw [`MappingHandle`]s.
///
/// [`acquire`]: Self::acquire
/// [`release`]: Self::release
/// [`limit`]: Self::limit
pub struct PageCache<Driver>
where
    Driver: ForeignMemory,
{
    entries: RefCell<Entries<Driver::Page>>,
    driver: Option<Driver>,

    limit: Cell<usize>,
    clock: Cell<u64>,

    residency: Option<ResidencyCheck>,
    probe: Box<dyn ResidencyProbe>,
    metrics: Box<dyn Metrics>,
    log_map_failures: bool,
}

impl<Driver> Drop for PageCache<Driver>
where
    Driver: ForeignMemory,
{
    fn drop(&mut self) {
        // Unmap before the driver (and its session) goes away.
        let count = self.entries.get_mut().clear();
        tracing::debug!(count, "page cache destroyed");
    }
}

impl<Driver> PageCache<Driver>
where
    Driver: ForeignMemory,
{
    /// Default limit on the number of live mappings.
    pub const DEFAULT_LIMIT: usize = DEFAULT_LIMIT;

    /// Smallest accepted limit.
    ///
    /// Smaller caches would spend most of their time evicting.
    pub const MIN_LIMIT: usize = MIN_LIMIT;

    /// Creates a page cache that is not bound to a session.
    ///
    /// Every [`acquire`] fails with [`MapError::NoSession`] until a driver is
    /// attached with [`bind`].
    ///
    /// [`acquire`]: Self::acquire
    /// [`bind`]: Self::bind
    pub fn unbound() -> Self {
        Self {
            entries: RefCell::new(Entries::new()),
            driver: None,
            limit: Cell::new(DEFAULT_LIMIT),
            clock: Cell::new(0),
            residency: None,
            probe: Box::new(Mincore),
            metrics: Box::new(NoMetrics),
            log_map_failures: false,
        }
    }

    /// Creates a page cache bound to the given driver.
    ///
    /// The host kernel version is detected once to decide whether new
    /// mappings are probed for residency. See [`ResidencyCheck::for_kernel`].
    pub fn new(driver: Driver) -> Self {
        let mut cache = Self::unbound();
        cache.bind(driver);
        cache
    }

    /// Binds the cache to a driver.
    ///
    /// Pages mapped through a previously bound driver are unmapped.
    pub fn bind(&mut self, driver: Driver) {
        self.entries.get_mut().clear();

        if self.residency.is_none() {
            let version = KernelVersion::detect();
            let residency = ResidencyCheck::for_kernel(version);
            tracing::debug!(?version, ?residency, "residency check selected");
            self.residency = Some(residency);
        }

        self.driver = Some(driver);
    }

    /// Selects the residency policy for the given host kernel version,
    /// instead of detecting the running kernel.
    pub fn with_kernel_version(self, version: Option<KernelVersion>) -> Self {
        self.with_residency(ResidencyCheck::for_kernel(version))
    }

    /// Sets the residency policy explicitly.
    pub fn with_residency(mut self, residency: ResidencyCheck) -> Self {
        self.residency = Some(residency);
        self
    }

    /// Replaces the residency probe used by [`ResidencyCheck::Probe`].
    ///
    /// Defaults to [`Mincore`].
    pub fn with_probe(mut self, probe: impl ResidencyProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Attaches a metrics sink.
    pub fn with_metrics(mut self, metrics: impl Metrics + 'static) -> Self {
        self.metrics = Box::new(metrics);
        self
    }

    /// Applies the given options.
    ///
    /// Fails if the limit is below [`MIN_LIMIT`].
    ///
    /// [`MIN_LIMIT`]: Self::MIN_LIMIT
    pub fn with_options(mut self, options: PageCacheOptions) -> Result<Self, MapError> {
        self.set_limit(options.limit)?;
        self.log_map_failures = options.log_map_failures;
        Ok(self)
    }

    /// Returns the bound driver.
    pub fn driver(&self) -> Option<&Driver> {
        self.driver.as_ref()
    }

    /// Returns the residency policy in effect.
    pub fn residency(&self) -> ResidencyCheck {
        self.residency.unwrap_or_default()
    }

    /// Returns the current limit.
    pub fn limit(&self) -> usize {
        self.limit.get()
    }

    /// Sets the limit on the number of live mappings.
    ///
    /// Limits below [`MIN_LIMIT`] are rejected and the previous limit stays
    /// in effect. The new limit is enforced on the next insertion; nothing is
    /// evicted immediately.
    ///
    /// [`MIN_LIMIT`]: Self::MIN_LIMIT
    pub fn set_limit(&self, limit: usize) -> Result<(), MapError> {
        if limit < MIN_LIMIT {
            return Err(MapError::LimitTooSmall {
                requested: limit,
                minimum: MIN_LIMIT,
            });
        }

        self.limit.set(limit);
        Ok(())
    }

    /// Returns the number of live mappings.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Checks if the cache holds no mappings.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks if the given page is currently mapped.
    pub fn contains(&self, gfn: Gfn) -> bool {
        self.entries.borrow().get(gfn).is_some()
    }

    /// Returns the number of outstanding references to a mapped page,
    /// including references held by [`PageGuard`]s.
    pub fn refs(&self, gfn: Gfn) -> Option<u32> {
        self.entries.borrow().get(gfn).map(Entry::references)
    }

    /// Returns the page that backs the given mapping handle.
    pub fn page(&self, handle: MappingHandle) -> Option<Gfn> {
        self.entries.borrow().gfn_of(handle)
    }

    /// Maps a guest page, or takes another reference to an existing mapping.
    ///
    /// On success the mapping stays valid (readable and writable) at least
    /// until a matching [`release`]. The handle is borrowed; the cache
    /// remains responsible for unmapping the page.
    ///
    /// # Errors
    ///
    /// - [`MapError::NoSession`] if no driver is bound.
    /// - [`MapError::MapFailed`] if the mapping primitive failed, or mapped
    ///   something other than exactly one page.
    /// - [`MapError::PageNotPresent`] if the page failed the residency
    ///   check. The page has been unmapped again.
    ///
    /// [`release`]: Self::release
    pub fn acquire(&self, gfn: Gfn) -> Result<MappingHandle, MapError> {
        self.acquire_raw(gfn, Holder::Handle).map(|(handle, _)| handle)
    }

    /// Maps a guest page and returns a guard that releases it on drop.
    ///
    /// The reference held by the guard is separate from the references
    /// taken by [`acquire`]; [`release`] never drops it.
    ///
    /// [`acquire`]: Self::acquire
    /// [`release`]: Self::release
    pub fn get(&self, gfn: Gfn) -> Result<PageGuard<'_, Driver>, MapError> {
        let (handle, len) = self.acquire_raw(gfn, Holder::Guard)?;
        Ok(PageGuard::new(self, gfn, handle, len))
    }

    /// Drops one reference to a mapping.
    ///
    /// Unknown handles are ignored. The page stays mapped; it becomes
    /// eligible for eviction once its last reference is released.
    ///
    /// Only references taken by [`acquire`] are released. A page that is
    /// referenced by [`PageGuard`]s alone is left untouched.
    ///
    /// [`acquire`]: Self::acquire
    pub fn release(&self, handle: MappingHandle) {
        let mut entries = self.entries.borrow_mut();

        let entry = match entries.by_handle_mut(handle) {
            Some(entry) => entry,
            None => return,
        };

        match entry.refs.checked_sub(1) {
            Some(refs) => entry.refs = refs,
            None => {
                debug_assert!(entry.guards > 0, "page {} released too many times", entry.gfn);

                tracing::warn!(
                    gfn = %entry.gfn,
                    guards = entry.guards,
                    "released a page without raw references"
                );
            }
        }
    }

    /// Drops the reference held by a guard.
    pub(crate) fn release_guard(&self, gfn: Gfn) {
        let mut entries = self.entries.borrow_mut();

        if let Some(entry) = entries.get_mut(gfn) {
            debug_assert!(entry.guards > 0, "page {gfn} has no guards");
            entry.guards = entry.guards.saturating_sub(1);
        }
    }

    /// Runs `f` on the contents of a mapped page.
    pub(crate) fn with_page<R>(
        &self,
        gfn: Gfn,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, MapError> {
        let mut entries = self.entries.borrow_mut();

        match entries.get_mut(gfn) {
            Some(entry) => Ok(f(&mut entry.page[..])),
            None => Err(MapError::PageNotPresent { gfn }),
        }
    }

    fn acquire_raw(
        &self,
        gfn: Gfn,
        holder: Holder,
    ) -> Result<(MappingHandle, usize), MapError> {
        let driver = match &self.driver {
            Some(driver) => driver,
            None => return Err(MapError::NoSession),
        };

        let mut entries = self.entries.borrow_mut();

        if let Some(entry) = entries.get_mut(gfn) {
            entry.last_access = self.tick();
            entry.pin(holder);
            return Ok((entry.handle, entry.page.len()));
        }

        self.insert_new(driver, &mut entries, gfn, holder)
    }

    fn insert_new(
        &self,
        driver: &Driver,
        entries: &mut Entries<Driver::Page>,
        gfn: Gfn,
        holder: Holder,
    ) -> Result<(MappingHandle, usize), MapError> {
        if entries.len() >= self.limit.get() {
            self.cleanup(entries);
        }

        self.metrics.increment("map_page");

        let page_size = driver.page_size();
        let result = driver.map(gfn, Protection::RW).and_then(|page| {
            if page.len() != page_size {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("mapped {} bytes, expected {page_size}", page.len()),
                ));
            }

            Ok(page)
        });

        let page = match result {
            Ok(page) => page,
            Err(source) => {
                if self.log_map_failures {
                    tracing::error!(%gfn, %source, "failed to map page");
                }

                return Err(MapError::MapFailed { gfn, source });
            }
        };

        let mut entry = Box::new(Entry {
            gfn,
            handle: MappingHandle::default(),
            last_access: 0,
            refs: 0,
            guards: 0,
            page,
        });

        if !self.check_residency(gfn, entry.page.as_ptr(), page_size) {
            // Unmaps the page.
            drop(entry);
            return Err(MapError::PageNotPresent { gfn });
        }

        entry.handle = MappingHandle::from_ptr(entry.page.as_ptr());
        entry.last_access = self.tick();
        entry.pin(holder);

        let handle = entry.handle;
        tracing::trace!(%gfn, %handle, "page mapped");

        entries.insert(entry);
        Ok((handle, page_size))
    }

    fn check_residency(&self, gfn: Gfn, ptr: *const u8, len: usize) -> bool {
        if self.residency() == ResidencyCheck::Trust {
            return true;
        }

        match self.probe.is_resident(ptr, len) {
            Ok(true) => true,
            Ok(false) => {
                tracing::error!(%gfn, "page not resident");
                false
            }
            Err(err) => {
                tracing::error!(%gfn, %err, "residency check failed");
                false
            }
        }
    }

    /// Evicts up to `limit / 2` unreferenced pages, oldest access first.
    fn cleanup(&self, entries: &mut Entries<Driver::Page>) {
        let total = entries.len();

        let mut unused = entries
            .iter()
            .filter(|entry| !entry.is_pinned())
            .map(|entry| (entry.last_access, entry.gfn))
            .collect::<Vec<_>>();

        unused.sort_unstable();

        let mut deleted = 0;
        for &(_, gfn) in unused.iter().take(self.limit.get() / 2) {
            if entries.remove(gfn).is_some() {
                deleted += 1;
            }
        }

        tracing::debug!(total, unused = unused.len(), deleted, "page cache cleanup");
    }

    /// Returns the next recency token.
    fn tick(&self) -> u64 {
        let token = self.clock.get();
        self.clock.set(token + 1);
        token
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;

//! Cache Manager
//!
//! In-memory index of cached resources with an eviction ordering,
//! running size totals, configurable budgets, and FAT file persistence.
//!
//! Records live in an arena and are addressed by stable handles; the URL
//! index and the eviction list both store handles, never the records
//! themselves. All operations run synchronously on the caller's thread.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use url::Url;

use crate::codec::{round_up_i64, ByteReader, ByteWriter};
use crate::digest::{self, DIGEST_LEN};
use crate::resource::{unix_now, CachedResource, CONTENT_SIZE_ALIGNMENT};
use crate::response::ResponseMeta;
use crate::store::ContentStore;
use crate::CacheError;

/// Bump whenever the record encoding changes so stale FAT files are
/// discarded instead of misread.
pub const FAT_FORMAT_VERSION: u32 = 1;

/// Digest plus version and next-file-number counter.
const FAT_HEADER_SIZE: usize = DIGEST_LEN + 8;

const DEFAULT_FAT_FILE_NAME: &str = "cache.fat";
const DEFAULT_BASE_PATH: &str = "cache/";
const DEFAULT_MAX_ENTRIES: usize = 1024;
const DEFAULT_MAX_ENTRY_INFO_SIZE: usize = 4 * 1024;
const DEFAULT_MAX_CONTENT_SIZE: i64 = 10 * 1024 * 1024;
const DEFAULT_MAX_TOTAL_SIZE: i64 = 10 * 1024 * 1024;

/// Stable identifier of a record in the cache arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

/// Everything the external admission policy gets to see before a
/// resource is persisted to disk.
#[derive(Debug)]
pub struct AdmissionQuery<'a> {
    pub url: &'a str,
    pub current_age: f64,
    pub freshness_lifetime: f64,
    pub content_length: i64,
    pub aligned_content_length: i64,
    pub mime_type: &'a str,
}

/// Injected "may this resource be cached to disk" predicate.
pub type AdmissionPolicy = Box<dyn Fn(&AdmissionQuery<'_>) -> bool>;

/// Cache limits and placement. All runtime-mutable through the
/// `HttpCache` setters, which also apply the "non-positive means
/// unlimited" convention.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub max_entry_info_size: usize,
    pub max_content_size: i64,
    pub min_content_size: i64,
    pub max_total_size: i64,
    pub base_path: PathBuf,
    pub fat_file_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_entry_info_size: DEFAULT_MAX_ENTRY_INFO_SIZE,
            max_content_size: DEFAULT_MAX_CONTENT_SIZE,
            min_content_size: 0,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            base_path: PathBuf::from(DEFAULT_BASE_PATH),
            fat_file_name: DEFAULT_FAT_FILE_NAME.to_string(),
        }
    }
}

/// Strip the fragment identifier from HTTP-family URLs. Data, file and
/// custom scheme URLs are compared unmodified since clients may expect
/// them to be unique per fragment.
pub fn normalize_url(url: &str) -> Cow<'_, str> {
    let Some(pos) = url.find('#') else {
        return Cow::Borrowed(url);
    };
    let Ok(parsed) = Url::parse(url) else {
        return Cow::Borrowed(url);
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return Cow::Borrowed(url);
    }
    Cow::Borrowed(&url[..pos])
}

/// The persistent HTTP response cache.
pub struct HttpCache {
    config: CacheConfig,
    store: ContentStore,
    records: Vec<Option<CachedResource>>,
    free: Vec<u32>,
    index: HashMap<String, Handle>,
    /// Eviction ordering: ascending last-used time, stable on ties.
    lru: Vec<Handle>,
    total_footprint: usize,
    total_content: i64,
    file_number: i32,
    policy: Option<AdmissionPolicy>,
}

impl HttpCache {
    pub fn new(config: CacheConfig) -> Self {
        let mut store = ContentStore::new(PathBuf::new());
        store.set_base(config.base_path.clone());
        Self {
            config,
            store,
            records: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            lru: Vec::new(),
            total_footprint: 0,
            total_content: 0,
            file_number: 0,
            policy: None,
        }
    }

    pub fn set_admission_policy(&mut self, policy: Option<AdmissionPolicy>) {
        self.policy = policy;
    }

    // --- index accessors ---

    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    pub fn total_content_size(&self) -> i64 {
        self.total_content
    }

    pub fn total_footprint_size(&self) -> usize {
        self.total_footprint
    }

    pub fn get(&self, handle: Handle) -> Option<&CachedResource> {
        self.record(handle)
    }

    /// Handles in eviction order, least recently used first.
    pub fn handles(&self) -> Vec<Handle> {
        self.lru.clone()
    }

    pub fn mark_in_use(&mut self, handle: Handle, in_use: bool) {
        if let Some(resource) = self.record_mut(handle) {
            resource.in_use = in_use;
        }
    }

    /// Find a record by URL, fragment-normalized for HTTP-family schemes.
    pub fn lookup(&self, url: &str) -> Option<Handle> {
        let url = normalize_url(url);
        self.index.get(url.as_ref()).copied()
    }

    // --- admission ---

    /// Build a record for a freshly completed response. The record is not
    /// indexed or persisted yet; pass it to [`HttpCache::write`] for that.
    pub fn admit(
        &mut self,
        url: &str,
        body: Vec<u8>,
        response: &ResponseMeta,
        varying_headers: &[(String, String)],
        server_push: bool,
    ) -> Option<CachedResource> {
        if !self.config.enabled {
            return None;
        }

        let content_length = body.len() as i64;
        let aligned = round_up_i64(content_length, CONTENT_SIZE_ALIGNMENT);

        if self.config.max_content_size < aligned {
            return None; // size over
        }
        if self.config.min_content_size > content_length {
            return None; // too small to cache
        }
        if self.config.max_total_size < aligned {
            return None; // can never fit
        }
        if self.lru.len() >= self.config.max_entries && self.purge_oldest() == 0 {
            return None; // entry limit over
        }

        let url = normalize_url(url).into_owned();
        let file_name = ContentStore::make_file_name(&mut self.file_number);
        let mut resource = CachedResource::new(file_name, url);
        resource.set_response_meta(response, varying_headers, server_push);
        resource.set_body(Some(body));
        Some(resource)
    }

    /// Persist a record's content and commit it to the index. Nothing is
    /// observable on failure: the record comes back as the error value and
    /// no index or total mutation has happened for it.
    pub fn write(&mut self, mut resource: CachedResource) -> Result<Handle, CachedResource> {
        resource.calc_footprint();

        if resource.footprint > self.config.max_entry_info_size {
            return Err(resource); // entry info size over
        }
        if self.lru.len() >= self.config.max_entries && self.purge_oldest() == 0 {
            return Err(resource); // entry limit over
        }

        let aligned = resource.aligned_content_length;

        if let Some(policy) = &self.policy {
            let query = AdmissionQuery {
                url: &resource.url,
                current_age: resource.current_age(unix_now()),
                freshness_lifetime: resource.freshness_lifetime(),
                content_length: resource.content_length,
                aligned_content_length: aligned,
                mime_type: &resource.mime_type,
            };
            if !policy(&query) {
                return Err(resource);
            }
        }

        if self.total_content + aligned > self.config.max_total_size {
            let need = self.total_content + aligned - self.config.max_total_size;
            if self.purge_by_size(need) < need {
                return Err(resource); // would exceed the total size
            }
        }

        if !resource.write_to_disk(self.store.base()) {
            return Err(resource);
        }

        // A record under the same URL is superseded, content file and all.
        if let Some(&old) = self.index.get(&resource.url) {
            self.remove(old);
        }

        self.total_footprint += resource.footprint;
        self.total_content += aligned;
        let url = resource.url.clone();
        let handle = self.alloc(resource);
        self.index.insert(url, handle);
        self.insert_by_last_used(handle);
        Ok(handle)
    }

    /// Refresh an indexed record after revalidation: new response
    /// metadata, new content, new last-used time. Runs through the same
    /// admission pipeline as a first write.
    pub fn update(
        &mut self,
        handle: Handle,
        body: Vec<u8>,
        response: &ResponseMeta,
        varying_headers: &[(String, String)],
        server_push: bool,
    ) -> Option<Handle> {
        let mut resource = self.unindex_take(handle)?;
        resource.set_response_meta(response, varying_headers, server_push);
        resource.set_body(Some(body));
        resource.last_used_time = unix_now();
        self.write(resource).ok()
    }

    /// Read a record's content back and move it to the most recently
    /// used end of the eviction ordering.
    pub fn read(&mut self, handle: Handle) -> Option<Vec<u8>> {
        let base = self.store.base().to_path_buf();
        let resource = self.record_mut(handle)?;
        let data = resource.read_from_disk(&base)?;
        self.touch(handle);
        Some(data)
    }

    // --- removal and eviction ---

    /// Unindex a record and delete its content file.
    pub fn remove(&mut self, handle: Handle) {
        if let Some(resource) = self.unindex_take(handle) {
            tracing::debug!("remove cache file {}", resource.file_name);
            self.store.unlink(&resource.file_name);
        }
    }

    /// Unindex a record and hand it to the caller. The content file is
    /// deleted only when a name was assigned; the record survives for a
    /// different ownership context.
    pub fn detach(&mut self, handle: Handle) -> Option<CachedResource> {
        let resource = self.unindex_take(handle)?;
        if !resource.file_name.is_empty() {
            self.store.unlink(&resource.file_name);
        }
        Some(resource)
    }

    /// Evict the least recently used record that is not currently in
    /// use. Returns the freed aligned size, zero when nothing was
    /// eligible.
    pub fn purge_oldest(&mut self) -> i64 {
        let mut victim = None;
        for &h in &self.lru {
            if let Some(resource) = self.record(h) {
                if !resource.in_use {
                    victim = Some((h, resource.aligned_content_length));
                    break;
                }
            }
        }
        let Some((handle, freed)) = victim else {
            return 0;
        };
        self.evict(handle);
        freed
    }

    fn purge_pass(&mut self, target: i64) -> i64 {
        let mut purged = 0;
        let mut i = 0;
        while i < self.lru.len() {
            let handle = self.lru[i];
            let Some(resource) = self.record(handle) else {
                i += 1;
                continue;
            };
            if resource.in_use {
                i += 1;
                continue;
            }
            purged += resource.aligned_content_length;
            self.evict(handle);
            if purged >= target {
                break;
            }
        }
        purged
    }

    /// Evict not-in-use records oldest-first until `target` bytes are
    /// freed. Two-phase policy: if the first sweep under-delivers, every
    /// in-use flag is cleared and one more sweep runs, guaranteeing
    /// forward progress even when all entries were pinned.
    pub fn purge_by_size(&mut self, target: i64) -> i64 {
        let mut purged = self.purge_pass(target);
        if purged < target {
            for handle in self.lru.clone() {
                if let Some(resource) = self.record_mut(handle) {
                    resource.in_use = false;
                }
            }
            purged += self.purge_pass(target - purged);
        }
        purged
    }

    /// Resolve drift between the index and the content directory: orphan
    /// files are deleted, records whose file vanished are dropped from
    /// the index (disk is left alone, the bytes are already gone).
    pub fn reconcile_with_disk(&mut self) {
        let on_disk: HashSet<String> = self.store.list_content_files().into_iter().collect();
        let referenced: HashSet<String> = self
            .lru
            .iter()
            .filter_map(|&h| self.record(h))
            .map(|r| r.file_name.clone())
            .collect();

        for name in &on_disk {
            if !referenced.contains(name) {
                tracing::debug!("removing orphan cache file {}", name);
                self.store.unlink(name);
            }
        }

        let missing: Vec<Handle> = self
            .lru
            .iter()
            .copied()
            .filter(|&h| {
                self.record(h)
                    .map(|r| !on_disk.contains(&r.file_name))
                    .unwrap_or(false)
            })
            .collect();
        for handle in missing {
            self.unindex_take(handle);
        }
    }

    /// Clear the index, delete every content file and the FAT file.
    pub fn wipe_all(&mut self) {
        self.reset_memory();
        self.file_number = 0;
        for name in self.store.list_content_files() {
            self.store.unlink(&name);
        }
        let _ = fs::remove_file(self.fat_path());
    }

    // --- persistence ---

    fn fat_path(&self) -> PathBuf {
        self.store.file_path(&self.config.fat_file_name)
    }

    /// Persist the whole index to the FAT file. A partially written file
    /// is deleted rather than left corrupt.
    pub fn save(&self) -> bool {
        match self.save_inner() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("FAT file write failed: {}", err);
                let _ = fs::remove_file(self.fat_path());
                false
            }
        }
    }

    fn save_inner(&self) -> Result<(), CacheError> {
        let total = FAT_HEADER_SIZE + self.total_footprint;
        let mut buf = vec![0u8; total];

        {
            let mut w = ByteWriter::new(&mut buf[DIGEST_LEN..]);
            w.write_u32(FAT_FORMAT_VERSION)?;
            w.write_u32(self.file_number as u32)?;
            for &handle in &self.lru {
                if let Some(resource) = self.record(handle) {
                    resource.serialize(&mut w)?;
                }
            }
        }
        digest::stamp(&mut buf);

        let mut file = File::create(self.fat_path())?;
        file.write_all(&buf)?;
        Ok(())
    }

    /// Reload the index from the FAT file. Any integrity failure discards
    /// the entire persisted cache and starts empty; a missing FAT file
    /// just means an empty start.
    pub fn load(&mut self) -> bool {
        self.reset_memory();

        let blob = match fs::read(self.fat_path()) {
            Ok(blob) => blob,
            Err(_) => return false, // no FAT yet
        };

        match self.parse_fat(&blob) {
            Ok(()) => {
                self.reconcile_with_disk();
                true
            }
            Err(err) => {
                tracing::warn!("FAT file rejected: {}", err);
                self.wipe_all();
                false
            }
        }
    }

    fn parse_fat(&mut self, blob: &[u8]) -> Result<(), CacheError> {
        if blob.len() <= FAT_HEADER_SIZE {
            return Err(CacheError::FatTooSmall(blob.len()));
        }
        if !digest::verify(blob) {
            return Err(CacheError::DigestMismatch);
        }

        let mut r = ByteReader::new(&blob[DIGEST_LEN..]);
        let version = r.read_u32()?;
        if version != FAT_FORMAT_VERSION {
            return Err(CacheError::VersionMismatch(version));
        }
        self.file_number = r.read_u32()? as i32;

        while r.remaining() > 0 {
            let resource = CachedResource::deserialize(&mut r)?;
            self.add_loaded(resource);
        }
        Ok(())
    }

    /// Index a record decoded from the FAT file, honoring the same
    /// per-entry and entry-count budgets as a live write.
    fn add_loaded(&mut self, resource: CachedResource) {
        if resource.footprint > self.config.max_entry_info_size {
            return;
        }
        if self.lru.len() >= self.config.max_entries && self.purge_oldest() == 0 {
            return;
        }
        if let Some(&old) = self.index.get(&resource.url) {
            self.remove(old);
        }

        self.total_footprint += resource.footprint;
        self.total_content += resource.aligned_content_length;
        let url = resource.url.clone();
        let handle = self.alloc(resource);
        self.index.insert(url, handle);
        self.insert_by_last_used(handle);
    }

    // --- configuration ---

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn set_max_entries(&mut self, limit: i64) {
        self.config.max_entries = if limit <= 0 { usize::MAX } else { limit as usize };
    }

    pub fn set_max_entry_info_size(&mut self, limit: i64) {
        self.config.max_entry_info_size = if limit <= 0 { usize::MAX } else { limit as usize };
    }

    pub fn set_max_content_size(&mut self, limit: i64) {
        self.config.max_content_size = if limit <= 0 { i64::MAX } else { limit };
    }

    pub fn set_min_content_size(&mut self, limit: i64) {
        self.config.min_content_size = limit.max(0);
    }

    /// Lowering the total budget below the current usage purges
    /// immediately and rewrites the FAT file.
    pub fn set_max_total_size(&mut self, limit: i64) {
        let limit = if limit <= 0 { i64::MAX } else { limit };
        self.config.max_total_size = limit;

        if limit < self.total_content {
            self.purge_by_size(self.total_content - limit);
            self.save();
        }
    }

    /// Move the cache to a new directory and reload the index found there.
    pub fn set_base_path(&mut self, path: &Path) {
        if path.as_os_str().is_empty() || path == self.store.base() {
            return;
        }
        self.config.base_path = path.to_path_buf();
        self.store.set_base(path.to_path_buf());
        self.load();
    }

    /// Log the whole resource list, for diagnostics.
    pub fn dump(&self) {
        if self.lru.is_empty() {
            tracing::info!("there are no cached resources");
            return;
        }
        for (i, &handle) in self.lru.iter().enumerate() {
            let Some(r) = self.record(handle) else {
                continue;
            };
            tracing::info!(
                "[resource {}] file={} url={} status={} mime={} len={} aligned={} last_used={} expires={:?} max_age={:?} vary={} ssl={}",
                i + 1,
                r.file_name,
                r.url,
                r.status,
                r.mime_type,
                r.content_length,
                r.aligned_content_length,
                r.last_used_time,
                r.expires,
                r.max_age,
                r.has_varying_request_headers,
                r.is_ssl,
            );
        }
    }

    // --- internals ---

    fn record(&self, handle: Handle) -> Option<&CachedResource> {
        self.records.get(handle.0 as usize)?.as_ref()
    }

    fn record_mut(&mut self, handle: Handle) -> Option<&mut CachedResource> {
        self.records.get_mut(handle.0 as usize)?.as_mut()
    }

    fn alloc(&mut self, resource: CachedResource) -> Handle {
        match self.free.pop() {
            Some(slot) => {
                self.records[slot as usize] = Some(resource);
                Handle(slot)
            }
            None => {
                self.records.push(Some(resource));
                Handle((self.records.len() - 1) as u32)
            }
        }
    }

    /// Remove a record from the arena, index, ordering and totals.
    fn unindex_take(&mut self, handle: Handle) -> Option<CachedResource> {
        let slot = self.records.get_mut(handle.0 as usize)?;
        let resource = slot.take()?;
        self.free.push(handle.0);
        self.index.remove(&resource.url);
        if let Some(pos) = self.lru.iter().position(|&h| h == handle) {
            self.lru.remove(pos);
        }
        self.total_footprint = self.total_footprint.saturating_sub(resource.footprint);
        self.total_content = (self.total_content - resource.aligned_content_length).max(0);
        Some(resource)
    }

    fn evict(&mut self, handle: Handle) {
        if let Some(resource) = self.unindex_take(handle) {
            tracing::debug!("evict cache file {}", resource.file_name);
            self.store.unlink(&resource.file_name);
        }
    }

    fn reset_memory(&mut self) {
        self.records.clear();
        self.free.clear();
        self.index.clear();
        self.lru.clear();
        self.total_footprint = 0;
        self.total_content = 0;
    }

    /// Refresh a record's last-used time and re-sort it in the ordering.
    fn touch(&mut self, handle: Handle) {
        let now = unix_now();
        match self.record_mut(handle) {
            Some(resource) => resource.last_used_time = now,
            None => return,
        }
        if let Some(pos) = self.lru.iter().position(|&h| h == handle) {
            self.lru.remove(pos);
            self.insert_by_last_used(handle);
        }
    }

    /// Insert scanning from the most recent end; equal timestamps keep
    /// insertion order, so the ordering is stable on ties.
    fn insert_by_last_used(&mut self, handle: Handle) {
        let t = self
            .record(handle)
            .map(|r| r.last_used_time)
            .unwrap_or(0.0);
        let mut i = self.lru.len();
        while i > 0 {
            let prev = self
                .record(self.lru[i - 1])
                .map(|r| r.last_used_time)
                .unwrap_or(0.0);
            if t >= prev {
                break;
            }
            i -= 1;
        }
        self.lru.insert(i, handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_strips_http_fragments() {
        assert_eq!(
            normalize_url("http://example.com/a#section"),
            "http://example.com/a"
        );
        assert_eq!(
            normalize_url("https://example.com/a?q=1#x"),
            "https://example.com/a?q=1"
        );
    }

    #[test]
    fn test_normalize_url_leaves_other_schemes() {
        assert_eq!(
            normalize_url("data:text/plain,hello#frag"),
            "data:text/plain,hello#frag"
        );
        assert_eq!(normalize_url("file:///tmp/a#x"), "file:///tmp/a#x");
    }

    #[test]
    fn test_normalize_url_without_fragment_is_borrowed() {
        let url = "http://example.com/a";
        assert!(matches!(normalize_url(url), Cow::Borrowed(_)));
    }

    #[test]
    fn test_config_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HttpCache::new(CacheConfig {
            base_path: dir.path().to_path_buf(),
            ..Default::default()
        });

        cache.set_max_entries(0);
        assert_eq!(cache.config.max_entries, usize::MAX);
        cache.set_max_entries(16);
        assert_eq!(cache.config.max_entries, 16);

        cache.set_max_content_size(-1);
        assert_eq!(cache.config.max_content_size, i64::MAX);

        cache.set_min_content_size(-5);
        assert_eq!(cache.config.min_content_size, 0);

        cache.set_max_entry_info_size(0);
        assert_eq!(cache.config.max_entry_info_size, usize::MAX);
    }

    #[test]
    fn test_lru_insert_stable_on_ties() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HttpCache::new(CacheConfig {
            base_path: dir.path().to_path_buf(),
            ..Default::default()
        });

        let mut a = CachedResource::new("00000000.dcf".into(), "http://a".into());
        let mut b = CachedResource::new("00000001.dcf".into(), "http://b".into());
        a.last_used_time = 100.0;
        b.last_used_time = 100.0;
        a.calc_footprint();
        b.calc_footprint();

        let ha = cache.alloc(a);
        cache.index.insert("http://a".into(), ha);
        cache.insert_by_last_used(ha);
        let hb = cache.alloc(b);
        cache.index.insert("http://b".into(), hb);
        cache.insert_by_last_used(hb);

        assert_eq!(cache.lru, vec![ha, hb], "tie keeps insertion order");
    }
}

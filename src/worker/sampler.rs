//! Constant-cost candidate sampling from paginated remote catalogs.
//!
//! [`CandidateSampler::sample`] issues exactly two catalog reads regardless
//! of catalog size: a one-record probe for the total, then one uniformly
//! chosen page. Items are then drawn uniformly from the filtered page.
//!
//! Selection is uniform within the page only. Pages whose records mostly
//! fail the filter over-represent their survivors; that bias is accepted in
//! exchange for constant request cost.

use rand::Rng;
use rand::seq::index;
use tokio_util::sync::CancellationToken;

use super::retry::RetryPolicy;
use crate::adapter::{CandidateFilter, CatalogItem, CatalogPage, ServiceAdapter};
use crate::config::Instance;

/// Records per catalog page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Samples and pages through a remote catalog with bounded retries.
#[derive(Debug, Clone, Copy)]
pub struct CandidateSampler {
    page_size: u32,
    retry: RetryPolicy,
}

impl Default for CandidateSampler {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, RetryPolicy::default())
    }
}

impl CandidateSampler {
    pub fn new(page_size: u32, retry: RetryPolicy) -> Self {
        Self {
            page_size: page_size.max(1),
            retry,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Draw up to `count` filtered candidates from one random page.
    ///
    /// May return fewer than `count` when the chosen page is sparse; never
    /// fetches a second page. Returns empty when either read exhausts its
    /// retries.
    pub async fn sample(
        &self,
        adapter: &dyn ServiceAdapter,
        instance: &Instance,
        filter: &CandidateFilter,
        count: usize,
        cancel: &CancellationToken,
    ) -> Vec<CatalogItem> {
        if count == 0 {
            return Vec::new();
        }

        let total = match self
            .retry
            .run(cancel, "catalog_total", || {
                adapter.get_candidates(instance, 1, 1, filter)
            })
            .await
        {
            Ok(probe) => probe.total_records,
            Err(e) => {
                tracing::warn!(
                    instance = %instance.name,
                    intent = %filter.intent,
                    error = %e,
                    "Catalog size query failed; no candidates this cycle"
                );
                return Vec::new();
            }
        };
        if total == 0 {
            return Vec::new();
        }

        let total_pages = total.div_ceil(u64::from(self.page_size));
        let page = pick_page(&mut rand::rng(), total_pages);

        let Some(fetched) = self.fetch_page(adapter, instance, page, filter, cancel).await else {
            return Vec::new();
        };

        let mut records = fetched.records;
        records.retain(|item| filter.accepts(item));
        let picked = choose_subset(&mut rand::rng(), records, count);

        tracing::debug!(
            instance = %instance.name,
            intent = %filter.intent,
            total,
            page,
            total_pages,
            picked = picked.len(),
            "Sampled catalog page"
        );
        picked
    }

    /// Read one page with the retry budget; `None` on exhaustion.
    pub async fn fetch_page(
        &self,
        adapter: &dyn ServiceAdapter,
        instance: &Instance,
        page: u32,
        filter: &CandidateFilter,
        cancel: &CancellationToken,
    ) -> Option<CatalogPage> {
        match self
            .retry
            .run(cancel, "catalog_page", || {
                adapter.get_candidates(instance, page, self.page_size, filter)
            })
            .await
        {
            Ok(fetched) => Some(fetched),
            Err(e) => {
                tracing::warn!(
                    instance = %instance.name,
                    intent = %filter.intent,
                    page,
                    error = %e,
                    "Catalog page query failed"
                );
                None
            }
        }
    }
}

/// Uniform 1-based page index in `[1, total_pages]`.
fn pick_page<R: Rng>(rng: &mut R, total_pages: u64) -> u32 {
    let last = u32::try_from(total_pages.max(1)).unwrap_or(u32::MAX);
    rng.random_range(1..=last)
}

/// Uniform subset of `count` items, or all of them when there are fewer.
fn choose_subset<R: Rng>(
    rng: &mut R,
    mut items: Vec<CatalogItem>,
    count: usize,
) -> Vec<CatalogItem> {
    if items.len() <= count {
        return items;
    }
    let mut picked = index::sample(rng, items.len(), count).into_vec();
    // Take from the back so earlier indices stay valid.
    picked.sort_unstable_by(|a, b| b.cmp(a));
    picked
        .into_iter()
        .map(|i| items.swap_remove(i))
        .collect()
}

//! Configuration builders for trees and persistent pools.

use std::fmt;
use std::sync::Arc;

use crate::constants::{DEFAULT_CACHE_PAGES, EVT_ORDER_DEFAULT, EVT_ORDER_MAX, EVT_ORDER_MIN};
use crate::errors::{EvtError, EvtResult};
use crate::policy::{EvtPolicy, EVT_FEATS_SUPPORTED, EVT_FEAT_DEFAULT};

/// Parameters fixed when a tree is created.
///
/// # Examples
///
/// ```rust
/// use evtree::{EvtConfig, EVT_FEAT_SPLIT_AXIS};
///
/// let config = EvtConfig::builder()
///     .order(32)
///     .feats(EVT_FEAT_SPLIT_AXIS)
///     .build()
///     .unwrap();
/// assert_eq!(config.order(), 32);
/// ```
#[derive(Clone)]
pub struct EvtConfig {
    order: u16,
    feats: u64,
    policy: Option<Arc<dyn EvtPolicy>>,
}

impl fmt::Debug for EvtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvtConfig")
            .field("order", &self.order)
            .field("feats", &self.feats)
            .field("policy", &self.policy.as_ref().map(|p| p.name()))
            .finish()
    }
}

impl Default for EvtConfig {
    fn default() -> Self {
        EvtConfig {
            order: EVT_ORDER_DEFAULT,
            feats: EVT_FEAT_DEFAULT,
            policy: None,
        }
    }
}

impl EvtConfig {
    pub fn builder() -> EvtConfigBuilder {
        EvtConfigBuilder::new()
    }

    pub fn order(&self) -> u16 {
        self.order
    }

    /// Feature bits recorded in the root.
    pub fn feats(&self) -> u64 {
        match &self.policy {
            Some(policy) => policy.feats(),
            None => self.feats,
        }
    }

    pub fn policy(&self) -> Option<&Arc<dyn EvtPolicy>> {
        self.policy.as_ref()
    }
}

/// Fluent builder of [`EvtConfig`].
pub struct EvtConfigBuilder {
    config: EvtConfig,
}

impl Default for EvtConfigBuilder {
    fn default() -> Self {
        EvtConfigBuilder::new()
    }
}

impl EvtConfigBuilder {
    pub fn new() -> EvtConfigBuilder {
        EvtConfigBuilder {
            config: EvtConfig::default(),
        }
    }

    /// Maximum number of entries per node.
    pub fn order(mut self, order: u16) -> Self {
        self.config.order = order;
        self
    }

    /// Selects a built-in policy by its feature bit.
    pub fn feats(mut self, feats: u64) -> Self {
        self.config.feats = feats;
        self
    }

    /// Installs a custom policy; its own feature bits are recorded.
    pub fn policy(mut self, policy: Arc<dyn EvtPolicy>) -> Self {
        self.config.policy = Some(policy);
        self
    }

    pub fn build(self) -> EvtResult<EvtConfig> {
        let config = self.config;
        validate_order(config.order)?;
        if config.policy.is_none() && config.feats & !EVT_FEATS_SUPPORTED != 0 {
            return Err(EvtError::InvalidArgument(format!(
                "unknown feature bits {:#x}",
                config.feats & !EVT_FEATS_SUPPORTED
            )));
        }
        Ok(config)
    }
}

pub(crate) fn validate_order(order: u16) -> EvtResult<()> {
    if !(EVT_ORDER_MIN..=EVT_ORDER_MAX).contains(&order) {
        return Err(EvtError::InvalidArgument(format!(
            "order {} outside [{}, {}]",
            order, EVT_ORDER_MIN, EVT_ORDER_MAX
        )));
    }
    Ok(())
}

/// Settings of a [`PmemPool`](crate::PmemPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmemConfig {
    cache_pages: usize,
    max_pages: Option<u64>,
    sync_on_commit: bool,
}

impl Default for PmemConfig {
    fn default() -> Self {
        PmemConfig {
            cache_pages: DEFAULT_CACHE_PAGES,
            max_pages: None,
            sync_on_commit: true,
        }
    }
}

impl PmemConfig {
    pub fn builder() -> PmemConfigBuilder {
        PmemConfigBuilder::new()
    }

    pub fn cache_pages(&self) -> usize {
        self.cache_pages
    }

    /// Page limit of the pool file, header page included.
    pub fn max_pages(&self) -> Option<u64> {
        self.max_pages
    }

    pub fn sync_on_commit(&self) -> bool {
        self.sync_on_commit
    }
}

/// Fluent builder of [`PmemConfig`].
pub struct PmemConfigBuilder {
    config: PmemConfig,
}

impl Default for PmemConfigBuilder {
    fn default() -> Self {
        PmemConfigBuilder::new()
    }
}

impl PmemConfigBuilder {
    pub fn new() -> PmemConfigBuilder {
        PmemConfigBuilder {
            config: PmemConfig::default(),
        }
    }

    pub fn cache_pages(mut self, pages: usize) -> Self {
        self.config.cache_pages = pages;
        self
    }

    pub fn max_pages(mut self, pages: u64) -> Self {
        self.config.max_pages = Some(pages);
        self
    }

    /// Whether every commit syncs the pool file. The journal is always synced.
    pub fn sync_on_commit(mut self, sync: bool) -> Self {
        self.config.sync_on_commit = sync;
        self
    }

    pub fn build(self) -> EvtResult<PmemConfig> {
        if let Some(max_pages) = self.config.max_pages {
            if max_pages < 2 {
                return Err(EvtError::InvalidArgument(format!(
                    "a pool needs at least 2 pages, got {}",
                    max_pages
                )));
            }
        }
        Ok(self.config)
    }
}

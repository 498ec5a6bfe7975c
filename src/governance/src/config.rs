//! Governance engine configuration

/// Engine-wide policy knobs.
#[derive(Debug, Clone)]
pub struct GovernanceConfig {
    /// Whether a requester may decide their own request. Off by default;
    /// the audit trail is worth little when authors approve themselves.
    pub allow_self_approval: bool,

    /// Page size used when a caller passes `limit = 0`.
    pub default_page_size: u64,

    /// Upper bound on caller-supplied page sizes.
    pub max_page_size: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            allow_self_approval: false,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl GovernanceConfig {
    /// Resolve a 1-based `page` / `limit` pair into skip/limit for a store.
    pub(crate) fn pagination(&self, page: u64, limit: u64) -> (u64, u64) {
        let page = page.max(1);
        let limit = if limit == 0 {
            self.default_page_size
        } else {
            limit.min(self.max_page_size)
        };
        ((page - 1) * limit, limit)
    }
}

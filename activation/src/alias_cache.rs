//! Team to variant alias lookups backed by a scan of the CMS variant groups.
//!
//! The whole map is a single cache value with a TTL. When it expires the next
//! lookup rebuilds it from scratch and swaps it in; readers see either the old
//! or the new map, never a partial one. Concurrent lookups during a rebuild
//! wait on the same rebuild.

use crate::cms::{CmsClient, VariantGroup};
use crate::metrics_defs::ALIAS_CACHE_REBUILD;
use crate::types::{team_from_group_name, variant_alias};
use crate::upstream::ClientError;
use moka::future::Cache;
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct TeamAlias {
    /// Team name as spelled in the variant group.
    pub team: String,
    pub alias: String,
}

/// Keyed by lowercased team name.
pub type AliasMap = HashMap<String, TeamAlias>;

pub fn build_alias_map(groups: &[VariantGroup]) -> AliasMap {
    let mut map = AliasMap::new();
    for group in groups {
        let Some(team) = team_from_group_name(&group.name) else {
            continue;
        };
        let Some(metadata) = &group.personalize_metadata else {
            tracing::debug!(group = %group.uid, "challenge pro group without personalize metadata");
            continue;
        };
        map.insert(
            team.to_lowercase(),
            TeamAlias {
                team: team.to_string(),
                alias: variant_alias(&metadata.experience_short_uid),
            },
        );
    }
    map
}

pub struct AliasCache {
    cms: Arc<CmsClient>,
    cache: Cache<(), Arc<AliasMap>>,
}

impl AliasCache {
    pub fn new(cms: Arc<CmsClient>, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(1).time_to_live(ttl).build();
        AliasCache { cms, cache }
    }

    /// Variant alias for `team`, compared case-insensitively. `None` when no
    /// Challenge Pro group exists for the team.
    pub async fn resolve(&self, team: &str) -> Result<Option<TeamAlias>, ClientError> {
        let map = self
            .cache
            .try_get_with((), self.rebuild())
            .await
            .map_err(|err| (*err).clone())?;

        Ok(map.get(&team.to_lowercase()).cloned())
    }

    /// Drops the current map so the next lookup rebuilds it.
    pub async fn invalidate(&self) {
        self.cache.invalidate(&()).await;
    }

    async fn rebuild(&self) -> Result<Arc<AliasMap>, ClientError> {
        counter!(ALIAS_CACHE_REBUILD).increment(1);
        let groups = self.cms.list_variant_groups().await?;
        let map = build_alias_map(&groups);
        tracing::info!(groups = groups.len(), teams = map.len(), "rebuilt alias cache");
        Ok(Arc::new(map))
    }
}

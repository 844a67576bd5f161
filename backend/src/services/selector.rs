//! Gateway selection.
//!
//! Pure ranking and filtering over registry snapshots. Callers pass the
//! gateways they want considered; nothing here touches the network.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::Gateway;

/// Constraints applied when picking a gateway.
#[derive(Debug, Clone)]
pub struct SelectionFilters {
    pub min_health_score: u8,
    pub require_available: bool,
    pub require_cors: bool,
    pub require_range: bool,
    /// Gateway names never returned, even on fallback.
    pub exclude: HashSet<String>,
}

impl Default for SelectionFilters {
    fn default() -> Self {
        Self {
            min_health_score: 0,
            require_available: true,
            require_cors: false,
            require_range: false,
            exclude: HashSet::new(),
        }
    }
}

impl SelectionFilters {
    /// Filters for streaming media: byte ranges and CORS are required.
    pub fn media() -> Self {
        Self {
            require_cors: true,
            require_range: true,
            ..Self::default()
        }
    }

    fn accepts(&self, gw: &Gateway) -> bool {
        if self.exclude.contains(&gw.name) {
            return false;
        }
        if self.require_available && !gw.available {
            return false;
        }
        if gw.health_score < self.min_health_score {
            return false;
        }
        if self.require_cors && !gw.supports_cors() {
            return false;
        }
        if self.require_range && !gw.supports_range() {
            return false;
        }
        true
    }

    fn without_capabilities(&self) -> Self {
        Self {
            require_cors: false,
            require_range: false,
            ..self.clone()
        }
    }

    fn exclusions_only(&self) -> Self {
        Self {
            exclude: self.exclude.clone(),
            min_health_score: 0,
            require_available: false,
            require_cors: false,
            require_range: false,
        }
    }
}

/// A gateway chosen for a content id, with the URL to fetch it from.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedUrl {
    pub gateway: Gateway,
    pub url: String,
}

/// Total order used everywhere a "best first" list is needed.
pub fn compare(a: &Gateway, b: &Gateway) -> Ordering {
    b.available
        .cmp(&a.available)
        .then_with(|| b.health_score.cmp(&a.health_score))
        .then_with(|| b.reliability_pct.cmp(&a.reliability_pct))
        .then_with(|| match (a.latency_ms, b.latency_ms) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.priority.cmp(&b.priority))
        .then_with(|| a.name.cmp(&b.name))
}

/// Gateways passing `filters`, best first.
pub fn rank(gateways: &[Gateway], filters: &SelectionFilters) -> Vec<Gateway> {
    let mut ranked: Vec<Gateway> = gateways
        .iter()
        .filter(|g| filters.accepts(g))
        .cloned()
        .collect();
    ranked.sort_by(compare);
    ranked
}

pub fn best(gateways: &[Gateway], filters: &SelectionFilters) -> Option<Gateway> {
    gateways
        .iter()
        .filter(|g| filters.accepts(g))
        .min_by(|a, b| compare(a, b))
        .cloned()
}

/// Like [`best`], but relaxes capability requirements first and then
/// availability and minimum score. Exclusions always hold.
pub fn best_with_fallback(gateways: &[Gateway], filters: &SelectionFilters) -> Option<Gateway> {
    best(gateways, filters)
        .or_else(|| {
            let relaxed = filters.without_capabilities();
            let found = best(gateways, &relaxed);
            if let Some(gw) = &found {
                tracing::debug!(gateway = %gw.name, "No gateway meets capability filters, relaxing");
            }
            found
        })
        .or_else(|| {
            let found = best(gateways, &filters.exclusions_only());
            if let Some(gw) = &found {
                tracing::debug!(gateway = %gw.name, "No available gateway, falling back to best known");
            }
            found
        })
}

/// Best gateway for streaming playback.
pub fn best_for_media(gateways: &[Gateway], exclude: &HashSet<String>) -> Option<Gateway> {
    let filters = SelectionFilters {
        exclude: exclude.clone(),
        ..SelectionFilters::media()
    };
    best_with_fallback(gateways, &filters)
}

/// Retrieval URL for `content_id` on the best gateway.
pub fn resolve_url(
    gateways: &[Gateway],
    content_id: &str,
    filters: &SelectionFilters,
) -> Result<ResolvedUrl> {
    let gateway = best_with_fallback(gateways, filters).ok_or_else(|| {
        AppError::NoCandidates(format!("no gateway can serve {}", content_id))
    })?;
    let url = gateway.url_for(content_id);
    Ok(ResolvedUrl { gateway, url })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GatewaySeed;

    fn gw(name: &str, score: u8, latency: Option<u64>, priority: u32) -> Gateway {
        let mut g = Gateway::from_seed(
            GatewaySeed {
                name: name.into(),
                url_template: format!("https://{}/ipfs/", name),
                region: "international".into(),
                priority,
            },
            false,
        );
        g.available = true;
        g.health_score = score;
        g.reliability_pct = 100;
        g.latency_ms = latency;
        g
    }

    #[test]
    fn test_ties_broken_by_latency_then_priority() {
        let gateways = vec![
            gw("slow", 80, Some(300), 0),
            gw("fast-low-prio", 80, Some(100), 9),
            gw("fast-high-prio", 80, Some(100), 1),
        ];
        let ranked = rank(&gateways, &SelectionFilters::default());
        let names: Vec<_> = ranked.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["fast-high-prio", "fast-low-prio", "slow"]);
    }

    #[test]
    fn test_unknown_latency_ranks_last() {
        let gateways = vec![gw("unknown", 70, None, 0), gw("known", 70, Some(5000), 9)];
        assert_eq!(best(&gateways, &SelectionFilters::default()).unwrap().name, "known");
    }

    #[test]
    fn test_available_before_score() {
        let mut down = gw("down", 99, Some(10), 0);
        down.available = false;
        let gateways = vec![down, gw("up", 20, Some(900), 5)];
        let filters = SelectionFilters {
            require_available: false,
            ..SelectionFilters::default()
        };
        assert_eq!(rank(&gateways, &filters)[0].name, "up");
    }

    #[test]
    fn test_filters() {
        let mut cors = gw("cors", 60, Some(100), 0);
        cors.cors_enabled = Some(true);
        let gateways = vec![cors, gw("plain", 90, Some(50), 0)];

        let filters = SelectionFilters {
            require_cors: true,
            ..SelectionFilters::default()
        };
        assert_eq!(best(&gateways, &filters).unwrap().name, "cors");

        let filters = SelectionFilters {
            min_health_score: 95,
            ..SelectionFilters::default()
        };
        assert!(best(&gateways, &filters).is_none());

        let filters = SelectionFilters {
            exclude: ["plain".to_string()].into_iter().collect(),
            ..SelectionFilters::default()
        };
        assert_eq!(best(&gateways, &filters).unwrap().name, "cors");
    }

    #[test]
    fn test_media_fallback_relaxes_capabilities() {
        let gateways = vec![gw("a", 60, Some(100), 0), gw("b", 90, Some(100), 0)];
        let chosen = best_for_media(&gateways, &HashSet::new()).unwrap();
        assert_eq!(chosen.name, "b");

        let mut media = gw("media", 40, Some(400), 3);
        media.cors_enabled = Some(true);
        media.range_support = Some(true);
        let mut with_media = gateways.clone();
        with_media.push(media);
        assert_eq!(best_for_media(&with_media, &HashSet::new()).unwrap().name, "media");
    }

    #[test]
    fn test_fallback_keeps_exclusions() {
        let mut only = gw("only", 50, None, 0);
        only.available = false;
        let gateways = vec![only];
        let filters = SelectionFilters::default();
        assert_eq!(best_with_fallback(&gateways, &filters).unwrap().name, "only");

        let filters = SelectionFilters {
            exclude: ["only".to_string()].into_iter().collect(),
            ..SelectionFilters::default()
        };
        assert!(best_with_fallback(&gateways, &filters).is_none());
    }

    #[test]
    fn test_resolve_url() {
        let gateways = vec![gw("a.example", 80, Some(10), 0)];
        let resolved = resolve_url(&gateways, "bafyabc", &SelectionFilters::default()).unwrap();
        assert_eq!(resolved.url, "https://a.example/ipfs/bafyabc");
        assert_eq!(resolved.gateway.name, "a.example");

        let err = resolve_url(&[], "bafyabc", &SelectionFilters::default()).unwrap_err();
        assert!(matches!(err, AppError::NoCandidates(_)));
    }
}

//! Gateway catalogs.
//!
//! The built-in catalog ships with the binary so a fresh install can resolve
//! content before the first probe pass. Deployments can extend it with a
//! remote JSON catalog (an array of [`GatewaySeed`]).

use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::gateway::{validate_seed, REGION_INTERNATIONAL, REGION_LOCAL};
use crate::models::GatewaySeed;

const REMOTE_CATALOG_TIMEOUT: Duration = Duration::from_secs(15);

fn seed(name: &str, url_template: &str, region: &str, priority: u32) -> GatewaySeed {
    GatewaySeed {
        name: name.to_string(),
        url_template: url_template.to_string(),
        region: region.to_string(),
        priority,
    }
}

/// Public IPFS gateways known at build time.
pub fn builtin_catalog() -> Vec<GatewaySeed> {
    vec![
        seed("localhost", "http://127.0.0.1:8080/ipfs/", REGION_LOCAL, 0),
        seed("ipfs.io", "https://ipfs.io/ipfs/", REGION_INTERNATIONAL, 1),
        seed("dweb.link", "https://dweb.link/ipfs/", REGION_INTERNATIONAL, 2),
        seed("cloudflare-ipfs", "https://cloudflare-ipfs.com/ipfs/", REGION_INTERNATIONAL, 3),
        seed("pinata", "https://gateway.pinata.cloud/ipfs/", REGION_INTERNATIONAL, 4),
        seed("w3s.link", "https://w3s.link/ipfs/", REGION_INTERNATIONAL, 5),
        seed("4everland", "https://4everland.io/ipfs/", REGION_INTERNATIONAL, 6),
        seed("nftstorage", "https://nftstorage.link/ipfs/", REGION_INTERNATIONAL, 7),
        seed("storry.tv", "https://storry.tv/ipfs/", REGION_INTERNATIONAL, 8),
    ]
}

/// Fetch a remote catalog. Entries that fail validation are skipped with a
/// warning rather than failing the whole catalog.
pub async fn fetch_remote_catalog(client: &reqwest::Client, url: &str) -> Result<Vec<GatewaySeed>> {
    let response = client
        .get(url)
        .timeout(REMOTE_CATALOG_TIMEOUT)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::from_status(status.as_u16(), url));
    }

    let seeds: Vec<GatewaySeed> = response.json().await?;
    let total = seeds.len();
    let valid: Vec<GatewaySeed> = seeds
        .into_iter()
        .filter(|s| match validate_seed(s) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(name = %s.name, error = %e, "Skipping invalid remote catalog entry");
                false
            }
        })
        .collect();

    tracing::info!(url, total, accepted = valid.len(), "Fetched remote gateway catalog");
    Ok(valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = builtin_catalog();
        assert!(!catalog.is_empty());
        for s in &catalog {
            validate_seed(s).unwrap();
        }
    }

    #[test]
    fn test_builtin_names_unique() {
        let catalog = builtin_catalog();
        let names: HashSet<_> = catalog.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.len(), catalog.len());
    }
}
